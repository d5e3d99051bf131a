// Copyright 2024, The Swarmlink Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use async_trait::async_trait;
use multiaddr::Multiaddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Failed to resolve address '{address}': {details}")]
    ResolutionFailed { address: Multiaddr, details: String },
}

/// Resolves name-based addresses (e.g. `dnsaddr`) into concrete multiaddresses.
///
/// The dial pipeline resolves recursively: resolved addresses that are themselves resolvable are
/// fed back through the resolver up to a fixed depth. Failure to resolve an individual address is
/// tolerated by the pipeline; it only fails when no address survives.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    fn can_resolve(&self, addr: &Multiaddr) -> bool;

    async fn resolve(&self, addr: &Multiaddr) -> Result<Vec<Multiaddr>, ResolverError>;
}

/// Resolver that resolves nothing. Every address is treated as already concrete.
#[derive(Debug, Clone, Default)]
pub struct NoopResolver;

#[async_trait]
impl AddressResolver for NoopResolver {
    fn can_resolve(&self, _addr: &Multiaddr) -> bool {
        false
    }

    async fn resolve(&self, addr: &Multiaddr) -> Result<Vec<Multiaddr>, ResolverError> {
        Ok(vec![addr.clone()])
    }
}
