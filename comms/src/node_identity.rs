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

use std::fmt;

use crate::{noise::NOISE_PARAMETER, peer_id::PeerId};

/// The identity of the local node: a static X25519 keypair used for the encryption handshake and
/// the [PeerId] derived from its public half.
///
/// Shared between components via `Arc<NodeIdentity>`.
pub struct NodeIdentity {
    secret_key: Vec<u8>,
    public_key: Vec<u8>,
    peer_id: PeerId,
}

impl NodeIdentity {
    /// Generate a fresh random identity.
    pub fn random() -> Result<Self, snow::Error> {
        let params = NOISE_PARAMETER.parse().expect("Invalid noise parameters");
        let keypair = snow::Builder::new(params).generate_keypair()?;
        Ok(Self::from_keypair(keypair.private, keypair.public))
    }

    pub fn from_keypair(secret_key: Vec<u8>, public_key: Vec<u8>) -> Self {
        let peer_id = PeerId::from_public_key(&public_key);
        Self {
            secret_key,
            public_key,
            peer_id,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub(crate) fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The secret key is deliberately not rendered
        f.debug_struct("NodeIdentity").field("peer_id", &self.peer_id).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peer_id_matches_public_key() {
        let identity = NodeIdentity::random().unwrap();
        assert_eq!(*identity.peer_id(), PeerId::from_public_key(identity.public_key()));
    }

    #[test]
    fn identities_are_unique() {
        let a = NodeIdentity::random().unwrap();
        let b = NodeIdentity::random().unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
    }
}
