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

use multiaddr::Multiaddr;

use crate::peer_id::PeerId;

/// Pluggable policy with veto power at each stage of the connection lifecycle. Every hook
/// defaults to "allow"; returning `true` from a hook aborts the corresponding operation.
///
/// The dial-stage hooks are consulted before any network I/O. The encrypted/upgraded hooks run
/// after the remote peer has authenticated, so they receive the verified peer id.
pub trait ConnectionGater: Send + Sync {
    fn deny_dial_peer(&self, _peer_id: &PeerId) -> bool {
        false
    }

    fn deny_dial_multiaddr(&self, _addr: &Multiaddr) -> bool {
        false
    }

    fn deny_inbound_connection(&self, _remote_addr: &Multiaddr) -> bool {
        false
    }

    fn deny_outbound_connection(&self, _peer_id: Option<&PeerId>, _addr: &Multiaddr) -> bool {
        false
    }

    fn deny_inbound_encrypted(&self, _peer_id: &PeerId) -> bool {
        false
    }

    fn deny_outbound_encrypted(&self, _peer_id: &PeerId) -> bool {
        false
    }

    fn deny_inbound_upgraded(&self, _peer_id: &PeerId) -> bool {
        false
    }

    fn deny_outbound_upgraded(&self, _peer_id: &PeerId) -> bool {
        false
    }
}

/// The default gater. Permits everything.
#[derive(Debug, Clone, Default)]
pub struct AllowAllGater;

impl ConnectionGater for AllowAllGater {}
