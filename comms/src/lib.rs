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

//! # Swarmlink
//!
//! The connection lifecycle core of the swarmlink peer-to-peer stack. Turns "connect to peer X"
//! or "accept this inbound socket" into a fully negotiated, encrypted, multiplexed
//! [PeerConnection](connection_manager::PeerConnection) while enforcing global resource limits
//! and address-level policy.
//!
//! The three main components:
//!
//! - [`DialQueue`](connection_manager::DialQueue) resolves dial targets, races candidate
//!   addresses, de-duplicates concurrent dials and enforces dial concurrency limits.
//! - [`ConnectionManager`](connection_manager::ConnectionManager) owns the table of live
//!   connections, gates inbound sockets and maintains the connection floor and ceiling.
//! - [`Upgrader`](upgrader::Upgrader) performs the staged upgrade of a raw byte stream into a
//!   secured, multiplexed connection.

#[macro_use]
mod macros;

pub mod address_book;
pub mod connection_manager;
pub mod gater;
pub mod multiplexing;
pub mod net_address;
pub mod node_identity;
pub mod noise;
pub mod peer_id;
pub mod protocol;
pub mod resolver;
pub mod test_utils;
pub mod transport;
pub mod upgrader;

pub use multiaddr::{Multiaddr, Protocol};

pub use crate::{
    connection_manager::{
        ConnectionDirection,
        ConnectionManager,
        ConnectionManagerConfig,
        ConnectionManagerError,
        ConnectionManagerEvent,
        ConnectionManagerRequester,
        DialQueue,
        DialTarget,
        PeerConnection,
    },
    node_identity::NodeIdentity,
    peer_id::PeerId,
    upgrader::Upgrader,
};
