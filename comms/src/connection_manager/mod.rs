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

//! Connection lifecycle management: dialing, inbound accept policy, the live connection table
//! and the satellite policies that keep the connection count between its floor and ceiling.

mod auto_dial;
pub use auto_dial::AutoDialer;

mod dial_queue;
pub use dial_queue::{DialOptions, DialPriority, DialQueue, DialQueueRequest, DialRequest};

mod dial_state;

mod dial_target;
pub use dial_target::{DialKey, DialTarget};

mod direction;
pub use direction::ConnectionDirection;

mod error;
pub use error::{ConnectionManagerError, PeerConnectionError};

mod listener;
pub use listener::PeerListener;

mod manager;
pub use manager::{
    ConnectionEvent,
    ConnectionManager,
    ConnectionManagerConfig,
    ConnectionManagerEvent,
    ConnectionManagerRequest,
};

mod peer_connection;
pub use peer_connection::{NegotiatedSubstream, PeerConnection, PeerConnectionRequest};

mod pruner;
pub use pruner::ConnectionPruner;

mod rate_limit;

mod requester;
pub use requester::ConnectionManagerRequester;
