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

use thiserror::Error;
use tokio::sync::mpsc;

use super::{direction::ConnectionDirection, peer_connection::PeerConnectionRequest};
use crate::{peer_id::PeerId, protocol::ProtocolError};

/// Errors produced while establishing a connection. Clonable so that a single dial outcome can
/// be fanned out to every caller that joined the dial.
#[derive(Debug, Error, Clone)]
pub enum ConnectionManagerError {
    #[error("Attempted to dial this node's own peer id")]
    DialedSelf,
    #[error("No valid addresses remained after resolution and filtering")]
    NoValidAddresses,
    #[error("Refusing to dial {given} addresses (maximum is {max})")]
    TooManyAddresses { given: usize, max: usize },
    #[error("The operation timed out")]
    Timeout,
    #[error("The dial was denied by connection gating")]
    DialDenied,
    #[error("Authenticated peer id '{authenticated}' did not match the expected peer id '{expected}'")]
    PeerMismatch { expected: PeerId, authenticated: PeerId },
    #[error("No dial tokens are available")]
    NoDialTokens,
    #[error("The dial was cancelled")]
    DialCancelled,
    #[error("All dial attempts failed: {0:?}")]
    AllAddressesFailed(Vec<String>),
    #[error("Invalid dial target: {0}")]
    InvalidDialTarget(String),
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Encryption upgrade failed: {0}")]
    EncryptionFailed(String),
    #[error("No mutually supported stream multiplexer: {0}")]
    MuxerUnavailable(String),
    #[error("Failed to send request to the connection manager actor")]
    SendToActorFailed,
    #[error("The connection manager actor dropped the reply channel")]
    ActorRequestCanceled,
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),
    #[error("Address book error: {0}")]
    AddressBookError(String),
}

/// Errors produced on a live connection after the upgrade has completed.
#[derive(Debug, Error)]
pub enum PeerConnectionError {
    #[error("Yamux error: {0}")]
    YamuxError(#[from] std::io::Error),
    #[error("The peer connection actor dropped the reply channel")]
    InternalReplyCancelled,
    #[error("Failed to send request to the peer connection actor")]
    InternalRequestSendFailed(#[from] mpsc::error::SendError<PeerConnectionRequest>),
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),
    #[error("Stream limit reached for protocol '{protocol}' ({direction})")]
    TooManyStreams {
        protocol: String,
        direction: ConnectionDirection,
    },
    #[error("The connection is closed")]
    ConnectionClosed,
}
