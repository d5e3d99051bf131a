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
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{
    dial_target::{DialKey, DialTarget},
    error::ConnectionManagerError,
    manager::{ConnectionManagerEvent, ConnectionManagerRequest},
    peer_connection::PeerConnection,
};
use crate::peer_id::PeerId;

/// Clonable handle to the connection manager actor.
#[derive(Clone)]
pub struct ConnectionManagerRequester {
    sender: mpsc::Sender<ConnectionManagerRequest>,
    event_tx: broadcast::Sender<ConnectionManagerEvent>,
}

impl ConnectionManagerRequester {
    pub fn new(
        sender: mpsc::Sender<ConnectionManagerRequest>,
        event_tx: broadcast::Sender<ConnectionManagerEvent>,
    ) -> Self {
        Self { sender, event_tx }
    }

    /// Subscribe to connection manager events.
    pub fn get_event_subscription(&self) -> broadcast::Receiver<ConnectionManagerEvent> {
        self.event_tx.subscribe()
    }

    /// Dial the given target, reusing an existing connection to the same peer if one is live.
    pub async fn dial_peer(&self, target: impl Into<DialTarget>) -> Result<PeerConnection, ConnectionManagerError> {
        self.dial(target.into(), false).await
    }

    /// Dial the given target even when a connection to the same peer already exists.
    pub async fn dial_peer_forced(
        &self,
        target: impl Into<DialTarget>,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        self.dial(target.into(), true).await
    }

    async fn dial(&self, target: DialTarget, force: bool) -> Result<PeerConnection, ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::DialPeer { target, force, reply })
            .await?;
        reply_rx
            .await
            .map_err(|_| ConnectionManagerError::ActorRequestCanceled)?
    }

    /// Cancel an in-flight dial to the given peer. All callers waiting on the dial receive
    /// [ConnectionManagerError::DialCancelled]. A no-op when no dial is in flight.
    pub async fn cancel_dial(&self, peer_id: PeerId) -> Result<(), ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::CancelDial {
            key: DialKey::Peer(peer_id),
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| ConnectionManagerError::ActorRequestCanceled)
    }

    /// An active connection to the peer, if any.
    pub async fn get_active_connection(
        &self,
        peer_id: PeerId,
    ) -> Result<Option<PeerConnection>, ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::GetActiveConnection { peer_id, reply })
            .await?;
        reply_rx.await.map_err(|_| ConnectionManagerError::ActorRequestCanceled)
    }

    pub async fn get_active_connections(&self) -> Result<Vec<PeerConnection>, ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::GetActiveConnections { reply })
            .await?;
        reply_rx.await.map_err(|_| ConnectionManagerError::ActorRequestCanceled)
    }

    pub async fn get_num_connections(&self) -> Result<usize, ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::GetNumConnections { reply })
            .await?;
        reply_rx.await.map_err(|_| ConnectionManagerError::ActorRequestCanceled)
    }

    /// Close all connections to the peer. Resolves once every connection has acknowledged the
    /// disconnect.
    pub async fn disconnect_peer(&self, peer_id: PeerId) -> Result<(), ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::DisconnectPeer { peer_id, reply })
            .await?;
        reply_rx.await.map_err(|_| ConnectionManagerError::ActorRequestCanceled)
    }

    /// Ask the accept policy whether an inbound connection from the given address may proceed to
    /// the upgrade. An accepted connection holds a pending slot until
    /// [Self::inbound_upgrade_complete] is called.
    pub async fn accept_inbound_connection(&self, remote_addr: Multiaddr) -> Result<bool, ConnectionManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ConnectionManagerRequest::AcceptInboundConnection { remote_addr, reply })
            .await?;
        reply_rx.await.map_err(|_| ConnectionManagerError::ActorRequestCanceled)
    }

    /// Release the pending slot held by an accepted inbound connection. Must be called whether
    /// the upgrade succeeded or failed.
    pub async fn inbound_upgrade_complete(&self) -> Result<(), ConnectionManagerError> {
        self.send(ConnectionManagerRequest::InboundUpgradeComplete).await
    }

    async fn send(&self, request: ConnectionManagerRequest) -> Result<(), ConnectionManagerError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| ConnectionManagerError::SendToActorFailed)
    }
}
