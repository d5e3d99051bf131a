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

//! Turns a raw socket into a [PeerConnection]: optional pre-shared key protection, negotiated
//! encryption, negotiated stream multiplexing and finally the connection actor.

mod protector;
pub use protector::{ProtectedSocket, Protector, PSK_LEN};

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::*;
use multiaddr::Multiaddr;
use tokio::{sync::mpsc, time};

use crate::{
    connection_manager::{ConnectionDirection, ConnectionEvent, ConnectionManagerError, PeerConnection},
    gater::ConnectionGater,
    multiplexing::{Muxer, MuxerFactory, YamuxFactory},
    net_address::extract_peer_id,
    node_identity::NodeIdentity,
    noise::{NoiseConfig, NOISE_PROTOCOL_ID},
    peer_id::PeerId,
    protocol::{ProtocolId, ProtocolNegotiation, Protocols},
    transport::BoxedSocket,
};

const LOG_TARGET: &str = "comms::upgrader";

/// Authenticates the remote and encrypts the socket once its protocol id has won negotiation.
#[async_trait]
pub trait Encrypter: Send + Sync {
    fn protocol_id(&self) -> ProtocolId;

    async fn upgrade(
        &self,
        socket: BoxedSocket,
        direction: ConnectionDirection,
    ) -> io::Result<(PeerId, BoxedSocket)>;
}

/// The default [Encrypter], backed by the noise IX handshake.
pub struct NoiseEncrypter {
    config: NoiseConfig,
}

impl NoiseEncrypter {
    pub fn new(node_identity: Arc<NodeIdentity>) -> Self {
        Self {
            config: NoiseConfig::new(node_identity),
        }
    }
}

#[async_trait]
impl Encrypter for NoiseEncrypter {
    fn protocol_id(&self) -> ProtocolId {
        ProtocolId::from_static(NOISE_PROTOCOL_ID)
    }

    async fn upgrade(
        &self,
        socket: BoxedSocket,
        direction: ConnectionDirection,
    ) -> io::Result<(PeerId, BoxedSocket)> {
        let (peer_id, socket) = self
            .config
            .upgrade_socket(socket, direction)
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok((peer_id, Box::new(socket)))
    }
}

/// Per-upgrade overrides.
#[derive(Clone, Default)]
pub struct UpgradeOptions {
    /// Skip the pre-shared key layer even when the upgrader carries one.
    pub skip_protection: bool,
    /// Use this muxer factory directly instead of negotiating one, for transports that
    /// multiplex natively.
    pub muxer_factory: Option<Arc<dyn MuxerFactory>>,
}

/// Runs the upgrade pipeline on raw sockets and emits [ConnectionEvent::ConnectionOpened] for
/// every connection it produces.
pub struct Upgrader {
    encrypters: Vec<Arc<dyn Encrypter>>,
    muxers: Vec<Arc<dyn MuxerFactory>>,
    protector: Option<Protector>,
    gater: Arc<dyn ConnectionGater>,
    protocols: Protocols,
    event_tx: mpsc::Sender<ConnectionEvent>,
    inbound_upgrade_timeout: Duration,
}

impl Upgrader {
    pub fn new(
        node_identity: Arc<NodeIdentity>,
        gater: Arc<dyn ConnectionGater>,
        protocols: Protocols,
        event_tx: mpsc::Sender<ConnectionEvent>,
        inbound_upgrade_timeout: Duration,
    ) -> Self {
        Self {
            encrypters: vec![Arc::new(NoiseEncrypter::new(node_identity))],
            muxers: vec![Arc::new(YamuxFactory::new())],
            protector: None,
            gater,
            protocols,
            event_tx,
            inbound_upgrade_timeout,
        }
    }

    /// Enable the pre-shared key layer. All subsequent upgrades require the remote to hold the
    /// same key.
    pub fn set_protector(&mut self, protector: Protector) -> &mut Self {
        self.protector = Some(protector);
        self
    }

    /// Replace the encrypter set. Order is the proposal preference order.
    pub fn set_encrypters(&mut self, encrypters: Vec<Arc<dyn Encrypter>>) -> &mut Self {
        self.encrypters = encrypters;
        self
    }

    /// Replace the muxer factory set. Order is the proposal preference order.
    pub fn set_muxers(&mut self, muxers: Vec<Arc<dyn MuxerFactory>>) -> &mut Self {
        self.muxers = muxers;
        self
    }

    /// Upgrade an outbound socket. `expected_peer` (or a peer id embedded in the address) must
    /// match the authenticated identity of the remote.
    pub async fn upgrade_outbound(
        &self,
        socket: BoxedSocket,
        address: Multiaddr,
        expected_peer: Option<PeerId>,
        options: UpgradeOptions,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        let expected_peer = expected_peer.or_else(|| extract_peer_id(&address));
        if self.gater.deny_outbound_connection(expected_peer.as_ref(), &address) {
            return Err(ConnectionManagerError::DialDenied);
        }
        self.upgrade(socket, address, ConnectionDirection::Outbound, expected_peer, options)
            .await
    }

    /// Upgrade an inbound socket, bounded by the inbound upgrade timeout.
    pub async fn upgrade_inbound(
        &self,
        socket: BoxedSocket,
        remote_addr: Multiaddr,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        time::timeout(self.inbound_upgrade_timeout, self.upgrade_inbound_inner(socket, remote_addr))
            .await
            .map_err(|_| ConnectionManagerError::Timeout)?
    }

    async fn upgrade_inbound_inner(
        &self,
        socket: BoxedSocket,
        remote_addr: Multiaddr,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        if self.gater.deny_inbound_connection(&remote_addr) {
            return Err(ConnectionManagerError::DialDenied);
        }
        self.upgrade(
            socket,
            remote_addr,
            ConnectionDirection::Inbound,
            None,
            Default::default(),
        )
        .await
    }

    #[tracing::instrument(name = "upgrader::upgrade", skip_all, fields(address = %address, direction = %direction))]
    async fn upgrade(
        &self,
        mut socket: BoxedSocket,
        address: Multiaddr,
        direction: ConnectionDirection,
        expected_peer: Option<PeerId>,
        options: UpgradeOptions,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        if !options.skip_protection {
            if let Some(protector) = &self.protector {
                socket = Box::new(
                    protector
                        .protect(socket)
                        .await
                        .map_err(|err| ConnectionManagerError::EncryptionFailed(err.to_string()))?,
                );
            }
        }

        let (peer_id, socket) = self.encrypt(socket, direction).await?;

        if let Some(expected) = expected_peer {
            if expected != peer_id {
                return Err(ConnectionManagerError::PeerMismatch {
                    expected,
                    authenticated: peer_id,
                });
            }
        }
        let denied = match direction {
            ConnectionDirection::Inbound => self.gater.deny_inbound_encrypted(&peer_id),
            ConnectionDirection::Outbound => self.gater.deny_outbound_encrypted(&peer_id),
        };
        if denied {
            return Err(ConnectionManagerError::DialDenied);
        }

        let muxer = self.multiplex(socket, direction, options.muxer_factory).await?;

        let denied = match direction {
            ConnectionDirection::Inbound => self.gater.deny_inbound_upgraded(&peer_id),
            ConnectionDirection::Outbound => self.gater.deny_outbound_upgraded(&peer_id),
        };
        if denied {
            return Err(ConnectionManagerError::DialDenied);
        }

        let conn = PeerConnection::create(
            peer_id,
            address,
            direction,
            muxer,
            self.protocols.clone(),
            self.event_tx.clone(),
        );
        debug!(target: LOG_TARGET, "Upgrade complete: {}", conn);

        // The opened notification is delivered before the connection is handed to the caller
        self.event_tx
            .send(ConnectionEvent::ConnectionOpened(conn.clone()))
            .await
            .map_err(|_| ConnectionManagerError::SendToActorFailed)?;

        Ok(conn)
    }

    async fn encrypt(
        &self,
        mut socket: BoxedSocket,
        direction: ConnectionDirection,
    ) -> Result<(PeerId, BoxedSocket), ConnectionManagerError> {
        let ids = self.encrypters.iter().map(|e| e.protocol_id()).collect::<Vec<_>>();
        let selected = self
            .negotiate(&mut socket, direction, &ids)
            .await
            .map_err(|err| ConnectionManagerError::EncryptionFailed(err.to_string()))?;
        let encrypter = self
            .encrypters
            .iter()
            .find(|e| e.protocol_id() == selected)
            .ok_or_else(|| {
                ConnectionManagerError::EncryptionFailed(format!(
                    "negotiated unknown encryption protocol '{}'",
                    String::from_utf8_lossy(&selected)
                ))
            })?;
        encrypter
            .upgrade(socket, direction)
            .await
            .map_err(|err| ConnectionManagerError::EncryptionFailed(err.to_string()))
    }

    async fn multiplex(
        &self,
        mut socket: BoxedSocket,
        direction: ConnectionDirection,
        supplied: Option<Arc<dyn MuxerFactory>>,
    ) -> Result<Muxer, ConnectionManagerError> {
        let factory = match supplied {
            Some(factory) => factory,
            None => {
                let ids = self.muxers.iter().map(|m| m.protocol_id()).collect::<Vec<_>>();
                let selected = self
                    .negotiate(&mut socket, direction, &ids)
                    .await
                    .map_err(|err| ConnectionManagerError::MuxerUnavailable(err.to_string()))?;
                self.muxers
                    .iter()
                    .find(|m| m.protocol_id() == selected)
                    .cloned()
                    .ok_or_else(|| {
                        ConnectionManagerError::MuxerUnavailable(format!(
                            "negotiated unknown muxer protocol '{}'",
                            String::from_utf8_lossy(&selected)
                        ))
                    })?
            },
        };
        factory
            .upgrade(socket, direction)
            .await
            .map_err(|err| ConnectionManagerError::MuxerUnavailable(err.to_string()))
    }

    async fn negotiate(
        &self,
        socket: &mut BoxedSocket,
        direction: ConnectionDirection,
        ids: &[ProtocolId],
    ) -> Result<ProtocolId, crate::protocol::ProtocolError> {
        let mut negotiation = ProtocolNegotiation::new(socket);
        match direction {
            ConnectionDirection::Outbound => negotiation.propose(ids).await,
            ConnectionDirection::Inbound => negotiation.respond(ids).await,
        }
    }
}
