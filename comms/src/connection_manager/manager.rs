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

//! The connection manager actor: owns the table of live connections, applies the inbound accept
//! policy and forwards dial requests to the dial queue.

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::*;
use multiaddr::Multiaddr;
use swarmlink_shutdown::ShutdownSignal;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use super::{
    dial_queue::{DialOptions, DialQueueRequest, DialRequest},
    dial_state::DialReplyTx,
    dial_target::{DialKey, DialTarget},
    error::ConnectionManagerError,
    peer_connection::PeerConnection,
    rate_limit::HostRateLimiter,
};
use crate::{
    address_book::AddressBook,
    net_address::{
        default_address_sorter,
        host_key,
        matches_any_prefix,
        AddressSorter,
        DialAddress,
    },
    peer_id::PeerId,
};

const LOG_TARGET: &str = "comms::connection_manager::manager";

const EVENT_CHANNEL_SIZE: usize = 64;

/// Configuration shared by the connection manager, the dial queue and the satellites.
#[derive(Clone)]
pub struct ConnectionManagerConfig {
    /// Hard ceiling on the number of live connections. The pruner closes connections above it.
    pub max_connections: usize,
    /// Floor below which the auto dialer starts dialing known peers.
    pub min_connections: usize,
    /// Global cap on concurrent outbound dial attempts, across all peers.
    pub max_parallel_dials: usize,
    /// Cap on concurrent address attempts within a single dial.
    pub max_parallel_dials_per_peer: usize,
    /// Maximum addresses a single dial may attempt after resolution and filtering.
    pub max_peer_addrs_to_dial: usize,
    /// Deadline for a complete dial, covering resolution and every address attempt.
    pub dial_timeout: Duration,
    /// Deadline for the inbound upgrade (protection, encryption and muxer negotiation).
    pub inbound_upgrade_timeout: Duration,
    /// Maximum inbound connections that may be mid-upgrade at once.
    pub max_incoming_pending_connections: usize,
    /// Maximum inbound connections accepted per host per second.
    pub inbound_connection_threshold: usize,
    /// Address prefixes exempt from the inbound limits and protected from pruning.
    pub allow_list: Vec<Multiaddr>,
    /// Address prefixes that are never accepted.
    pub deny_list: Vec<Multiaddr>,
    /// Order in which candidate addresses are attempted.
    pub address_sorter: AddressSorter,
    /// How often the auto dialer checks the connection count against `min_connections`.
    pub auto_dial_interval: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 300,
            min_connections: 50,
            max_parallel_dials: 100,
            max_parallel_dials_per_peer: 10,
            max_peer_addrs_to_dial: 25,
            dial_timeout: Duration::from_secs(10),
            inbound_upgrade_timeout: Duration::from_secs(30),
            max_incoming_pending_connections: 10,
            inbound_connection_threshold: 5,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            address_sorter: default_address_sorter(),
            auto_dial_interval: Duration::from_secs(5),
        }
    }
}

/// Internal connection lifecycle notifications, produced by the upgrader and by peer connection
/// actors.
#[derive(Debug)]
pub enum ConnectionEvent {
    ConnectionOpened(PeerConnection),
    ConnectionClosed { peer_id: PeerId, connection_id: usize },
}

/// Public events broadcast by the connection manager. `PeerConnected` fires for every new
/// connection; `PeerDisconnected` fires once the last connection to a peer is gone.
#[derive(Debug, Clone)]
pub enum ConnectionManagerEvent {
    PeerConnected(PeerConnection),
    PeerDisconnected(PeerId),
}

/// Requests serviced by the connection manager actor.
#[derive(Debug)]
pub enum ConnectionManagerRequest {
    DialPeer {
        target: DialTarget,
        force: bool,
        reply: DialReplyTx,
    },
    CancelDial {
        key: DialKey,
        reply: oneshot::Sender<()>,
    },
    GetActiveConnection {
        peer_id: PeerId,
        reply: oneshot::Sender<Option<PeerConnection>>,
    },
    GetActiveConnections {
        reply: oneshot::Sender<Vec<PeerConnection>>,
    },
    GetNumConnections {
        reply: oneshot::Sender<usize>,
    },
    DisconnectPeer {
        peer_id: PeerId,
        reply: oneshot::Sender<()>,
    },
    AcceptInboundConnection {
        remote_addr: Multiaddr,
        reply: oneshot::Sender<bool>,
    },
    /// An accepted inbound connection has finished (or failed) its upgrade; its pending slot is
    /// released either way.
    InboundUpgradeComplete,
}

/// The connection manager actor.
pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    request_rx: mpsc::Receiver<ConnectionManagerRequest>,
    connection_events_rx: mpsc::Receiver<ConnectionEvent>,
    dial_queue_tx: mpsc::Sender<DialQueueRequest>,
    address_book: Arc<dyn AddressBook>,
    event_tx: broadcast::Sender<ConnectionManagerEvent>,
    connections: HashMap<PeerId, Vec<PeerConnection>>,
    pending_inbound: usize,
    rate_limiter: HostRateLimiter,
    shutdown_signal: ShutdownSignal,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionManagerConfig,
        request_rx: mpsc::Receiver<ConnectionManagerRequest>,
        connection_events_rx: mpsc::Receiver<ConnectionEvent>,
        dial_queue_tx: mpsc::Sender<DialQueueRequest>,
        address_book: Arc<dyn AddressBook>,
        event_tx: broadcast::Sender<ConnectionManagerEvent>,
        shutdown_signal: ShutdownSignal,
    ) -> Self {
        let rate_limiter = HostRateLimiter::new(config.inbound_connection_threshold);
        Self {
            config,
            request_rx,
            connection_events_rx,
            dial_queue_tx,
            address_book,
            event_tx,
            connections: HashMap::new(),
            pending_inbound: 0,
            rate_limiter,
            shutdown_signal,
        }
    }

    /// Create the broadcast channel for [ConnectionManagerEvent]s.
    pub fn create_event_channel() -> broadcast::Sender<ConnectionManagerEvent> {
        broadcast::channel(EVENT_CHANNEL_SIZE).0
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        debug!(target: LOG_TARGET, "Connection manager started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_signal.wait() => {
                    debug!(target: LOG_TARGET, "Connection manager shutting down");
                    break;
                },

                Some(event) = self.connection_events_rx.recv() => {
                    self.handle_connection_event(event).await;
                },

                Some(request) = self.request_rx.recv() => {
                    self.handle_request(request).await;
                },
            }
        }
        self.disconnect_all().await;
    }

    async fn handle_request(&mut self, request: ConnectionManagerRequest) {
        use ConnectionManagerRequest::*;
        match request {
            DialPeer { target, force, reply } => self.handle_dial(target, force, reply).await,
            CancelDial { key, reply } => {
                let request = DialQueueRequest::CancelDial { key, reply };
                if let Err(mpsc::error::SendError(DialQueueRequest::CancelDial { reply, .. })) =
                    self.dial_queue_tx.send(request).await
                {
                    let _result = reply.send(());
                }
            },
            GetActiveConnection { peer_id, reply } => {
                let conn = self
                    .connections
                    .get(&peer_id)
                    .and_then(|conns| conns.iter().find(|c| c.is_connected()))
                    .cloned();
                let _result = reply.send(conn);
            },
            GetActiveConnections { reply } => {
                let conns = self.connections.values().flatten().cloned().collect();
                let _result = reply.send(conns);
            },
            GetNumConnections { reply } => {
                let _result = reply.send(self.num_connections());
            },
            DisconnectPeer { peer_id, reply } => {
                let conns = self.connections.get(&peer_id).cloned().unwrap_or_default();
                tokio::spawn(async move {
                    for conn in conns {
                        if let Err(err) = conn.disconnect().await {
                            debug!(target: LOG_TARGET, "Error disconnecting {}: {}", conn, err);
                        }
                    }
                    let _result = reply.send(());
                });
            },
            AcceptInboundConnection { remote_addr, reply } => {
                let accept = self.check_accept_inbound(&remote_addr);
                if accept {
                    self.pending_inbound += 1;
                }
                let _result = reply.send(accept);
            },
            InboundUpgradeComplete => {
                self.pending_inbound = self.pending_inbound.saturating_sub(1);
            },
        }
    }

    async fn handle_dial(&mut self, target: DialTarget, force: bool, reply: DialReplyTx) {
        if !force {
            if let Some(peer_id) = target.peer_id() {
                let existing = self
                    .connections
                    .get(&peer_id)
                    .and_then(|conns| conns.iter().find(|c| c.is_connected()));
                if let Some(conn) = existing {
                    debug!(
                        target: LOG_TARGET,
                        "Already connected to peer '{}', reusing {}",
                        peer_id.short_str(),
                        conn
                    );
                    let _result = reply.send(Ok(conn.clone()));
                    return;
                }
            }
        }

        let request = DialQueueRequest::Dial(DialRequest {
            target,
            options: DialOptions::default(),
            reply,
        });
        if let Err(mpsc::error::SendError(DialQueueRequest::Dial(request))) = self.dial_queue_tx.send(request).await
        {
            let _result = request.reply.send(Err(ConnectionManagerError::SendToActorFailed));
        }
    }

    /// Apply the inbound accept policy. Checked in order: deny list, allow list, pending inbound
    /// limit, per-host rate limit, connection ceiling.
    fn check_accept_inbound(&mut self, remote_addr: &Multiaddr) -> bool {
        if matches_any_prefix(remote_addr, &self.config.deny_list) {
            debug!(target: LOG_TARGET, "Denied inbound connection from '{}' (deny list)", remote_addr);
            return false;
        }

        // Allow-listed hosts bypass the remaining limits entirely
        if matches_any_prefix(remote_addr, &self.config.allow_list) {
            return true;
        }

        if self.pending_inbound >= self.config.max_incoming_pending_connections {
            debug!(
                target: LOG_TARGET,
                "Denied inbound connection from '{}': {} connections already mid-upgrade",
                remote_addr,
                self.pending_inbound
            );
            return false;
        }

        // Rate limiting applies to thin-waist addresses only; relayed connections have already
        // been policed by the relay
        if let Some(host) = host_key(remote_addr) {
            if !self.rate_limiter.check(host) {
                debug!(
                    target: LOG_TARGET,
                    "Denied inbound connection from '{}': host rate limit exceeded", remote_addr
                );
                return false;
            }
        }

        if self.num_connections() >= self.config.max_connections {
            debug!(
                target: LOG_TARGET,
                "Denied inbound connection from '{}': connection ceiling reached", remote_addr
            );
            return false;
        }

        true
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::ConnectionOpened(conn) => {
                let peer_id = conn.peer_id();
                debug!(target: LOG_TARGET, "Connection opened: {}", conn);
                self.connections.entry(peer_id).or_default().push(conn.clone());

                let address = conn.address().clone();
                log_if_error!(
                    target: LOG_TARGET,
                    self.address_book.merge(&peer_id, vec![DialAddress::new(address)]).await,
                    "Failed to record address for connected peer: {}",
                );

                let _result = self.event_tx.send(ConnectionManagerEvent::PeerConnected(conn));
            },
            ConnectionEvent::ConnectionClosed { peer_id, connection_id } => {
                let mut last_closed = false;
                if let Some(conns) = self.connections.get_mut(&peer_id) {
                    conns.retain(|c| c.id() != connection_id);
                    if conns.is_empty() {
                        self.connections.remove(&peer_id);
                        last_closed = true;
                    }
                }
                debug!(
                    target: LOG_TARGET,
                    "Connection #{} to peer '{}' closed",
                    connection_id,
                    peer_id.short_str()
                );
                if last_closed {
                    let _result = self.event_tx.send(ConnectionManagerEvent::PeerDisconnected(peer_id));
                }
            },
        }
    }

    fn num_connections(&self) -> usize {
        self.connections.values().map(Vec::len).sum()
    }

    async fn disconnect_all(&mut self) {
        for conns in self.connections.values() {
            for conn in conns {
                if let Err(err) = conn.disconnect().await {
                    debug!(target: LOG_TARGET, "Error disconnecting {}: {}", conn, err);
                }
            }
        }
        self.connections.clear();
    }
}
