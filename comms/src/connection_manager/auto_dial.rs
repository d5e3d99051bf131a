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

use std::{collections::HashSet, sync::Arc};

use log::*;
use swarmlink_shutdown::ShutdownSignal;
use tokio::{sync::broadcast, task::JoinHandle, time};

use super::{
    manager::{ConnectionManagerConfig, ConnectionManagerEvent},
    requester::ConnectionManagerRequester,
};
use crate::address_book::{AddressBook, KEEP_ALIVE_TAG};

const LOG_TARGET: &str = "comms::connection_manager::auto_dial";

/// Dials known peers whenever the connection count falls below the configured floor. Peers
/// tagged keep-alive are dialed first.
pub struct AutoDialer {
    config: ConnectionManagerConfig,
    requester: ConnectionManagerRequester,
    address_book: Arc<dyn AddressBook>,
    shutdown_signal: ShutdownSignal,
}

impl AutoDialer {
    pub fn new(
        config: ConnectionManagerConfig,
        requester: ConnectionManagerRequester,
        address_book: Arc<dyn AddressBook>,
        shutdown_signal: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            requester,
            address_book,
            shutdown_signal,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut events = self.requester.get_event_subscription();
        let mut interval = time::interval(self.config.auto_dial_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_signal.wait() => break,

                event = events.recv() => match event {
                    Ok(ConnectionManagerEvent::PeerDisconnected(_)) => self.maybe_dial().await,
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(target: LOG_TARGET, "Event subscription lagged by {} events", n);
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                _ = interval.tick() => self.maybe_dial().await,
            }
        }
    }

    async fn maybe_dial(&self) {
        let num_connections = match self.requester.get_num_connections().await {
            Ok(n) => n,
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to query connection count: {}", err);
                return;
            },
        };
        if num_connections >= self.config.min_connections {
            return;
        }
        let mut deficit = self.config.min_connections - num_connections;

        let connected = match self.requester.get_active_connections().await {
            Ok(conns) => conns.iter().map(|c| c.peer_id()).collect::<HashSet<_>>(),
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to list connections: {}", err);
                return;
            },
        };

        let known_peers = match self.address_book.all().await {
            Ok(peers) => peers,
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to list known peers: {}", err);
                return;
            },
        };

        let mut keep_alive = Vec::new();
        let mut others = Vec::new();
        for (peer_id, addresses) in known_peers {
            if addresses.is_empty() || connected.contains(&peer_id) {
                continue;
            }
            match self.address_book.has_tag(&peer_id, KEEP_ALIVE_TAG).await {
                Ok(true) => keep_alive.push(peer_id),
                Ok(false) => others.push(peer_id),
                Err(err) => {
                    warn!(target: LOG_TARGET, "Failed to read tags for '{}': {}", peer_id, err);
                    others.push(peer_id);
                },
            }
        }

        for peer_id in keep_alive.into_iter().chain(others) {
            if deficit == 0 {
                break;
            }
            deficit -= 1;
            debug!(target: LOG_TARGET, "Auto-dialing peer '{}'", peer_id.short_str());
            let requester = self.requester.clone();
            tokio::spawn(async move {
                if let Err(err) = requester.dial_peer(peer_id).await {
                    debug!(
                        target: LOG_TARGET,
                        "Auto-dial to '{}' failed: {}",
                        peer_id.short_str(),
                        err
                    );
                }
            });
        }
    }
}
