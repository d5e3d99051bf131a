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

use std::sync::Arc;

use log::*;
use swarmlink_shutdown::ShutdownSignal;
use tokio::{sync::broadcast, task::JoinHandle};

use super::{
    manager::{ConnectionManagerConfig, ConnectionManagerEvent},
    requester::ConnectionManagerRequester,
};
use crate::{
    address_book::{AddressBook, KEEP_ALIVE_TAG},
    net_address::matches_any_prefix,
};

const LOG_TARGET: &str = "comms::connection_manager::pruner";

/// Closes surplus connections whenever the total rises above the configured ceiling.
/// Allow-listed addresses and keep-alive tagged peers are never pruned; among the rest the
/// oldest connections are closed first.
pub struct ConnectionPruner {
    config: ConnectionManagerConfig,
    requester: ConnectionManagerRequester,
    address_book: Arc<dyn AddressBook>,
    shutdown_signal: ShutdownSignal,
}

impl ConnectionPruner {
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
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_signal.wait() => break,

                event = events.recv() => match event {
                    Ok(ConnectionManagerEvent::PeerConnected(_)) => self.maybe_prune().await,
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(target: LOG_TARGET, "Event subscription lagged by {} events", n);
                        self.maybe_prune().await;
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn maybe_prune(&self) {
        let connections = match self.requester.get_active_connections().await {
            Ok(conns) => conns,
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to list connections: {}", err);
                return;
            },
        };
        if connections.len() <= self.config.max_connections {
            return;
        }
        let excess = connections.len() - self.config.max_connections;

        let mut candidates = Vec::new();
        for conn in connections {
            if matches_any_prefix(conn.address(), &self.config.allow_list) {
                continue;
            }
            match self.address_book.has_tag(&conn.peer_id(), KEEP_ALIVE_TAG).await {
                Ok(true) => continue,
                Ok(false) => {},
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        "Failed to read tags for '{}': {}",
                        conn.peer_id(),
                        err
                    );
                },
            }
            candidates.push(conn);
        }

        // Oldest connections go first
        candidates.sort_by_key(|conn| std::cmp::Reverse(conn.age()));
        for conn in candidates.into_iter().take(excess) {
            debug!(target: LOG_TARGET, "Pruning {}", conn);
            if let Err(err) = conn.disconnect().await {
                debug!(target: LOG_TARGET, "Error pruning {}: {}", conn, err);
            }
        }
    }
}
