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

//! The dial queue actor. Coalesces concurrent dials to the same target, runs the address
//! pipeline (resolution, filtering, de-duplication, gating, sorting) and races the surviving
//! addresses for the first successful upgrade.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use futures::{stream, FutureExt, StreamExt};
use log::*;
use swarmlink_shutdown::{AnySignal, ShutdownSignal};
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::JoinHandle,
    time,
};

use super::{
    dial_state::{DialReplyTx, PendingDial},
    dial_target::{DialKey, DialTarget},
    error::ConnectionManagerError,
    manager::ConnectionManagerConfig,
    peer_connection::PeerConnection,
};
use crate::{
    address_book::AddressBook,
    gater::ConnectionGater,
    net_address::{dedup_addresses, with_peer_id, DialAddress},
    node_identity::NodeIdentity,
    peer_id::PeerId,
    resolver::AddressResolver,
    transport::TransportRegistry,
    upgrader::Upgrader,
};

const LOG_TARGET: &str = "comms::connection_manager::dial_queue";

const COMPLETED_CHANNEL_SIZE: usize = 32;
const MAX_RESOLVE_DEPTH: usize = 8;

/// Requests serviced by the dial queue actor.
pub enum DialQueueRequest {
    Dial(DialRequest),
    CancelDial {
        key: DialKey,
        reply: oneshot::Sender<()>,
    },
    NumPendingDials(oneshot::Sender<usize>),
}

pub struct DialRequest {
    pub target: DialTarget,
    pub options: DialOptions,
    pub reply: DialReplyTx,
}

#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Cancels this dial when triggered, in addition to the queue-wide shutdown.
    pub cancel_signal: Option<ShutdownSignal>,
    /// Relative urgency of this dial.
    pub priority: DialPriority,
}

/// Urgency of a dial. Normal priority address attempts wait for a global dial token; high
/// priority attempts skip the token wait and are bounded only by the dial timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DialPriority {
    #[default]
    Normal,
    High,
}

struct DialCompleted {
    key: DialKey,
    result: Result<PeerConnection, ConnectionManagerError>,
}

/// The dial queue actor.
pub struct DialQueue {
    request_rx: mpsc::Receiver<DialQueueRequest>,
    completed_tx: mpsc::Sender<DialCompleted>,
    completed_rx: mpsc::Receiver<DialCompleted>,
    pending: HashMap<DialKey, PendingDial>,
    dialer: Dialer,
    shutdown_signal: ShutdownSignal,
}

impl DialQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConnectionManagerConfig,
        node_identity: Arc<NodeIdentity>,
        request_rx: mpsc::Receiver<DialQueueRequest>,
        address_book: Arc<dyn AddressBook>,
        resolvers: Vec<Arc<dyn AddressResolver>>,
        transports: TransportRegistry,
        gater: Arc<dyn ConnectionGater>,
        upgrader: Arc<Upgrader>,
        shutdown_signal: ShutdownSignal,
    ) -> Self {
        let (completed_tx, completed_rx) = mpsc::channel(COMPLETED_CHANNEL_SIZE);
        let dial_tokens = Arc::new(Semaphore::new(config.max_parallel_dials));
        Self {
            request_rx,
            completed_tx,
            completed_rx,
            pending: HashMap::new(),
            dialer: Dialer {
                config,
                node_identity,
                address_book,
                resolvers,
                transports,
                gater,
                upgrader,
                dial_tokens,
            },
            shutdown_signal,
        }
    }

    /// The semaphore backing the global dial concurrency limit. One permit is held for the
    /// duration of each normal priority address attempt.
    pub fn dial_tokens(&self) -> Arc<Semaphore> {
        self.dialer.dial_tokens.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        debug!(target: LOG_TARGET, "Dial queue started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_signal.wait() => {
                    debug!(target: LOG_TARGET, "Dial queue shutting down");
                    break;
                },

                Some(completed) = self.completed_rx.recv() => {
                    self.handle_completed(completed);
                },

                Some(request) = self.request_rx.recv() => {
                    self.handle_request(request);
                },
            }
        }

        for (_, pending) in self.pending.drain() {
            pending.abort(ConnectionManagerError::DialCancelled);
        }
    }

    fn handle_request(&mut self, request: DialQueueRequest) {
        use DialQueueRequest::{CancelDial, Dial, NumPendingDials};
        match request {
            Dial(DialRequest { target, options, reply }) => self.handle_dial(target, options, reply),
            CancelDial { key, reply } => {
                if let Some(pending) = self.pending.remove(&key) {
                    debug!(
                        target: LOG_TARGET,
                        "Cancelling in-flight dial ({} waiter(s))",
                        pending.num_waiters()
                    );
                    pending.abort(ConnectionManagerError::DialCancelled);
                }
                let _result = reply.send(());
            },
            NumPendingDials(reply) => {
                let _result = reply.send(self.pending.len());
            },
        }
    }

    fn handle_dial(&mut self, target: DialTarget, options: DialOptions, reply: DialReplyTx) {
        let key = target.dial_key();
        if let Some(pending) = self.pending.get_mut(&key) {
            debug!(target: LOG_TARGET, "Dial to {} already in flight, joining", target);
            pending.add_waiter(reply);
            return;
        }

        debug!(target: LOG_TARGET, "Dialing {}", target);
        let pending = PendingDial::new(reply);
        let cancel = AnySignal::new()
            .with(self.shutdown_signal.clone())
            .with(pending.cancel().to_signal())
            .with_optional(options.cancel_signal);
        self.pending.insert(key.clone(), pending);

        let dialer = self.dialer.clone();
        let completed_tx = self.completed_tx.clone();
        tokio::spawn(async move {
            let result = dialer.perform_dial(target, options.priority, cancel).await;
            let _result = completed_tx.send(DialCompleted { key, result }).await;
        });
    }

    fn handle_completed(&mut self, completed: DialCompleted) {
        match self.pending.remove(&completed.key) {
            Some(pending) => pending.complete(completed.result),
            None => {
                // The dial was cancelled while the attempt was completing; a connection that won
                // the race anyway is surplus
                if let Ok(conn) = completed.result {
                    debug!(target: LOG_TARGET, "Closing connection from cancelled dial: {}", conn);
                    tokio::spawn(async move {
                        let _result = conn.disconnect().await;
                    });
                }
            },
        }
    }
}

/// Everything needed to carry out one dial, clonable into the attempt task.
#[derive(Clone)]
struct Dialer {
    config: ConnectionManagerConfig,
    node_identity: Arc<NodeIdentity>,
    address_book: Arc<dyn AddressBook>,
    resolvers: Vec<Arc<dyn AddressResolver>>,
    transports: TransportRegistry,
    gater: Arc<dyn ConnectionGater>,
    upgrader: Arc<Upgrader>,
    dial_tokens: Arc<Semaphore>,
}

impl Dialer {
    #[tracing::instrument(name = "dial_queue::dial", skip_all, fields(target = %target))]
    async fn perform_dial(
        &self,
        target: DialTarget,
        priority: DialPriority,
        mut cancel: AnySignal,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        let dial = time::timeout(self.config.dial_timeout, self.dial(target, priority));
        tokio::pin!(dial);
        tokio::select! {
            biased;
            _ = &mut cancel => {
                // The dial may have produced a connection in the same instant the cancel signal
                // fired; it must not leak
                if let Some(Ok(Ok(conn))) = dial.as_mut().now_or_never() {
                    debug!(target: LOG_TARGET, "Closing connection from cancelled dial: {}", conn);
                    tokio::spawn(async move {
                        let _result = conn.disconnect().await;
                    });
                }
                Err(ConnectionManagerError::DialCancelled)
            },
            result = &mut dial => {
                result.map_err(|_| ConnectionManagerError::Timeout)?
            },
        }
    }

    async fn dial(
        &self,
        target: DialTarget,
        priority: DialPriority,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        if target.peer_id().as_ref() == Some(self.node_identity.peer_id()) {
            return Err(ConnectionManagerError::DialedSelf);
        }
        if let Some(peer_id) = target.peer_id() {
            if self.gater.deny_dial_peer(&peer_id) {
                return Err(ConnectionManagerError::DialDenied);
            }
        }

        let addresses = self.compute_addresses(&target).await?;
        self.dial_addresses(target.peer_id(), addresses, priority).await
    }

    /// The address pipeline: load, resolve, filter by transport, de-duplicate, append the peer
    /// id, gate, enforce limits and sort.
    async fn compute_addresses(&self, target: &DialTarget) -> Result<Vec<DialAddress>, ConnectionManagerError> {
        let initial = match target {
            DialTarget::Peer(peer_id) => self
                .address_book
                .get(peer_id)
                .await
                .map_err(|err| ConnectionManagerError::AddressBookError(err.to_string()))?,
            DialTarget::Addresses { addresses, .. } => addresses.clone(),
        };

        let resolved = self.resolve_addresses(initial).await;

        let supported = resolved
            .into_iter()
            .filter(|addr| self.transports.supports(&addr.address))
            .collect::<Vec<_>>();

        let mut addresses = dedup_addresses(supported);

        if let Some(peer_id) = target.peer_id() {
            for addr in &mut addresses {
                addr.address = with_peer_id(&addr.address, &peer_id);
            }
            // Appending the peer id can make previously distinct addresses collide
            addresses = dedup_addresses(addresses);
        }

        let mut addresses = addresses
            .into_iter()
            .filter(|addr| !self.gater.deny_dial_multiaddr(&addr.address))
            .collect::<Vec<_>>();

        if addresses.is_empty() {
            return Err(ConnectionManagerError::NoValidAddresses);
        }
        if addresses.len() > self.config.max_peer_addrs_to_dial {
            return Err(ConnectionManagerError::TooManyAddresses {
                given: addresses.len(),
                max: self.config.max_peer_addrs_to_dial,
            });
        }

        let sorter = self.config.address_sorter.clone();
        addresses.sort_by(|a, b| sorter(a, b));
        Ok(addresses)
    }

    /// Expand resolvable addresses, recursively up to a fixed depth. A failure to resolve one
    /// address skips that address rather than failing the dial.
    async fn resolve_addresses(&self, addresses: Vec<DialAddress>) -> Vec<DialAddress> {
        let mut out = Vec::new();
        let mut queue = addresses
            .into_iter()
            .map(|addr| (addr, 0usize))
            .collect::<VecDeque<_>>();

        while let Some((addr, depth)) = queue.pop_front() {
            let resolver = self.resolvers.iter().find(|r| r.can_resolve(&addr.address));
            match resolver {
                None => out.push(addr),
                Some(_) if depth >= MAX_RESOLVE_DEPTH => {
                    warn!(
                        target: LOG_TARGET,
                        "Dropping address '{}': resolution depth limit reached", addr.address
                    );
                },
                Some(resolver) => match resolver.resolve(&addr.address).await {
                    Ok(resolved) => {
                        queue.extend(resolved.into_iter().map(|address| {
                            (
                                DialAddress {
                                    address,
                                    certified: addr.certified,
                                },
                                depth + 1,
                            )
                        }));
                    },
                    Err(err) => {
                        warn!(target: LOG_TARGET, "Failed to resolve '{}': {}", addr.address, err);
                    },
                },
            }
        }
        out
    }

    /// Race the candidate addresses. The first successful upgrade wins; attempts that complete
    /// after the winner are closed, attempts still in flight are dropped.
    async fn dial_addresses(
        &self,
        expected_peer: Option<PeerId>,
        addresses: Vec<DialAddress>,
        priority: DialPriority,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        let num_addresses = addresses.len();
        let mut attempts = stream::iter(addresses)
            .map(|addr| {
                let address_str = addr.address.to_string();
                self.dial_single(expected_peer, addr, priority)
                    .map(move |result| result.map_err(|err| (address_str, err)))
            })
            .buffer_unordered(self.config.max_parallel_dials_per_peer);

        let mut failures = Vec::new();
        while let Some(result) = attempts.next().await {
            match result {
                Ok(conn) => {
                    // Close any attempt that won at the same time as the winner
                    while let Some(Some(late)) = attempts.next().now_or_never() {
                        if let Ok(late_conn) = late {
                            debug!(target: LOG_TARGET, "Closing late dial winner: {}", late_conn);
                            tokio::spawn(async move {
                                let _result = late_conn.disconnect().await;
                            });
                        }
                    }
                    return Ok(conn);
                },
                Err((address, err)) => {
                    debug!(target: LOG_TARGET, "Dial attempt to '{}' failed: {}", address, err);
                    failures.push((address, err));
                },
            }
        }

        if num_addresses == 1 {
            let (_, err) = failures.remove(0);
            return Err(err);
        }
        Err(ConnectionManagerError::AllAddressesFailed(
            failures
                .into_iter()
                .map(|(address, err)| format!("{}: {}", address, err))
                .collect(),
        ))
    }

    async fn dial_single(
        &self,
        expected_peer: Option<PeerId>,
        addr: DialAddress,
        priority: DialPriority,
    ) -> Result<PeerConnection, ConnectionManagerError> {
        // Holds a dial token for the whole attempt, including the upgrade. High priority dials
        // are not throttled by the token limit.
        let _permit = match priority {
            DialPriority::High => None,
            DialPriority::Normal => Some(
                self.dial_tokens
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ConnectionManagerError::NoDialTokens)?,
            ),
        };

        let transport = self
            .transports
            .transport_for(&addr.address)
            .ok_or_else(|| ConnectionManagerError::TransportError(format!("no transport for '{}'", addr.address)))?;
        let socket = transport
            .dial(&addr.address)
            .await
            .map_err(|err| ConnectionManagerError::TransportError(err.to_string()))?;

        self.upgrader
            .upgrade_outbound(socket, addr.address, expected_peer, Default::default())
            .await
    }
}
