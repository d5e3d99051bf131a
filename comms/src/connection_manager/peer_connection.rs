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

//! A live, upgraded peer connection and the actor that services it.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use log::*;
use multiaddr::Multiaddr;
use tokio::{
    sync::{mpsc, oneshot},
    time,
};

use super::{
    direction::ConnectionDirection,
    error::PeerConnectionError,
    manager::ConnectionEvent,
};
use crate::{
    multiplexing::{CounterGuard, Muxer, Substream},
    peer_id::PeerId,
    protocol::{ProtocolEvent, ProtocolId, ProtocolNegotiation, Protocols},
};

const LOG_TARGET: &str = "comms::connection_manager::peer_connection";

const PROTOCOL_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_BACKLOG: usize = 10;

static CONNECTION_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Requests serviced by the connection's actor.
#[derive(Debug)]
pub enum PeerConnectionRequest {
    OpenSubstream {
        protocols: Vec<ProtocolId>,
        reply: oneshot::Sender<Result<NegotiatedSubstream, PeerConnectionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// A substream together with the protocol that was negotiated over it.
#[derive(Debug)]
pub struct NegotiatedSubstream {
    pub protocol: ProtocolId,
    pub stream: Substream,
}

/// Clonable handle to a live connection. All clones refer to the same underlying session; the
/// session ends when `disconnect` is called, the remote hangs up, or every handle is dropped.
#[derive(Clone)]
pub struct PeerConnection {
    id: usize,
    peer_id: PeerId,
    address: Multiaddr,
    direction: ConnectionDirection,
    started_at: Instant,
    request_tx: mpsc::Sender<PeerConnectionRequest>,
}

impl PeerConnection {
    /// Spawn the actor servicing the given muxed session and return the handle to it.
    pub(crate) fn create(
        peer_id: PeerId,
        address: Multiaddr,
        direction: ConnectionDirection,
        muxer: Muxer,
        protocols: Protocols,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::AcqRel);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BACKLOG);
        let actor = PeerConnectionActor {
            id,
            peer_id,
            request_rx,
            muxer,
            protocols,
            event_tx,
            stream_counters: HashMap::new(),
        };
        tokio::spawn(actor.run());

        Self {
            id,
            peer_id,
            address,
            direction,
            started_at: Instant::now(),
            request_tx,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn address(&self) -> &Multiaddr {
        &self.address
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_connected(&self) -> bool {
        !self.request_tx.is_closed()
    }

    /// Open a substream and negotiate one of the given protocols over it, in preference order.
    pub async fn open_substream(
        &self,
        protocols: Vec<ProtocolId>,
    ) -> Result<NegotiatedSubstream, PeerConnectionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.request_tx
            .send(PeerConnectionRequest::OpenSubstream { protocols, reply })
            .await?;
        reply_rx.await.map_err(|_| PeerConnectionError::InternalReplyCancelled)?
    }

    /// Close the session. Resolves once the actor has acknowledged the disconnect.
    pub async fn disconnect(&self) -> Result<(), PeerConnectionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.request_tx
            .send(PeerConnectionRequest::Disconnect { reply })
            .await?;
        reply_rx.await.map_err(|_| PeerConnectionError::InternalReplyCancelled)
    }
}

impl PartialEq for PeerConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .finish()
    }
}

impl fmt::Display for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PeerConnection#{} ({}, {}, {})",
            self.id,
            self.peer_id.short_str(),
            self.direction,
            self.address
        )
    }
}

#[derive(Clone, Default)]
struct StreamCounters {
    inbound: Arc<AtomicUsize>,
    outbound: Arc<AtomicUsize>,
}

struct PeerConnectionActor {
    id: usize,
    peer_id: PeerId,
    request_rx: mpsc::Receiver<PeerConnectionRequest>,
    muxer: Muxer,
    protocols: Protocols,
    event_tx: mpsc::Sender<ConnectionEvent>,
    stream_counters: HashMap<ProtocolId, StreamCounters>,
}

impl PeerConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                maybe_request = self.request_rx.recv() => match maybe_request {
                    Some(request) => {
                        if self.handle_request(request).await.is_break() {
                            break;
                        }
                    },
                    // Every handle dropped; tear the session down
                    None => break,
                },

                maybe_substream = self.muxer.next_incoming() => match maybe_substream {
                    Some(substream) => self.handle_incoming_substream(substream).await,
                    None => {
                        debug!(
                            target: LOG_TARGET,
                            "Session for connection #{} to peer '{}' ended",
                            self.id,
                            self.peer_id.short_str()
                        );
                        break;
                    },
                },
            }
        }

        if let Err(err) = self.muxer.close().await {
            debug!(target: LOG_TARGET, "Error closing muxer for connection #{}: {}", self.id, err);
        }
        // Exactly one closed notification per connection, whichever way the session ended
        let _result = self
            .event_tx
            .send(ConnectionEvent::ConnectionClosed {
                peer_id: self.peer_id,
                connection_id: self.id,
            })
            .await;
    }

    async fn handle_request(&mut self, request: PeerConnectionRequest) -> std::ops::ControlFlow<()> {
        use PeerConnectionRequest::{Disconnect, OpenSubstream};
        match request {
            OpenSubstream { protocols, reply } => {
                let result = self.open_substream(&protocols).await;
                if let Err(err) = result.as_ref() {
                    debug!(
                        target: LOG_TARGET,
                        "Failed to open substream on connection #{}: {}", self.id, err
                    );
                }
                let _result = reply.send(result);
                std::ops::ControlFlow::Continue(())
            },
            Disconnect { reply } => {
                debug!(
                    target: LOG_TARGET,
                    "Disconnect requested for connection #{} to peer '{}'",
                    self.id,
                    self.peer_id.short_str()
                );
                let _result = reply.send(());
                std::ops::ControlFlow::Break(())
            },
        }
    }

    async fn open_substream(
        &mut self,
        protocols: &[ProtocolId],
    ) -> Result<NegotiatedSubstream, PeerConnectionError> {
        let mut substream = self.muxer.open_substream().await?;
        let selected = time::timeout(
            PROTOCOL_NEGOTIATION_TIMEOUT,
            ProtocolNegotiation::new(&mut substream).propose(protocols),
        )
        .await
        .map_err(|_| {
            PeerConnectionError::YamuxError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "protocol negotiation timed out",
            ))
        })??;

        let limits = self.protocols.limits_for(&selected).unwrap_or_default();
        let counter = self.counters(&selected).outbound;
        match CounterGuard::acquire(counter, limits.max_outbound_streams) {
            Some(guard) => {
                substream.set_counter_guard(guard);
                Ok(NegotiatedSubstream {
                    protocol: selected,
                    stream: substream,
                })
            },
            None => Err(PeerConnectionError::TooManyStreams {
                protocol: String::from_utf8_lossy(&selected).into_owned(),
                direction: ConnectionDirection::Outbound,
            }),
        }
    }

    async fn handle_incoming_substream(&mut self, mut substream: Substream) {
        let supported = self.protocols.supported();
        let negotiated = time::timeout(
            PROTOCOL_NEGOTIATION_TIMEOUT,
            ProtocolNegotiation::new(&mut substream).respond(&supported),
        )
        .await;

        let protocol = match negotiated {
            Ok(Ok(protocol)) => protocol,
            Ok(Err(err)) => {
                debug!(
                    target: LOG_TARGET,
                    "Inbound substream negotiation failed on connection #{}: {}", self.id, err
                );
                return;
            },
            Err(_) => {
                debug!(
                    target: LOG_TARGET,
                    "Inbound substream negotiation timed out on connection #{}", self.id
                );
                return;
            },
        };

        let limits = self.protocols.limits_for(&protocol).unwrap_or_default();
        let counter = self.counters(&protocol).inbound;
        match CounterGuard::acquire(counter, limits.max_inbound_streams) {
            Some(guard) => {
                substream.set_counter_guard(guard);
                let notification = ProtocolEvent::NewInboundSubstream {
                    peer_id: self.peer_id,
                    substream,
                };
                if let Err(err) = self.protocols.notify(&protocol, notification).await {
                    warn!(
                        target: LOG_TARGET,
                        "Failed to deliver inbound substream on connection #{}: {}", self.id, err
                    );
                }
            },
            None => {
                warn!(
                    target: LOG_TARGET,
                    "Dropping inbound '{}' substream on connection #{}: stream limit reached",
                    String::from_utf8_lossy(&protocol),
                    self.id
                );
            },
        }
    }

    fn counters(&mut self, protocol: &ProtocolId) -> StreamCounters {
        self.stream_counters.entry(protocol.clone()).or_default().clone()
    }
}
