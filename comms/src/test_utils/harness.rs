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

use multiaddr::Multiaddr;
use swarmlink_shutdown::Shutdown;
use tokio::sync::{mpsc, oneshot, Semaphore};

use super::node_identity::build_node_identity;
use crate::{
    address_book::MemoryAddressBook,
    connection_manager::{
        ConnectionManager,
        ConnectionManagerConfig,
        ConnectionManagerRequester,
        DialQueue,
        DialQueueRequest,
        PeerListener,
    },
    gater::{AllowAllGater, ConnectionGater},
    multiplexing::MuxerFactory,
    node_identity::NodeIdentity,
    protocol::Protocols,
    resolver::AddressResolver,
    transport::{MemoryHub, MemoryTransport, TransportRegistry},
    upgrader::{Protector, Upgrader, PSK_LEN},
};

const CHANNEL_SIZE: usize = 64;

/// Builds a complete node (dial queue, connection manager, upgrader and listener) over the
/// in-memory transport.
pub struct TestNodeBuilder {
    config: ConnectionManagerConfig,
    hub: Arc<MemoryHub>,
    gater: Arc<dyn ConnectionGater>,
    protocols: Protocols,
    resolvers: Vec<Arc<dyn AddressResolver>>,
    psk: Option<[u8; PSK_LEN]>,
    muxers: Option<Vec<Arc<dyn MuxerFactory>>>,
}

impl TestNodeBuilder {
    /// A node builder attached to the given memory hub. Nodes sharing a hub can reach each
    /// other.
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self {
            config: ConnectionManagerConfig::default(),
            hub,
            gater: Arc::new(AllowAllGater),
            protocols: Protocols::new(),
            resolvers: Vec::new(),
            psk: None,
            muxers: None,
        }
    }

    pub fn with_config(mut self, config: ConnectionManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_gater(mut self, gater: Arc<dyn ConnectionGater>) -> Self {
        self.gater = gater;
        self
    }

    pub fn with_protocols(mut self, protocols: Protocols) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn with_psk(mut self, psk: [u8; PSK_LEN]) -> Self {
        self.psk = Some(psk);
        self
    }

    pub fn with_muxers(mut self, muxers: Vec<Arc<dyn MuxerFactory>>) -> Self {
        self.muxers = Some(muxers);
        self
    }

    /// Wire everything up, bind a listener on an automatic memory port and return the running
    /// node.
    pub async fn spawn(self) -> TestNode {
        let node_identity = build_node_identity();
        let shutdown = Shutdown::new();
        let signal = shutdown.to_signal();

        let address_book = Arc::new(MemoryAddressBook::new());
        let transport = Arc::new(MemoryTransport::new(self.hub.clone()));
        let mut transports = TransportRegistry::new();
        transports.register(transport.clone());

        let (connection_events_tx, connection_events_rx) = mpsc::channel(CHANNEL_SIZE);
        let mut upgrader = Upgrader::new(
            node_identity.clone(),
            self.gater.clone(),
            self.protocols.clone(),
            connection_events_tx,
            self.config.inbound_upgrade_timeout,
        );
        if let Some(psk) = self.psk {
            upgrader.set_protector(Protector::new(psk));
        }
        if let Some(muxers) = self.muxers {
            upgrader.set_muxers(muxers);
        }
        let upgrader = Arc::new(upgrader);

        let (dial_queue_tx, dial_queue_rx) = mpsc::channel(CHANNEL_SIZE);
        let dial_queue = DialQueue::new(
            self.config.clone(),
            node_identity.clone(),
            dial_queue_rx,
            address_book.clone(),
            self.resolvers,
            transports,
            self.gater.clone(),
            upgrader.clone(),
            signal.clone(),
        );
        let dial_tokens = dial_queue.dial_tokens();
        dial_queue.spawn();

        let (request_tx, request_rx) = mpsc::channel(CHANNEL_SIZE);
        let event_tx = ConnectionManager::create_event_channel();
        let requester = ConnectionManagerRequester::new(request_tx, event_tx.clone());
        ConnectionManager::new(
            self.config,
            request_rx,
            connection_events_rx,
            dial_queue_tx.clone(),
            address_book.clone(),
            event_tx,
            signal.clone(),
        )
        .spawn();

        let listener = PeerListener::new(
            "/memory/0".parse().expect("valid multiaddr"),
            transport,
            upgrader,
            requester.clone(),
            signal,
        );
        let (listen_addr, _) = listener.listen().await.expect("memory listener failed to bind");

        TestNode {
            node_identity,
            requester,
            address_book,
            listen_addr,
            dial_queue_tx,
            dial_tokens,
            shutdown,
        }
    }
}

/// A running in-memory node.
pub struct TestNode {
    pub node_identity: Arc<NodeIdentity>,
    pub requester: ConnectionManagerRequester,
    pub address_book: Arc<MemoryAddressBook>,
    pub listen_addr: Multiaddr,
    pub dial_queue_tx: mpsc::Sender<DialQueueRequest>,
    pub dial_tokens: Arc<Semaphore>,
    pub shutdown: Shutdown,
}

impl TestNode {
    pub fn peer_id(&self) -> crate::peer_id::PeerId {
        *self.node_identity.peer_id()
    }

    /// The number of dials currently in flight in this node's dial queue.
    pub async fn num_pending_dials(&self) -> usize {
        let (reply, reply_rx) = oneshot::channel();
        self.dial_queue_tx
            .send(DialQueueRequest::NumPendingDials(reply))
            .await
            .expect("dial queue stopped");
        reply_rx.await.expect("dial queue stopped")
    }
}
