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

use std::time::Duration;

use swarmlink::{
    address_book::{AddressBook, KEEP_ALIVE_TAG},
    connection_manager::{
        AutoDialer,
        ConnectionManagerConfig,
        ConnectionManagerEvent,
        ConnectionPruner,
        DialTarget,
    },
    net_address::DialAddress,
    test_utils::TestNodeBuilder,
    transport::MemoryHub,
};
use tokio::time;

#[tokio::test]
async fn auto_dialer_maintains_the_connection_floor() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;

    let config = ConnectionManagerConfig {
        min_connections: 1,
        auto_dial_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let node_b = TestNodeBuilder::new(hub).with_config(config.clone()).spawn().await;
    node_b
        .address_book
        .merge(&node_a.peer_id(), vec![DialAddress::new(node_a.listen_addr.clone())])
        .await
        .unwrap();

    let mut events = node_b.requester.get_event_subscription();
    AutoDialer::new(
        config,
        node_b.requester.clone(),
        node_b.address_book.clone(),
        node_b.shutdown.to_signal(),
    )
    .spawn();

    let event = time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        ConnectionManagerEvent::PeerConnected(conn) if conn.peer_id() == node_a.peer_id()
    ));
}

#[tokio::test]
async fn pruner_enforces_the_connection_ceiling() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;

    let config = ConnectionManagerConfig {
        max_connections: 1,
        ..Default::default()
    };
    let node_b = TestNodeBuilder::new(hub).with_config(config.clone()).spawn().await;
    ConnectionPruner::new(
        config,
        node_b.requester.clone(),
        node_b.address_book.clone(),
        node_b.shutdown.to_signal(),
    )
    .spawn();

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    node_b.requester.dial_peer(target.clone()).await.unwrap();
    node_b.requester.dial_peer_forced(target).await.unwrap();

    let deadline = time::Instant::now() + Duration::from_secs(5);
    loop {
        if node_b.requester.get_num_connections().await.unwrap() <= 1 {
            break;
        }
        assert!(time::Instant::now() < deadline, "pruner did not close the surplus connection");
        time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn pruner_spares_keep_alive_peers() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;

    let config = ConnectionManagerConfig {
        max_connections: 1,
        ..Default::default()
    };
    let node_b = TestNodeBuilder::new(hub).with_config(config.clone()).spawn().await;
    node_b
        .address_book
        .set_tag(&node_a.peer_id(), KEEP_ALIVE_TAG)
        .await
        .unwrap();
    ConnectionPruner::new(
        config,
        node_b.requester.clone(),
        node_b.address_book.clone(),
        node_b.shutdown.to_signal(),
    )
    .spawn();

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    node_b.requester.dial_peer(target.clone()).await.unwrap();
    node_b.requester.dial_peer_forced(target).await.unwrap();

    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(node_b.requester.get_num_connections().await.unwrap(), 2);
}
