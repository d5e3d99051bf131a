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

use swarmlink::{
    connection_manager::{ConnectionManagerConfig, DialTarget},
    net_address::DialAddress,
    test_utils::TestNodeBuilder,
    transport::MemoryHub,
};

fn target_for(node: &swarmlink::test_utils::TestNode) -> DialTarget {
    DialTarget::peer_with_addresses(node.peer_id(), [DialAddress::new(node.listen_addr.clone())]).unwrap()
}

// The in-memory transport reports every dialer as "/memory/0"
fn memory_dialer_prefix() -> swarmlink::Multiaddr {
    "/memory/0".parse().unwrap()
}

#[tokio::test]
async fn deny_list_wins_over_allow_list() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        deny_list: vec![memory_dialer_prefix()],
        allow_list: vec![memory_dialer_prefix()],
        ..Default::default()
    };
    let node_a = TestNodeBuilder::new(hub.clone()).with_config(config).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    node_b.requester.dial_peer(target_for(&node_a)).await.unwrap_err();
    assert_eq!(node_a.requester.get_num_connections().await.unwrap(), 0);
}

#[tokio::test]
async fn pending_inbound_limit_rejects_connections() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        max_incoming_pending_connections: 0,
        ..Default::default()
    };
    let node_a = TestNodeBuilder::new(hub.clone()).with_config(config).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    node_b.requester.dial_peer(target_for(&node_a)).await.unwrap_err();
    assert_eq!(node_a.requester.get_num_connections().await.unwrap(), 0);
}

#[tokio::test]
async fn allow_list_wins_over_connection_limits() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        max_connections: 0,
        max_incoming_pending_connections: 0,
        allow_list: vec![memory_dialer_prefix()],
        ..Default::default()
    };
    let node_a = TestNodeBuilder::new(hub.clone()).with_config(config).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let conn = node_b.requester.dial_peer(target_for(&node_a)).await.unwrap();
    assert_eq!(conn.peer_id(), node_a.peer_id());
    assert_eq!(node_a.requester.get_num_connections().await.unwrap(), 1);
}

#[tokio::test]
async fn per_host_rate_limit_rejects_rapid_connections() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        inbound_connection_threshold: 1,
        ..Default::default()
    };
    let node_a = TestNodeBuilder::new(hub.clone()).with_config(config).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    node_b.requester.dial_peer(target_for(&node_a)).await.unwrap();
    // Same host, same one-second window
    node_b.requester.dial_peer_forced(target_for(&node_a)).await.unwrap_err();
    assert_eq!(node_a.requester.get_num_connections().await.unwrap(), 1);
}
