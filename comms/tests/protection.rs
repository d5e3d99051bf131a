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
    connection_manager::{ConnectionManagerConfig, DialTarget},
    net_address::DialAddress,
    test_utils::TestNodeBuilder,
    transport::MemoryHub,
};

#[tokio::test]
async fn nodes_with_a_shared_psk_connect() {
    let hub = MemoryHub::new();
    let psk = [42u8; 32];
    let node_a = TestNodeBuilder::new(hub.clone()).with_psk(psk).spawn().await;
    let node_b = TestNodeBuilder::new(hub).with_psk(psk).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let conn = node_b.requester.dial_peer(target).await.unwrap();
    assert_eq!(conn.peer_id(), node_a.peer_id());
}

#[tokio::test]
async fn mismatched_psks_cannot_connect() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        dial_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let node_a = TestNodeBuilder::new(hub.clone()).with_psk([1u8; 32]).spawn().await;
    let node_b = TestNodeBuilder::new(hub)
        .with_psk([2u8; 32])
        .with_config(config)
        .spawn()
        .await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    node_b.requester.dial_peer(target).await.unwrap_err();
    assert_eq!(node_a.requester.get_num_connections().await.unwrap(), 0);
    assert_eq!(node_b.requester.get_num_connections().await.unwrap(), 0);
}
