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

use futures::future;
use swarmlink::{
    connection_manager::{
        ConnectionManagerConfig,
        ConnectionManagerError,
        DialOptions,
        DialPriority,
        DialQueueRequest,
        DialRequest,
        DialTarget,
    },
    net_address::DialAddress,
    protocol::{ProtocolEvent, ProtocolId, Protocols},
    test_utils::{build_node_identity, TestNodeBuilder},
    transport::MemoryHub,
};
use swarmlink_shutdown::Shutdown;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{mpsc, oneshot},
    time,
};

const ECHO: &[u8] = b"/test/echo/1.0.0";

fn echo_protocols() -> Protocols {
    let protocols = Protocols::new();
    let (notifier, mut notifications) = mpsc::channel(16);
    protocols
        .handle(vec![ProtocolId::from_static(ECHO)], notifier, None)
        .unwrap();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            let ProtocolEvent::NewInboundSubstream { substream, .. } = notification.event;
            tokio::spawn(async move {
                let (mut reader, mut writer) = tokio::io::split(substream);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });
    protocols
}

#[tokio::test]
async fn echo_round_trip() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone())
        .with_protocols(echo_protocols())
        .spawn()
        .await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let conn = node_b.requester.dial_peer(target).await.unwrap();
    assert_eq!(conn.peer_id(), node_a.peer_id());

    let mut negotiated = conn.open_substream(vec![ProtocolId::from_static(ECHO)]).await.unwrap();
    assert_eq!(negotiated.protocol, ProtocolId::from_static(ECHO));

    negotiated.stream.write_all(b"hello out there").await.unwrap();
    negotiated.stream.flush().await.unwrap();
    let mut buf = [0u8; 15];
    negotiated.stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello out there");
}

#[tokio::test]
async fn concurrent_dials_share_one_connection() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let dials = (0..5).map(|_| node_b.requester.dial_peer(target.clone()));
    let connections = future::try_join_all(dials).await.unwrap();

    let first_id = connections[0].id();
    assert!(connections.iter().all(|conn| conn.id() == first_id));
    assert_eq!(node_a.requester.get_num_connections().await.unwrap(), 1);
    assert_eq!(node_b.requester.get_num_connections().await.unwrap(), 1);
}

#[tokio::test]
async fn force_dial_opens_a_second_connection() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let first = node_b.requester.dial_peer(target.clone()).await.unwrap();
    let second = node_b.requester.dial_peer(target.clone()).await.unwrap();
    assert_eq!(first.id(), second.id());

    let forced = node_b.requester.dial_peer_forced(target).await.unwrap();
    assert_ne!(forced.id(), first.id());
    assert_eq!(node_b.requester.get_num_connections().await.unwrap(), 2);
}

#[tokio::test]
async fn rejects_peer_id_mismatch() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    // Expect a peer that is not the one actually listening
    let impostor = build_node_identity();
    let target = DialTarget::peer_with_addresses(*impostor.peer_id(), [DialAddress::new(
        node_a.listen_addr.clone(),
    )])
    .unwrap();

    let err = node_b.requester.dial_peer(target).await.unwrap_err();
    assert!(matches!(err, ConnectionManagerError::PeerMismatch { .. }), "{}", err);
    assert_eq!(node_b.requester.get_num_connections().await.unwrap(), 0);
}

#[tokio::test]
async fn refuses_to_dial_too_many_addresses() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        max_peer_addrs_to_dial: 3,
        ..Default::default()
    };
    let node = TestNodeBuilder::new(hub).with_config(config).spawn().await;

    let addresses = (9000u64..9004)
        .map(|port| DialAddress::new(format!("/memory/{}", port).parse().unwrap()))
        .collect::<Vec<_>>();
    let target = DialTarget::addresses(addresses).unwrap();

    let err = node.requester.dial_peer(target).await.unwrap_err();
    assert!(
        matches!(err, ConnectionManagerError::TooManyAddresses { given: 4, max: 3 }),
        "{}",
        err
    );
}

#[tokio::test]
async fn dialed_self_is_rejected() {
    let hub = MemoryHub::new();
    let node = TestNodeBuilder::new(hub).spawn().await;

    let err = node.requester.dial_peer(node.peer_id()).await.unwrap_err();
    assert!(matches!(err, ConnectionManagerError::DialedSelf), "{}", err);
}

#[tokio::test]
async fn dial_times_out() {
    let hub = MemoryHub::new();
    let config = ConnectionManagerConfig {
        dial_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let node = TestNodeBuilder::new(hub.clone()).with_config(config).spawn().await;

    // Bound but never serviced, so the upgrade handshake hangs
    let (port, _incoming) = hub.bind(0).unwrap();
    let target = DialTarget::addresses([DialAddress::new(format!("/memory/{}", port).parse().unwrap())]).unwrap();

    let err = node.requester.dial_peer(target).await.unwrap_err();
    assert!(matches!(err, ConnectionManagerError::Timeout), "{}", err);
}

#[tokio::test]
async fn high_priority_dials_skip_the_dial_token_wait() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;
    let config = ConnectionManagerConfig {
        max_parallel_dials: 0,
        dial_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let node_b = TestNodeBuilder::new(hub).with_config(config).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();

    // With no dial tokens at all, a normal priority dial waits until the timeout
    let err = node_b.requester.dial_peer(target.clone()).await.unwrap_err();
    assert!(matches!(err, ConnectionManagerError::Timeout), "{}", err);

    let (reply, reply_rx) = oneshot::channel();
    node_b
        .dial_queue_tx
        .send(DialQueueRequest::Dial(DialRequest {
            target,
            options: DialOptions {
                priority: DialPriority::High,
                ..Default::default()
            },
            reply,
        }))
        .await
        .unwrap();
    let conn = reply_rx.await.unwrap().unwrap();
    assert_eq!(conn.peer_id(), node_a.peer_id());
}

#[tokio::test]
async fn cancelled_dial_never_leaks_a_connection() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let mut cancel = Shutdown::new();
    let (reply, reply_rx) = oneshot::channel();
    node_b
        .dial_queue_tx
        .send(DialQueueRequest::Dial(DialRequest {
            target,
            options: DialOptions {
                cancel_signal: Some(cancel.to_signal()),
                ..Default::default()
            },
            reply,
        }))
        .await
        .unwrap();
    cancel.trigger();

    match reply_rx.await.unwrap() {
        // A connection that completed alongside the cancel signal must be torn down
        Err(ConnectionManagerError::DialCancelled) => {},
        // The dial won outright before the signal was observed
        Ok(conn) => conn.disconnect().await.unwrap(),
        Err(err) => panic!("unexpected dial error: {}", err),
    }

    let deadline = time::Instant::now() + Duration::from_secs(5);
    loop {
        let none_left = node_a.requester.get_num_connections().await.unwrap() == 0
            && node_b.requester.get_num_connections().await.unwrap() == 0;
        if none_left {
            break;
        }
        assert!(
            time::Instant::now() < deadline,
            "a cancelled dial left a connection behind"
        );
        time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn cancel_restores_dial_tokens_and_clears_pending() {
    let hub = MemoryHub::new();
    let node = TestNodeBuilder::new(hub.clone()).spawn().await;
    let max_tokens = node.dial_tokens.available_permits();

    // A listener that accepts the socket but never drives the upgrade
    let (port, _incoming) = hub.bind(0).unwrap();
    let impostor = build_node_identity();
    let target = DialTarget::peer_with_addresses(*impostor.peer_id(), [DialAddress::new(
        format!("/memory/{}", port).parse().unwrap(),
    )])
    .unwrap();

    let requester = node.requester.clone();
    let dial = tokio::spawn(async move { requester.dial_peer(target).await });

    // Wait for the attempt to take a dial token
    while node.dial_tokens.available_permits() == max_tokens {
        time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.num_pending_dials().await, 1);

    node.requester.cancel_dial(*impostor.peer_id()).await.unwrap();

    let err = dial.await.unwrap().unwrap_err();
    assert!(matches!(err, ConnectionManagerError::DialCancelled), "{}", err);
    assert_eq!(node.num_pending_dials().await, 0);

    // The aborted attempt hands its token back
    while node.dial_tokens.available_permits() != max_tokens {
        time::sleep(Duration::from_millis(10)).await;
    }
}
