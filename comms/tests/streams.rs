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

use std::{sync::Arc, time::Duration};

use swarmlink::{
    connection_manager::{
        ConnectionManagerError,
        ConnectionManagerEvent,
        DialTarget,
        PeerConnectionError,
    },
    multiplexing::YamuxFactory,
    net_address::DialAddress,
    protocol::{ProtocolError, ProtocolEvent, ProtocolId, Protocols, StreamLimits},
    test_utils::TestNodeBuilder,
    transport::MemoryHub,
};
use tokio::{
    io::AsyncWriteExt,
    sync::mpsc,
    time,
};

const ECHO: &[u8] = b"/test/echo/1.0.0";

fn echo_protocols(limits: Option<StreamLimits>) -> Protocols {
    let protocols = Protocols::new();
    let (notifier, mut notifications) = mpsc::channel(16);
    protocols
        .handle(vec![ProtocolId::from_static(ECHO)], notifier, limits)
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
async fn outbound_stream_limit_is_enforced_and_released() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone())
        .with_protocols(echo_protocols(None))
        .spawn()
        .await;
    // The dialer's own registration carries the outbound cap
    let node_b = TestNodeBuilder::new(hub)
        .with_protocols(echo_protocols(Some(StreamLimits {
            max_outbound_streams: 1,
            ..Default::default()
        })))
        .spawn()
        .await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let conn = node_b.requester.dial_peer(target).await.unwrap();

    let first = conn.open_substream(vec![ProtocolId::from_static(ECHO)]).await.unwrap();

    let err = conn.open_substream(vec![ProtocolId::from_static(ECHO)]).await.unwrap_err();
    assert!(matches!(err, PeerConnectionError::TooManyStreams { .. }), "{}", err);

    // Dropping the stream releases its slot
    drop(first);
    conn.open_substream(vec![ProtocolId::from_static(ECHO)]).await.unwrap();
}

#[tokio::test]
async fn unsupported_protocol_is_rejected() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone())
        .with_protocols(echo_protocols(None))
        .spawn()
        .await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let conn = node_b.requester.dial_peer(target).await.unwrap();

    let err = conn
        .open_substream(vec![ProtocolId::from_static(b"/test/nope/1.0.0")])
        .await
        .unwrap_err();
    assert!(
        matches!(err, PeerConnectionError::ProtocolError(ProtocolError::ProtocolNotSupported)),
        "{}",
        err
    );
}

#[tokio::test]
async fn disjoint_muxer_sets_fail_the_upgrade() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone())
        .with_muxers(vec![Arc::new(YamuxFactory::with_protocol_id(ProtocolId::from_static(
            b"/yamux-variant-a/1.0.0",
        )))])
        .spawn()
        .await;
    let node_b = TestNodeBuilder::new(hub)
        .with_muxers(vec![Arc::new(YamuxFactory::with_protocol_id(ProtocolId::from_static(
            b"/yamux-variant-b/1.0.0",
        )))])
        .spawn()
        .await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let err = node_b.requester.dial_peer(target).await.unwrap_err();
    assert!(matches!(err, ConnectionManagerError::MuxerUnavailable(_)), "{}", err);
}

#[tokio::test]
async fn close_removes_connection_and_emits_one_disconnect() {
    let hub = MemoryHub::new();
    let node_a = TestNodeBuilder::new(hub.clone()).spawn().await;
    let node_b = TestNodeBuilder::new(hub).spawn().await;

    let target = DialTarget::peer_with_addresses(node_a.peer_id(), [DialAddress::new(node_a.listen_addr.clone())])
        .unwrap();
    let conn = node_b.requester.dial_peer(target).await.unwrap();

    let mut events = node_b.requester.get_event_subscription();
    conn.disconnect().await.unwrap();

    let event = time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        ConnectionManagerEvent::PeerDisconnected(peer_id) if peer_id == node_a.peer_id()
    ));

    // No further disconnect events for the same connection
    assert!(time::timeout(Duration::from_millis(200), events.recv()).await.is_err());

    assert_eq!(node_b.requester.get_num_connections().await.unwrap(), 0);
    assert!(node_b
        .requester
        .get_active_connection(node_a.peer_id())
        .await
        .unwrap()
        .is_none());
}
