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

use std::{
    fmt,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::StreamExt;
use log::*;
use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc,
};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use yamux::Mode;

use super::{CounterGuard, MuxerFactory};
use crate::{connection_manager::ConnectionDirection, protocol::ProtocolId, transport::BoxedSocket};

const LOG_TARGET: &str = "comms::multiplexing::yamux";

/// Protocol id under which this multiplexer is negotiated.
pub const YAMUX_PROTOCOL_ID: &[u8] = b"/yamux/1.0.0";

const MAX_BUFFER_SIZE: u32 = 8 * 1024 * 1024; // 8MiB
const RECEIVE_WINDOW: u32 = 4 * 1024 * 1024; // 4MiB
const INCOMING_BACKLOG: usize = 16;

/// A yamux session over a secured socket. Opens outbound substreams and yields substreams
/// initiated by the remote.
pub struct Muxer {
    control: yamux::Control,
    incoming: mpsc::Receiver<Substream>,
}

impl Muxer {
    /// Multiplex the given socket. The inbound end runs in server mode, the outbound end in
    /// client mode.
    pub fn upgrade(socket: BoxedSocket, direction: ConnectionDirection) -> Self {
        let mode = match direction {
            ConnectionDirection::Inbound => Mode::Server,
            ConnectionDirection::Outbound => Mode::Client,
        };

        let mut config = yamux::Config::default();
        // Provide back pressure to the sending side rather than buffering without bound
        config.set_window_update_mode(yamux::WindowUpdateMode::OnRead);
        // OnRead increases the RTT of window updates, so use generous buffers
        config.set_max_buffer_size(MAX_BUFFER_SIZE as usize);
        config.set_receive_window(RECEIVE_WINDOW);

        let connection = yamux::Connection::new(socket.compat(), config, mode);
        let control = connection.control();

        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BACKLOG);
        // The connection future must be polled for the session (including the control handle)
        // to make progress, so the pump task runs for the lifetime of the session
        tokio::spawn(incoming_worker(yamux::into_stream(connection).boxed(), incoming_tx));

        Self {
            control,
            incoming: incoming_rx,
        }
    }

    /// Open a substream to the remote.
    pub async fn open_substream(&self) -> io::Result<Substream> {
        let mut control = self.control.clone();
        let stream = control
            .open_stream()
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err))?;
        Ok(Substream::new(stream))
    }

    /// The next substream initiated by the remote, or `None` once the session has ended.
    pub async fn next_incoming(&mut self) -> Option<Substream> {
        self.incoming.recv().await
    }

    /// Close the session. All substreams are terminated.
    pub async fn close(&self) -> io::Result<()> {
        let mut control = self.control.clone();
        control
            .close()
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err))
    }
}

impl fmt::Debug for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Muxer { .. }")
    }
}

async fn incoming_worker(
    mut inbound: futures::stream::BoxStream<'static, Result<yamux::Stream, yamux::ConnectionError>>,
    tx: mpsc::Sender<Substream>,
) {
    while let Some(result) = inbound.next().await {
        match result {
            Ok(stream) => {
                if tx.send(Substream::new(stream)).await.is_err() {
                    // Session handle dropped; drive the connection to completion so that any
                    // queued control commands still resolve
                    debug!(target: LOG_TARGET, "Muxer incoming receiver closed");
                    break;
                }
            },
            Err(err) => {
                debug!(target: LOG_TARGET, "Yamux session ended with error: {}", err);
                break;
            },
        }
    }
    // Dropping tx closes the incoming receiver which signals session end
}

/// Default [MuxerFactory] producing yamux sessions.
#[derive(Clone)]
pub struct YamuxFactory {
    protocol: ProtocolId,
}

impl YamuxFactory {
    pub fn new() -> Self {
        Self {
            protocol: ProtocolId::from_static(YAMUX_PROTOCOL_ID),
        }
    }

    /// Override the negotiated protocol id. Mostly useful in tests.
    pub fn with_protocol_id(protocol: ProtocolId) -> Self {
        Self { protocol }
    }
}

impl Default for YamuxFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MuxerFactory for YamuxFactory {
    fn protocol_id(&self) -> ProtocolId {
        self.protocol.clone()
    }

    async fn upgrade(&self, socket: BoxedSocket, direction: ConnectionDirection) -> io::Result<Muxer> {
        Ok(Muxer::upgrade(socket, direction))
    }
}

/// A single multiplexed stream. Carries an optional counter guard that releases the stream's
/// slot in the per-protocol stream cap when dropped.
#[pin_project]
pub struct Substream {
    #[pin]
    inner: Compat<yamux::Stream>,
    counter_guard: Option<CounterGuard>,
}

impl Substream {
    fn new(stream: yamux::Stream) -> Self {
        Self {
            inner: stream.compat(),
            counter_guard: None,
        }
    }

    pub(crate) fn set_counter_guard(&mut self, guard: CounterGuard) {
        self.counter_guard = Some(guard);
    }
}

impl fmt::Debug for Substream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Substream(id = {:?})", self.inner.get_ref().id())
    }
}

impl AsyncRead for Substream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for Substream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn muxer_pair() -> (Muxer, Muxer) {
        let (a, b) = tokio::io::duplex(1024 * 1024);
        let outbound = Muxer::upgrade(Box::new(a), ConnectionDirection::Outbound);
        let inbound = Muxer::upgrade(Box::new(b), ConnectionDirection::Inbound);
        (outbound, inbound)
    }

    #[tokio::test]
    async fn open_substream_round_trip() {
        let (outbound, mut inbound) = muxer_pair();
        let msg = b"The Way of Kings";

        let mut substream = outbound.open_substream().await.unwrap();
        substream.write_all(msg).await.unwrap();
        substream.flush().await.unwrap();
        substream.shutdown().await.unwrap();

        let mut incoming = inbound.next_incoming().await.unwrap();
        let mut buf = Vec::new();
        incoming.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, msg);
    }

    #[tokio::test]
    async fn close_ends_incoming() {
        let (outbound, mut inbound) = muxer_pair();
        outbound.close().await.unwrap();
        assert!(inbound.next_incoming().await.is_none());
    }
}
