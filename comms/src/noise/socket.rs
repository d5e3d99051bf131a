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

//! Encrypted socket carrying noise messages as u16 length-framed ciphertext.

use std::{
    cmp,
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use snow::{HandshakeState, TransportState};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::NoiseError;

/// Maximum noise message size, including the 16 byte AEAD tag.
pub const NOISE_MAX_MESSAGE_LEN: usize = 65535;
const NOISE_TAG_LEN: usize = 16;
const MAX_PAYLOAD_LEN: usize = NOISE_MAX_MESSAGE_LEN - NOISE_TAG_LEN;

fn noise_framed<TSocket>(socket: TSocket) -> Framed<TSocket, LengthDelimitedCodec>
where TSocket: AsyncRead + AsyncWrite + Unpin {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .max_frame_length(NOISE_MAX_MESSAGE_LEN)
        .new_framed(socket)
}

/// Performs the handshake phase and yields the transport-phase [NoiseSocket].
pub(super) struct Handshake<TSocket> {
    framed: Framed<TSocket, LengthDelimitedCodec>,
    state: HandshakeState,
}

impl<TSocket> Handshake<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    pub fn new(socket: TSocket, state: HandshakeState) -> Self {
        Self {
            framed: noise_framed(socket),
            state,
        }
    }

    /// Run the single round trip of the IX pattern.
    pub async fn perform(mut self) -> Result<NoiseSocket<TSocket>, NoiseError> {
        if self.state.is_initiator() {
            self.send_handshake_message().await?;
            self.receive_handshake_message().await?;
        } else {
            self.receive_handshake_message().await?;
            self.send_handshake_message().await?;
        }
        let state = self.state.into_transport_mode()?;
        Ok(NoiseSocket::new(self.framed, state))
    }

    async fn send_handshake_message(&mut self) -> Result<(), NoiseError> {
        let mut buf = [0u8; NOISE_MAX_MESSAGE_LEN];
        let n = self.state.write_message(&[], &mut buf)?;
        self.framed.send(Bytes::copy_from_slice(&buf[..n])).await?;
        Ok(())
    }

    async fn receive_handshake_message(&mut self) -> Result<(), NoiseError> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "socket closed during noise handshake"))??;
        let mut payload = vec![0u8; frame.len()];
        self.state.read_message(&frame, &mut payload)?;
        Ok(())
    }
}

/// A socket that encrypts and decrypts all traffic with a negotiated noise session.
///
/// Writes are buffered until `poll_flush`, chunked to the maximum noise payload size.
pub struct NoiseSocket<TSocket> {
    framed: Framed<TSocket, LengthDelimitedCodec>,
    state: TransportState,
    decrypted: BytesMut,
    pending_plaintext: Vec<u8>,
}

impl<TSocket> NoiseSocket<TSocket> {
    fn new(framed: Framed<TSocket, LengthDelimitedCodec>, state: TransportState) -> Self {
        Self {
            framed,
            state,
            decrypted: BytesMut::new(),
            pending_plaintext: Vec::new(),
        }
    }

    /// The remote peer's static public key as authenticated by the handshake.
    pub fn get_remote_static(&self) -> Option<&[u8]> {
        self.state.get_remote_static()
    }
}

impl<TSocket> NoiseSocket<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    fn poll_flush_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending_plaintext.is_empty() {
            ready!(Pin::new(&mut self.framed).poll_ready(cx))?;
            let chunk_len = cmp::min(self.pending_plaintext.len(), MAX_PAYLOAD_LEN);
            let mut ciphertext = vec![0u8; chunk_len + NOISE_TAG_LEN];
            let n = self
                .state
                .write_message(&self.pending_plaintext[..chunk_len], &mut ciphertext)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            ciphertext.truncate(n);
            self.pending_plaintext.drain(..chunk_len);
            Pin::new(&mut self.framed).start_send(ciphertext.into())?;
        }
        Pin::new(&mut self.framed).poll_flush(cx)
    }
}

impl<TSocket> AsyncRead for NoiseSocket<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.decrypted.is_empty() {
                let n = cmp::min(buf.remaining(), this.decrypted.len());
                buf.put_slice(&this.decrypted.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.framed).poll_next(cx)) {
                Some(Ok(frame)) => {
                    let mut plaintext = vec![0u8; frame.len()];
                    let n = this
                        .state
                        .read_message(&frame, &mut plaintext)
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                    this.decrypted.extend_from_slice(&plaintext[..n]);
                    // Zero-length payloads loop back to waiting for the next frame
                },
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<TSocket> AsyncWrite for NoiseSocket<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.pending_plaintext.len() >= MAX_PAYLOAD_LEN {
            ready!(this.poll_flush_pending(cx))?;
        }
        let n = cmp::min(buf.len(), MAX_PAYLOAD_LEN - this.pending_plaintext.len());
        this.pending_plaintext.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_flush_pending(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_flush_pending(cx))?;
        Pin::new(&mut this.framed).poll_close(cx).map_err(Into::into)
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{connection_manager::ConnectionDirection, node_identity::NodeIdentity, noise::NoiseConfig};

    async fn socket_pair() -> (NoiseSocket<tokio::io::DuplexStream>, NoiseSocket<tokio::io::DuplexStream>) {
        let identity_in = NodeIdentity::random().unwrap();
        let identity_out = NodeIdentity::random().unwrap();
        let config_in = NoiseConfig::new(identity_in.into());
        let config_out = NoiseConfig::new(identity_out.into());

        let (socket_in, socket_out) = tokio::io::duplex(1024 * 1024);
        let (upgraded_in, upgraded_out) = futures::future::join(
            config_in.upgrade_socket(socket_in, ConnectionDirection::Inbound),
            config_out.upgrade_socket(socket_out, ConnectionDirection::Outbound),
        )
        .await;
        (upgraded_in.unwrap().1, upgraded_out.unwrap().1)
    }

    #[tokio::test]
    async fn round_trip() {
        let (mut inbound, mut outbound) = socket_pair().await;

        outbound.write_all(b"children of time").await.unwrap();
        outbound.flush().await.unwrap();

        let mut buf = [0u8; 16];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"children of time");
    }

    #[tokio::test]
    async fn large_payload_is_chunked() {
        let (mut inbound, mut outbound) = socket_pair().await;

        let payload = vec![0xa5u8; MAX_PAYLOAD_LEN + 100];
        let write = async {
            outbound.write_all(&payload).await.unwrap();
            outbound.shutdown().await.unwrap();
        };
        let read = async {
            let mut received = Vec::new();
            inbound.read_to_end(&mut received).await.unwrap();
            received
        };
        let (_, received) = futures::future::join(write, read).await;
        assert_eq!(received, payload);
    }
}
