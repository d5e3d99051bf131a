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

//! Pre-shared key network protection. Both sides exchange fresh nonces in the clear and then
//! XSalsa20-encrypt all traffic under the shared key, before any other upgrade runs. Peers
//! without the key produce garbage and fail the subsequent encryption handshake.

use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use rand::{rngs::OsRng, RngCore};
use salsa20::{
    cipher::{KeyIvInit, StreamCipher},
    XSalsa20,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

pub const PSK_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Applies the pre-shared key layer to raw sockets.
pub struct Protector {
    psk: [u8; PSK_LEN],
}

impl Protector {
    pub fn new(psk: [u8; PSK_LEN]) -> Self {
        Self { psk }
    }

    /// Perform the nonce exchange and wrap the socket. Each direction of traffic runs under its
    /// own keystream, seeded by the nonce of the side doing the writing.
    pub async fn protect<TSocket>(&self, mut socket: TSocket) -> io::Result<ProtectedSocket<TSocket>>
    where TSocket: AsyncRead + AsyncWrite + Unpin {
        let mut local_nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut local_nonce);
        socket.write_all(&local_nonce).await?;
        socket.flush().await?;

        let mut remote_nonce = [0u8; NONCE_LEN];
        socket.read_exact(&mut remote_nonce).await?;

        Ok(ProtectedSocket {
            inner: socket,
            outgoing: XSalsa20::new(&self.psk.into(), &local_nonce.into()),
            incoming: XSalsa20::new(&self.psk.into(), &remote_nonce.into()),
            pending: Vec::new(),
        })
    }
}

/// A socket with the pre-shared key keystream applied to both directions.
pub struct ProtectedSocket<TSocket> {
    inner: TSocket,
    outgoing: XSalsa20,
    incoming: XSalsa20,
    pending: Vec<u8>,
}

impl<TSocket> ProtectedSocket<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    fn poll_drain_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.drain(..n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<TSocket> AsyncRead for ProtectedSocket<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let filled = buf.filled_mut();
        this.incoming.apply_keystream(&mut filled[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<TSocket> AsyncWrite for ProtectedSocket<TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // Encrypted bytes from an earlier call go out before anything new is accepted
        ready!(this.poll_drain_pending(cx))?;

        let mut ciphertext = buf.to_vec();
        this.outgoing.apply_keystream(&mut ciphertext);
        match Pin::new(&mut this.inner).poll_write(cx, &ciphertext) {
            Poll::Ready(Ok(n)) => {
                if n < ciphertext.len() {
                    this.pending.extend_from_slice(&ciphertext[n..]);
                }
                Poll::Ready(Ok(buf.len()))
            },
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            // The keystream has already advanced over these bytes, so they are committed
            Poll::Pending => {
                this.pending.extend_from_slice(&ciphertext);
                Poll::Ready(Ok(buf.len()))
            },
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain_pending(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain_pending(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod test {
    use futures::future;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn round_trip_with_shared_key() {
        let protector = Protector::new([7u8; PSK_LEN]);
        let (a, b) = tokio::io::duplex(1024);
        let (mut left, mut right) =
            future::try_join(protector.protect(a), protector.protect(b)).await.unwrap();

        left.write_all(b"a memory called empire").await.unwrap();
        left.flush().await.unwrap();

        let mut buf = [0u8; 22];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a memory called empire");
    }

    #[tokio::test]
    async fn mismatched_keys_produce_garbage() {
        let (a, b) = tokio::io::duplex(1024);
        let (mut left, mut right) = future::try_join(
            Protector::new([1u8; PSK_LEN]).protect(a),
            Protector::new([2u8; PSK_LEN]).protect(b),
        )
        .await
        .unwrap();

        left.write_all(b"plaintext").await.unwrap();
        left.flush().await.unwrap();

        let mut buf = [0u8; 9];
        right.read_exact(&mut buf).await.unwrap();
        assert_ne!(&buf, b"plaintext");
    }
}
