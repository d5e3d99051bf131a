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

//! Ordered first-match protocol selection.
//!
//! The proposer sends its full preference list in one frame: a `u8` count followed by that many
//! `u8`-length-prefixed protocol ids. The responder replies with a single length-prefixed frame
//! containing the first proposed id it supports, or a zero-length frame when none is supported.

use bytes::{BufMut, Bytes, BytesMut};
use log::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ProtocolError, ProtocolId};

const LOG_TARGET: &str = "comms::protocol::negotiation";

pub struct ProtocolNegotiation<'a, TSocket> {
    socket: &'a mut TSocket,
}

impl<'a, TSocket> ProtocolNegotiation<'a, TSocket>
where TSocket: AsyncRead + AsyncWrite + Unpin
{
    pub fn new(socket: &'a mut TSocket) -> Self {
        Self { socket }
    }

    /// Propose the given protocols, in preference order. Resolves to the protocol selected by
    /// the remote peer.
    pub async fn propose(&mut self, preferred: &[ProtocolId]) -> Result<ProtocolId, ProtocolError> {
        if preferred.is_empty() {
            return Err(ProtocolError::NoProtocolsProposed);
        }
        if preferred.len() > usize::from(u8::MAX) {
            return Err(ProtocolError::TooManyProtocols);
        }

        let mut frame = BytesMut::with_capacity(1 + preferred.iter().map(|p| p.len() + 1).sum::<usize>());
        frame.put_u8(preferred.len() as u8);
        for protocol in preferred {
            frame.put_u8(id_len(protocol)?);
            frame.extend_from_slice(protocol);
        }
        self.socket.write_all(&frame).await?;
        self.socket.flush().await?;

        let selected = self.read_id_frame().await?;
        if selected.is_empty() {
            return Err(ProtocolError::ProtocolNotSupported);
        }
        match preferred.iter().find(|p| **p == selected) {
            Some(protocol) => {
                trace!(
                    target: LOG_TARGET,
                    "Remote selected protocol '{}'",
                    String::from_utf8_lossy(protocol)
                );
                Ok(protocol.clone())
            },
            // The responder must reply with one of the proposed ids
            None => Err(ProtocolError::ProtocolNotSupported),
        }
    }

    /// Await a proposal and select the first proposed protocol contained in `supported`.
    pub async fn respond(&mut self, supported: &[ProtocolId]) -> Result<ProtocolId, ProtocolError> {
        let count = self.socket.read_u8().await?;
        let mut selected = None;
        for _ in 0..count {
            let proposed = self.read_id_frame().await?;
            if selected.is_none() && supported.iter().any(|p| *p == proposed) {
                selected = Some(proposed);
            }
        }

        match selected {
            Some(protocol) => {
                self.write_id_frame(&protocol).await?;
                trace!(
                    target: LOG_TARGET,
                    "Selected protocol '{}'",
                    String::from_utf8_lossy(&protocol)
                );
                Ok(protocol)
            },
            None => {
                // Zero-length frame is the not-supported marker
                self.socket.write_u8(0).await?;
                self.socket.flush().await?;
                Err(ProtocolError::ProtocolNotSupported)
            },
        }
    }

    async fn read_id_frame(&mut self) -> Result<Bytes, ProtocolError> {
        let len = usize::from(self.socket.read_u8().await?);
        let mut buf = vec![0u8; len];
        self.socket.read_exact(&mut buf).await?;
        Ok(buf.into())
    }

    async fn write_id_frame(&mut self, protocol: &ProtocolId) -> Result<(), ProtocolError> {
        self.socket.write_u8(id_len(protocol)?).await?;
        self.socket.write_all(protocol).await?;
        self.socket.flush().await?;
        Ok(())
    }
}

fn id_len(protocol: &ProtocolId) -> Result<u8, ProtocolError> {
    if protocol.is_empty() {
        return Err(ProtocolError::EmptyProtocolId);
    }
    protocol.len().try_into().map_err(|_| ProtocolError::ProtocolIdTooLong)
}

#[cfg(test)]
mod test {
    use futures::future;

    use super::*;

    fn protocols(ids: &[&'static [u8]]) -> Vec<ProtocolId> {
        ids.iter().map(|p| ProtocolId::from_static(p)).collect()
    }

    #[tokio::test]
    async fn selects_first_mutually_supported() {
        let (mut initiator, mut responder) = tokio::io::duplex(64);
        let mut propose = ProtocolNegotiation::new(&mut initiator);
        let mut respond = ProtocolNegotiation::new(&mut responder);

        let supported = protocols(&[b"B", b"A"]);
        let preferred = protocols(&[b"C", b"A", b"B"]);

        let (selected_in, selected_out) =
            future::join(respond.respond(&supported), propose.propose(&preferred)).await;

        // First match in the *proposer's* preference order wins
        assert_eq!(selected_in.unwrap(), ProtocolId::from_static(b"A"));
        assert_eq!(selected_out.unwrap(), ProtocolId::from_static(b"A"));
    }

    #[tokio::test]
    async fn fails_when_disjoint() {
        let (mut initiator, mut responder) = tokio::io::duplex(64);
        let mut propose = ProtocolNegotiation::new(&mut initiator);
        let mut respond = ProtocolNegotiation::new(&mut responder);

        let supported = protocols(&[b"A", b"B"]);
        let preferred = protocols(&[b"C", b"D"]);

        let (selected_in, selected_out) =
            future::join(respond.respond(&supported), propose.propose(&preferred)).await;

        assert!(matches!(selected_in.unwrap_err(), ProtocolError::ProtocolNotSupported));
        assert!(matches!(selected_out.unwrap_err(), ProtocolError::ProtocolNotSupported));
    }

    #[tokio::test]
    async fn rejects_empty_proposal() {
        let (mut initiator, _responder) = tokio::io::duplex(64);
        let mut propose = ProtocolNegotiation::new(&mut initiator);
        let err = propose.propose(&[]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NoProtocolsProposed));
    }

    #[tokio::test]
    async fn rejects_oversized_protocol_id() {
        let (mut initiator, _responder) = tokio::io::duplex(64);
        let mut propose = ProtocolNegotiation::new(&mut initiator);
        let huge = ProtocolId::from(vec![b'x'; 300]);
        let err = propose.propose(&[huge]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolIdTooLong));
    }
}
