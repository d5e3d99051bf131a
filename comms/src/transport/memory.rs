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

//! In-memory transport for `/memory/<port>` addresses.
//!
//! Ports live on a [MemoryHub] which is injected into every transport that should share an
//! address space. There is deliberately no process-wide hub; tests create one hub per simulated
//! network.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use multiaddr::{Multiaddr, Protocol};
use tokio::sync::mpsc;

use super::{BoxedSocket, Transport, TransportError, TransportListener};

const MEMORY_SOCKET_BUF_SIZE: usize = 64 * 1024;
const LISTEN_BACKLOG: usize = 16;

type InboundTx = mpsc::Sender<(BoxedSocket, Multiaddr)>;

/// Shared address space for memory transports. Cheap to clone via `Arc`.
#[derive(Debug, Default)]
pub struct MemoryHub {
    ports: Mutex<HashMap<u64, InboundTx>>,
    next_port: AtomicU64,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ports: Mutex::new(HashMap::new()),
            next_port: AtomicU64::new(1),
        })
    }

    /// Bind a port. Port 0 requests automatic assignment. Returns the bound port and the
    /// receiving end for inbound sockets.
    pub fn bind(&self, port: u64) -> Result<(u64, mpsc::Receiver<(BoxedSocket, Multiaddr)>), TransportError> {
        let mut ports = self.ports.lock().expect("memory hub lock poisoned");
        let port = if port == 0 {
            loop {
                let candidate = self.next_port.fetch_add(1, Ordering::SeqCst);
                if !ports.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            if ports.contains_key(&port) {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("memory port {} already bound", port),
                )));
            }
            port
        };

        let (tx, rx) = mpsc::channel(LISTEN_BACKLOG);
        ports.insert(port, tx);
        Ok((port, rx))
    }

    pub fn unbind(&self, port: u64) {
        self.ports.lock().expect("memory hub lock poisoned").remove(&port);
    }

    /// Open a socket pair to the listener bound on `port`.
    pub async fn connect(&self, port: u64, addr: &Multiaddr) -> Result<BoxedSocket, TransportError> {
        let tx = {
            let ports = self.ports.lock().expect("memory hub lock poisoned");
            ports
                .get(&port)
                .cloned()
                .ok_or_else(|| TransportError::ConnectionRefused(addr.clone()))?
        };
        let (outbound, inbound) = tokio::io::duplex(MEMORY_SOCKET_BUF_SIZE);
        // Dialer addresses carry port 0 so they are never used as an address to dial back
        let dialer_addr: Multiaddr = Protocol::Memory(0).into();
        tx.send((Box::new(inbound), dialer_addr))
            .await
            .map_err(|_| TransportError::ConnectionRefused(addr.clone()))?;
        Ok(Box::new(outbound))
    }
}

/// Transport for in-memory connections over a shared [MemoryHub].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn supports(&self, addr: &Multiaddr) -> bool {
        parse_port(addr).is_ok()
    }

    async fn dial(&self, addr: &Multiaddr) -> Result<BoxedSocket, TransportError> {
        let port = parse_port(addr)?;
        self.hub.connect(port, addr).await
    }

    async fn listen(&self, addr: &Multiaddr) -> Result<(TransportListener, Multiaddr), TransportError> {
        let port = parse_port(addr)?;
        let (actual_port, rx) = self.hub.bind(port)?;
        let listen_addr: Multiaddr = Protocol::Memory(actual_port).into();
        let hub = self.hub.clone();
        let listener = TransportListener::new(rx).with_cleanup(move || hub.unbind(actual_port));
        Ok((listener, listen_addr))
    }
}

/// A memory address is `/memory/<port>` optionally followed by `/p2p/<peer id>`.
fn parse_port(addr: &Multiaddr) -> Result<u64, TransportError> {
    let mut iter = addr.iter();
    let port = match iter.next() {
        Some(Protocol::Memory(port)) => port,
        _ => return Err(TransportError::AddressNotSupported(addr.clone())),
    };
    for segment in iter {
        if !matches!(segment, Protocol::P2p(_)) {
            return Err(TransportError::AddressNotSupported(addr.clone()));
        }
    }
    Ok(port)
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn listen_and_dial() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub);

        let (mut listener, addr) = transport.listen(&"/memory/0".parse().unwrap()).await.unwrap();

        let mut outbound = transport.dial(&addr).await.unwrap();
        let (mut inbound, dialer_addr) = listener.accept().await.unwrap();
        assert_eq!(dialer_addr, "/memory/0".parse().unwrap());

        outbound.write_all(b"hello world").await.unwrap();
        outbound.flush().await.unwrap();

        let mut buf = [0u8; 11];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn dial_with_peer_id_suffix() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub);
        let (_listener, addr) = transport.listen(&"/memory/0".parse().unwrap()).await.unwrap();

        let peer_id = crate::peer_id::PeerId::from_public_key(b"k");
        let dialable = crate::net_address::with_peer_id(&addr, &peer_id);
        assert!(transport.supports(&dialable));
        transport.dial(&dialable).await.unwrap();
    }

    #[tokio::test]
    async fn refuses_unbound_port() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub);
        let err = transport.dial(&"/memory/99".parse().unwrap()).await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn unsupported_multiaddrs() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub);
        assert!(!transport.supports(&"/ip4/127.0.0.1/tcp/0".parse().unwrap()));
        let err = transport.dial(&"/ip4/127.0.0.1/tcp/22".parse().unwrap()).await.err().unwrap();
        assert!(matches!(err, TransportError::AddressNotSupported(_)));
    }

    #[tokio::test]
    async fn dropping_the_listener_releases_the_port() {
        let hub = MemoryHub::new();
        let transport = MemoryTransport::new(hub);
        let addr = "/memory/5".parse().unwrap();
        let (listener, bound) = transport.listen(&addr).await.unwrap();
        drop(listener);

        // The port is free to bind again
        let (_listener, rebound) = transport.listen(&addr).await.unwrap();
        assert_eq!(bound, rebound);
    }

    #[tokio::test]
    async fn hubs_are_isolated() {
        let transport_a = MemoryTransport::new(MemoryHub::new());
        let transport_b = MemoryTransport::new(MemoryHub::new());
        let (_listener, addr) = transport_a.listen(&"/memory/0".parse().unwrap()).await.unwrap();
        let err = transport_b.dial(&addr).await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }
}
