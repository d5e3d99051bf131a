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

mod memory;
pub use memory::{MemoryHub, MemoryTransport};

use std::{io, sync::Arc};

use async_trait::async_trait;
use multiaddr::Multiaddr;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Address '{0}' is not supported by this transport")]
    AddressNotSupported(Multiaddr),
    #[error("Connection refused for address '{0}'")]
    ConnectionRefused(Multiaddr),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A raw duplex byte stream as produced by a transport.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> RawStream for T {}

/// Type-erased raw socket handed to the upgrader.
pub type BoxedSocket = Box<dyn RawStream>;

/// Opens raw byte streams to multiaddresses it supports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this transport can dial or listen on the given address.
    fn supports(&self, addr: &Multiaddr) -> bool;

    async fn dial(&self, addr: &Multiaddr) -> Result<BoxedSocket, TransportError>;

    /// Bind a listener. Returns the listener and the concrete address it is bound to.
    async fn listen(&self, addr: &Multiaddr) -> Result<(TransportListener, Multiaddr), TransportError>;
}

/// Stream of inbound raw sockets with the dialer's address.
pub struct TransportListener {
    incoming: mpsc::Receiver<(BoxedSocket, Multiaddr)>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl TransportListener {
    pub fn new(incoming: mpsc::Receiver<(BoxedSocket, Multiaddr)>) -> Self {
        Self {
            incoming,
            cleanup: None,
        }
    }

    /// Attach a teardown hook, run when the listener is dropped. Transports use this to release
    /// the bound address.
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where F: FnOnce() + Send + 'static {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// The next inbound socket, or `None` once the listener is closed.
    pub async fn accept(&mut self) -> Option<(BoxedSocket, Multiaddr)> {
        self.incoming.recv().await
    }
}

impl Drop for TransportListener {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// The set of registered transports, consulted in registration order.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
        self.transports.push(transport);
        self
    }

    /// The first registered transport supporting the address, if any.
    pub fn transport_for(&self, addr: &Multiaddr) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.supports(addr)).cloned()
    }

    pub fn supports(&self, addr: &Multiaddr) -> bool {
        self.transports.iter().any(|t| t.supports(addr))
    }
}
