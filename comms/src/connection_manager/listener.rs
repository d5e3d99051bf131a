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

use std::sync::Arc;

use log::*;
use multiaddr::Multiaddr;
use swarmlink_shutdown::ShutdownSignal;
use tokio::task::JoinHandle;

use super::{error::ConnectionManagerError, requester::ConnectionManagerRequester};
use crate::{
    transport::{BoxedSocket, Transport, TransportListener},
    upgrader::Upgrader,
};

const LOG_TARGET: &str = "comms::connection_manager::listener";

/// Accepts inbound sockets on a single transport, consults the accept policy and hands accepted
/// sockets to the upgrader.
pub struct PeerListener {
    listen_addr: Multiaddr,
    transport: Arc<dyn Transport>,
    upgrader: Arc<Upgrader>,
    requester: ConnectionManagerRequester,
    shutdown_signal: ShutdownSignal,
}

impl PeerListener {
    pub fn new(
        listen_addr: Multiaddr,
        transport: Arc<dyn Transport>,
        upgrader: Arc<Upgrader>,
        requester: ConnectionManagerRequester,
        shutdown_signal: ShutdownSignal,
    ) -> Self {
        Self {
            listen_addr,
            transport,
            upgrader,
            requester,
            shutdown_signal,
        }
    }

    /// Bind the listener and spawn its accept loop. Returns the concrete bound address.
    pub async fn listen(self) -> Result<(Multiaddr, JoinHandle<()>), ConnectionManagerError> {
        let (listener, bound_addr) = self
            .transport
            .listen(&self.listen_addr)
            .await
            .map_err(|err| ConnectionManagerError::TransportError(err.to_string()))?;
        info!(target: LOG_TARGET, "Listening for connections on {}", bound_addr);
        let handle = tokio::spawn(self.run(listener));
        Ok((bound_addr, handle))
    }

    async fn run(mut self, mut listener: TransportListener) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_signal.wait() => {
                    debug!(target: LOG_TARGET, "Listener shutting down");
                    break;
                },

                maybe_socket = listener.accept() => match maybe_socket {
                    Some((socket, remote_addr)) => self.handle_inbound(socket, remote_addr).await,
                    None => {
                        debug!(target: LOG_TARGET, "Listener socket stream ended");
                        break;
                    },
                },
            }
        }
    }

    async fn handle_inbound(&self, socket: BoxedSocket, remote_addr: Multiaddr) {
        let accepted = match self.requester.accept_inbound_connection(remote_addr.clone()).await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to consult accept policy: {}", err);
                false
            },
        };
        if !accepted {
            debug!(target: LOG_TARGET, "Rejected inbound connection from '{}'", remote_addr);
            return;
        }

        let upgrader = self.upgrader.clone();
        let requester = self.requester.clone();
        tokio::spawn(async move {
            if let Err(err) = upgrader.upgrade_inbound(socket, remote_addr.clone()).await {
                debug!(
                    target: LOG_TARGET,
                    "Inbound upgrade from '{}' failed: {}", remote_addr, err
                );
            }
            // The pending slot is released whether or not the upgrade succeeded
            let _result = requester.inbound_upgrade_complete().await;
        });
    }
}
