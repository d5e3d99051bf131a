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

use snow::params::NoiseParams;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{
    error::NoiseError,
    socket::{Handshake, NoiseSocket},
};
use crate::{connection_manager::ConnectionDirection, node_identity::NodeIdentity, peer_id::PeerId};

pub const NOISE_PARAMETER: &str = "Noise_IX_25519_ChaChaPoly_BLAKE2b";

/// Protocol id under which this encryption upgrade is negotiated.
pub const NOISE_PROTOCOL_ID: &[u8] = b"/noise";

/// The noise configuration used to perform an encryption upgrade on a socket.
#[derive(Clone)]
pub struct NoiseConfig {
    node_identity: Arc<NodeIdentity>,
    parameters: NoiseParams,
}

impl NoiseConfig {
    pub fn new(node_identity: Arc<NodeIdentity>) -> Self {
        let parameters = NOISE_PARAMETER.parse().expect("Invalid noise parameters");
        Self {
            node_identity,
            parameters,
        }
    }

    /// Upgrade the socket to the noise protocol. Returns the authenticated remote peer id and
    /// the encrypted socket.
    pub async fn upgrade_socket<TSocket>(
        &self,
        socket: TSocket,
        direction: ConnectionDirection,
    ) -> Result<(PeerId, NoiseSocket<TSocket>), NoiseError>
    where
        TSocket: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let builder =
            snow::Builder::new(self.parameters.clone()).local_private_key(self.node_identity.secret_key());

        let handshake_state = match direction {
            ConnectionDirection::Outbound => builder.build_initiator()?,
            ConnectionDirection::Inbound => builder.build_responder()?,
        };

        let socket = Handshake::new(socket, handshake_state).perform().await?;
        let static_key = socket.get_remote_static().ok_or(NoiseError::RemoteStaticKeyMissing)?;
        let peer_id = PeerId::from_public_key(static_key);

        Ok((peer_id, socket))
    }
}

#[cfg(test)]
mod test {
    use futures::future;

    use super::*;

    #[tokio::test]
    async fn authenticates_both_peers() {
        let identity_in = Arc::new(NodeIdentity::random().unwrap());
        let identity_out = Arc::new(NodeIdentity::random().unwrap());
        let config_in = NoiseConfig::new(identity_in.clone());
        let config_out = NoiseConfig::new(identity_out.clone());

        let (socket_in, socket_out) = tokio::io::duplex(1024 * 1024);
        let (upgraded_in, upgraded_out) = future::join(
            config_in.upgrade_socket(socket_in, ConnectionDirection::Inbound),
            config_out.upgrade_socket(socket_out, ConnectionDirection::Outbound),
        )
        .await;

        let (peer_in, _) = upgraded_in.unwrap();
        let (peer_out, _) = upgraded_out.unwrap();

        // Each side sees the identity of the *other* side
        assert_eq!(peer_in, *identity_out.peer_id());
        assert_eq!(peer_out, *identity_in.peer_id());
    }
}
