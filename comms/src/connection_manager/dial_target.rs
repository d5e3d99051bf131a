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

use std::fmt;

use multiaddr::Multiaddr;

use super::error::ConnectionManagerError;
use crate::{
    net_address::{extract_peer_id, DialAddress},
    peer_id::PeerId,
};

/// What to dial: either a known peer (addresses come from the address book) or an explicit set
/// of addresses, optionally annotated with the peer id they are expected to authenticate as.
#[derive(Debug, Clone)]
pub enum DialTarget {
    Peer(PeerId),
    Addresses {
        peer_id: Option<PeerId>,
        addresses: Vec<DialAddress>,
    },
}

impl DialTarget {
    pub fn peer(peer_id: PeerId) -> Self {
        DialTarget::Peer(peer_id)
    }

    /// Dial the given addresses. If any address embeds a `/p2p/` peer id, all embedded peer ids
    /// must agree and the dial will expect the remote to authenticate as that peer.
    pub fn addresses<I: IntoIterator<Item = DialAddress>>(addresses: I) -> Result<Self, ConnectionManagerError> {
        let addresses = addresses.into_iter().collect::<Vec<_>>();
        if addresses.is_empty() {
            return Err(ConnectionManagerError::NoValidAddresses);
        }

        let mut peer_id = None;
        for addr in &addresses {
            if let Some(embedded) = extract_peer_id(&addr.address) {
                match peer_id {
                    None => peer_id = Some(embedded),
                    Some(existing) if existing == embedded => {},
                    Some(existing) => {
                        return Err(ConnectionManagerError::InvalidDialTarget(format!(
                            "addresses embed conflicting peer ids '{}' and '{}'",
                            existing, embedded
                        )));
                    },
                }
            }
        }

        Ok(DialTarget::Addresses { peer_id, addresses })
    }

    /// Dial an explicit address set on behalf of a known peer. Any embedded peer id must match.
    pub fn peer_with_addresses<I: IntoIterator<Item = DialAddress>>(
        peer_id: PeerId,
        addresses: I,
    ) -> Result<Self, ConnectionManagerError> {
        match Self::addresses(addresses)? {
            DialTarget::Addresses {
                peer_id: Some(embedded), ..
            } if embedded != peer_id => Err(ConnectionManagerError::InvalidDialTarget(format!(
                "addresses embed peer id '{}' but the dial is for peer '{}'",
                embedded, peer_id
            ))),
            DialTarget::Addresses { addresses, .. } => Ok(DialTarget::Addresses {
                peer_id: Some(peer_id),
                addresses,
            }),
            DialTarget::Peer(_) => unreachable!("addresses() only returns DialTarget::Addresses"),
        }
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            DialTarget::Peer(peer_id) => Some(*peer_id),
            DialTarget::Addresses { peer_id, .. } => *peer_id,
        }
    }

    /// The key under which concurrent dials to this target are coalesced. Targets with a known
    /// peer id coalesce by peer id; anonymous address dials coalesce only on an identical
    /// address set.
    pub fn dial_key(&self) -> DialKey {
        match self.peer_id() {
            Some(peer_id) => DialKey::Peer(peer_id),
            None => match self {
                DialTarget::Addresses { addresses, .. } => {
                    let mut keys = addresses
                        .iter()
                        .map(|addr| addr.address.to_string())
                        .collect::<Vec<_>>();
                    keys.sort();
                    keys.dedup();
                    DialKey::Addresses(keys)
                },
                DialTarget::Peer(_) => unreachable!("DialTarget::Peer always has a peer id"),
            },
        }
    }
}

impl From<PeerId> for DialTarget {
    fn from(peer_id: PeerId) -> Self {
        DialTarget::Peer(peer_id)
    }
}

impl TryFrom<Multiaddr> for DialTarget {
    type Error = ConnectionManagerError;

    fn try_from(address: Multiaddr) -> Result<Self, Self::Error> {
        Self::addresses([DialAddress::from(address)])
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialTarget::Peer(peer_id) => write!(f, "peer {}", peer_id.short_str()),
            DialTarget::Addresses {
                peer_id: Some(peer_id),
                addresses,
            } => write!(f, "peer {} ({} address(es))", peer_id.short_str(), addresses.len()),
            DialTarget::Addresses { peer_id: None, addresses } => {
                write!(f, "{} address(es)", addresses.len())
            },
        }
    }
}

/// Identity of an in-flight dial. Two dial requests with the same key share a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DialKey {
    Peer(PeerId),
    Addresses(Vec<String>),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{net_address::with_peer_id, node_identity::NodeIdentity};

    fn addr(s: &str) -> DialAddress {
        DialAddress::from(s.parse::<Multiaddr>().unwrap())
    }

    #[test]
    fn extracts_embedded_peer_id() {
        let identity = NodeIdentity::random().unwrap();
        let address = with_peer_id(&"/memory/1".parse().unwrap(), identity.peer_id());
        let target = DialTarget::addresses([DialAddress::from(address)]).unwrap();
        assert_eq!(target.peer_id(), Some(*identity.peer_id()));
    }

    #[test]
    fn rejects_conflicting_embedded_peer_ids() {
        let a = NodeIdentity::random().unwrap();
        let b = NodeIdentity::random().unwrap();
        let addr_a = with_peer_id(&"/memory/1".parse().unwrap(), a.peer_id());
        let addr_b = with_peer_id(&"/memory/2".parse().unwrap(), b.peer_id());
        let err = DialTarget::addresses([DialAddress::from(addr_a), DialAddress::from(addr_b)]).unwrap_err();
        assert!(matches!(err, ConnectionManagerError::InvalidDialTarget(_)));
    }

    #[test]
    fn rejects_empty_address_set() {
        let err = DialTarget::addresses([]).unwrap_err();
        assert!(matches!(err, ConnectionManagerError::NoValidAddresses));
    }

    #[test]
    fn address_key_is_order_insensitive() {
        let target_a = DialTarget::addresses([addr("/memory/1"), addr("/memory/2")]).unwrap();
        let target_b = DialTarget::addresses([addr("/memory/2"), addr("/memory/1")]).unwrap();
        assert_eq!(target_a.dial_key(), target_b.dial_key());
    }

    #[test]
    fn peer_key_ignores_addresses() {
        let identity = NodeIdentity::random().unwrap();
        let target_a = DialTarget::peer(*identity.peer_id());
        let target_b =
            DialTarget::peer_with_addresses(*identity.peer_id(), [addr("/memory/1")]).unwrap();
        assert_eq!(target_a.dial_key(), target_b.dial_key());
    }
}
