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

//! Multiaddr helpers used by the dial pipeline and the inbound accept policy.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use multiaddr::{Multiaddr, Protocol};
use multihash::Multihash;

use crate::peer_id::PeerId;

/// Multihash code for an identity (raw) digest.
const IDENTITY_CODE: u64 = 0x0;

/// A candidate dial address. `certified` marks addresses that were signed by the peer they refer
/// to, as opposed to addresses learned second hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialAddress {
    pub address: Multiaddr,
    pub certified: bool,
}

impl DialAddress {
    pub fn new(address: Multiaddr) -> Self {
        Self {
            address,
            certified: false,
        }
    }

    pub fn certified(address: Multiaddr) -> Self {
        Self {
            address,
            certified: true,
        }
    }
}

impl From<Multiaddr> for DialAddress {
    fn from(address: Multiaddr) -> Self {
        Self::new(address)
    }
}

/// Comparator used to order candidate addresses before they are raced.
pub type AddressSorter = Arc<dyn Fn(&DialAddress, &DialAddress) -> Ordering + Send + Sync>;

/// The default sorter: public addresses before private/loopback ones, certified addresses first
/// within each class.
pub fn default_address_sorter() -> AddressSorter {
    Arc::new(|a, b| {
        let pub_a = is_public_address(&a.address);
        let pub_b = is_public_address(&b.address);
        pub_b
            .cmp(&pub_a)
            .then_with(|| b.certified.cmp(&a.certified))
    })
}

/// Remove duplicate addresses, comparing by canonical string form. The certified flag is merged:
/// an address is certified if any of its occurrences was. First-seen order is preserved.
pub fn dedup_addresses(addresses: Vec<DialAddress>) -> Vec<DialAddress> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<DialAddress> = Vec::with_capacity(addresses.len());
    for addr in addresses {
        match seen.get(&addr.address.to_string()) {
            Some(&idx) => {
                out[idx].certified |= addr.certified;
            },
            None => {
                seen.insert(addr.address.to_string(), out.len());
                out.push(addr);
            },
        }
    }
    out
}

/// Extract the peer id embedded in the address, if any. The last `/p2p/` segment wins.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter()
        .filter_map(|p| match p {
            Protocol::P2p(embedded) => {
                let hash: &Multihash<64> = embedded.as_ref();
                PeerId::try_from_bytes(hash.digest()).ok()
            },
            _ => None,
        })
        .last()
}

/// Append `/p2p/<peer id>` unless the address already carries a peer id or is a path-style
/// address.
pub fn with_peer_id(addr: &Multiaddr, peer_id: &PeerId) -> Multiaddr {
    if extract_peer_id(addr).is_some() || is_path_address(addr) {
        return addr.clone();
    }
    let hash = Multihash::<64>::wrap(IDENTITY_CODE, peer_id.as_bytes())
        .expect("a 32 byte digest always fits in a 64 byte multihash");
    let embedded =
        multiaddr::PeerId::from_multihash(hash).expect("an identity multihash is always a valid peer id");
    let mut addr = addr.clone();
    addr.push(Protocol::P2p(embedded));
    addr
}

/// Path-style addresses (unix sockets) are relative to the local host and never carry a peer id.
pub fn is_path_address(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::Unix(_)))
}

/// Whether the address refers to a publicly routable location. DNS names are assumed public;
/// in-memory addresses are always private.
pub fn is_public_address(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => {
            !ip.is_loopback() && !ip.is_private() && !ip.is_link_local() && !ip.is_unspecified()
        },
        Some(Protocol::Ip6(ip)) => {
            let segments = ip.segments();
            let is_unique_local = segments[0] & 0xfe00 == 0xfc00;
            let is_link_local = segments[0] & 0xffc0 == 0xfe80;
            !ip.is_loopback() && !ip.is_unspecified() && !is_unique_local && !is_link_local
        },
        Some(Protocol::Dns(_) | Protocol::Dns4(_) | Protocol::Dns6(_) | Protocol::Dnsaddr(_)) => true,
        _ => false,
    }
}

/// Extract the host component of a thin-waist address, used to key the inbound rate limiter.
/// Returns `None` for relayed or otherwise exotic addresses.
pub fn host_key(addr: &Multiaddr) -> Option<String> {
    match addr.iter().next()? {
        Protocol::Ip4(ip) => Some(ip.to_string()),
        Protocol::Ip6(ip) => Some(ip.to_string()),
        Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) | Protocol::Dnsaddr(host) => {
            Some(host.into_owned())
        },
        Protocol::Memory(port) => Some(format!("memory/{}", port)),
        _ => None,
    }
}

/// Match an address against a list of address prefixes, on protocol segment boundaries.
pub fn matches_any_prefix(addr: &Multiaddr, prefixes: &[Multiaddr]) -> bool {
    let addr = addr.to_string();
    prefixes.iter().any(|prefix| {
        let prefix = prefix.to_string();
        addr == prefix || addr.starts_with(&format!("{}/", prefix))
    })
}
