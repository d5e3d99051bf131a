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

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    net_address::{dedup_addresses, DialAddress},
    peer_id::PeerId,
};

/// Peers tagged with this are protected from pruning and preferred by the auto dialer.
pub const KEEP_ALIVE_TAG: &str = "keep-alive";

#[derive(Debug, Error)]
pub enum AddressBookError {
    #[error("Address book backend error: {0}")]
    BackendError(String),
}

/// The peer address store consumed by the dial queue and the connection manager satellites.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Known addresses for the peer, most recently confirmed first.
    async fn get(&self, peer_id: &PeerId) -> Result<Vec<DialAddress>, AddressBookError>;

    /// Merge the given addresses into the peer's entry, de-duplicating by canonical form.
    async fn merge(&self, peer_id: &PeerId, addresses: Vec<DialAddress>) -> Result<(), AddressBookError>;

    /// All known peers with their addresses, in insertion order.
    async fn all(&self) -> Result<Vec<(PeerId, Vec<DialAddress>)>, AddressBookError>;

    async fn has_tag(&self, peer_id: &PeerId, tag: &str) -> Result<bool, AddressBookError>;

    async fn set_tag(&self, peer_id: &PeerId, tag: &str) -> Result<(), AddressBookError>;
}

#[derive(Debug, Default)]
struct PeerEntry {
    addresses: Vec<DialAddress>,
    tags: HashSet<String>,
}

/// In-memory [AddressBook]. The default store and the one used throughout the tests.
#[derive(Debug, Default)]
pub struct MemoryAddressBook {
    entries: RwLock<Vec<(PeerId, PeerEntry)>>,
}

impl MemoryAddressBook {
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait]
impl AddressBook for MemoryAddressBook {
    async fn get(&self, peer_id: &PeerId) -> Result<Vec<DialAddress>, AddressBookError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|(id, _)| id == peer_id)
            .map(|(_, entry)| entry.addresses.clone())
            .unwrap_or_default())
    }

    async fn merge(&self, peer_id: &PeerId, addresses: Vec<DialAddress>) -> Result<(), AddressBookError> {
        let mut entries = self.entries.write().await;
        let entry = match entries.iter_mut().find(|(id, _)| id == peer_id) {
            Some((_, entry)) => entry,
            None => {
                entries.push((*peer_id, PeerEntry::default()));
                &mut entries.last_mut().expect("just pushed").1
            },
        };
        let mut merged = entry.addresses.clone();
        merged.extend(addresses);
        entry.addresses = dedup_addresses(merged);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<(PeerId, Vec<DialAddress>)>, AddressBookError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .map(|(id, entry)| (*id, entry.addresses.clone()))
            .collect())
    }

    async fn has_tag(&self, peer_id: &PeerId, tag: &str) -> Result<bool, AddressBookError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|(id, _)| id == peer_id)
            .map(|(_, entry)| entry.tags.contains(tag))
            .unwrap_or(false))
    }

    async fn set_tag(&self, peer_id: &PeerId, tag: &str) -> Result<(), AddressBookError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|(id, _)| id == peer_id) {
            Some((_, entry)) => {
                entry.tags.insert(tag.to_string());
            },
            None => {
                let mut entry = PeerEntry::default();
                entry.tags.insert(tag.to_string());
                entries.push((*peer_id, entry));
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_peer(seed: u8) -> PeerId {
        PeerId::from_public_key(&[seed; 32])
    }

    #[tokio::test]
    async fn merge_dedups_and_preserves_order() {
        let book = MemoryAddressBook::new();
        let peer = test_peer(1);
        let addr1: multiaddr::Multiaddr = "/memory/1".parse().unwrap();
        let addr2: multiaddr::Multiaddr = "/memory/2".parse().unwrap();

        book.merge(&peer, vec![DialAddress::new(addr1.clone())]).await.unwrap();
        book.merge(&peer, vec![
            DialAddress::certified(addr1.clone()),
            DialAddress::new(addr2.clone()),
        ])
        .await
        .unwrap();

        let addrs = book.get(&peer).await.unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].address, addr1);
        assert!(addrs[0].certified);
        assert_eq!(addrs[1].address, addr2);
    }

    #[tokio::test]
    async fn tags() {
        let book = MemoryAddressBook::new();
        let peer = test_peer(2);
        assert!(!book.has_tag(&peer, KEEP_ALIVE_TAG).await.unwrap());
        book.set_tag(&peer, KEEP_ALIVE_TAG).await.unwrap();
        assert!(book.has_tag(&peer, KEEP_ALIVE_TAG).await.unwrap());
    }

    #[tokio::test]
    async fn all_lists_peers_in_insertion_order() {
        let book = MemoryAddressBook::new();
        for seed in 0..4u8 {
            book.merge(&test_peer(seed), vec![DialAddress::new(
                format!("/memory/{}", seed).parse().unwrap(),
            )])
            .await
            .unwrap();
        }
        let all = book.all().await.unwrap();
        let peers = all.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        assert_eq!(peers, (0..4u8).map(test_peer).collect::<Vec<_>>());
    }
}
