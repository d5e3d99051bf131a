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

use blake2::{digest::consts::U32, Blake2b, Digest};
use data_encoding::HEXLOWER;
use thiserror::Error;

type PeerIdHasher = Blake2b<U32>;

/// The fixed byte length of a [PeerId].
pub const PEER_ID_LEN: usize = 32;

#[derive(Debug, Error, Clone)]
pub enum PeerIdError {
    #[error("Invalid peer id byte length {0}, expected {PEER_ID_LEN}")]
    InvalidLength(usize),
}

/// A globally unique peer identifier derived from the peer's static public key.
///
/// Immutable once created. Used as the primary key for connection tracking and dial
/// de-duplication.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Derive a peer id from a static public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let mut hasher = PeerIdHasher::new();
        hasher.update(public_key);
        Self(hasher.finalize().into())
    }

    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, PeerIdError> {
        let buf: [u8; PEER_ID_LEN] = bytes.try_into().map_err(|_| PeerIdError::InvalidLength(bytes.len()))?;
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An abbreviated hex form for log output.
    pub fn short_str(&self) -> String {
        HEXLOWER.encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short_str())
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let pk = [7u8; 32];
        assert_eq!(PeerId::from_public_key(&pk), PeerId::from_public_key(&pk));
        assert_ne!(PeerId::from_public_key(&pk), PeerId::from_public_key(&[8u8; 32]));
    }

    #[test]
    fn round_trip_bytes() {
        let id = PeerId::from_public_key(b"some public key");
        let id2 = PeerId::try_from_bytes(id.as_bytes()).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = PeerId::try_from_bytes(&[1, 2, 3]).unwrap_err();
        match err {
            PeerIdError::InvalidLength(3) => {},
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn display_is_hex() {
        let id = PeerId::try_from_bytes(&[0xab; 32]).unwrap();
        assert_eq!(id.to_string(), "ab".repeat(32));
        assert_eq!(id.short_str(), "abababab");
    }
}
