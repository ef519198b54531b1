//! Core domain types used by the block core
//!
//! This module defines strongly-typed hashes, addresses, transaction
//! identifiers, and mining nonces that are shared across the crate. The goal
//! is to avoid "naked" byte buffers in public APIs and instead use
//! domain-specific newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Block construction, mining, validation, and evaluation.
pub mod block;

/// Raw-field header projection and its structural validation.
pub mod header;

/// Transport and propagation projections of a block.
pub mod raw;

/// Transaction contract required by the block core.
pub mod tx;

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Length in bytes of an account address.
pub const ADDRESS_LEN: usize = 20;

/// Strongly-typed 256-bit block hash (SHA-256).
///
/// This type is the backing representation for every fixed-size digest the
/// block core derives: the pre-evaluation hash, the final block hash, the
/// transaction fingerprint, and the state root commitment. It is always
/// exactly [`HASH_LEN`] bytes long.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; HASH_LEN]);

impl BlockHash {
    /// Computes a new [`BlockHash`] as the SHA-256 digest of `data`.
    ///
    /// The result is deterministic for a given byte slice. All hashing in
    /// the crate goes through this method so the digest algorithm cannot
    /// drift between call sites.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        BlockHash(out)
    }

    /// Returns the underlying 32-byte digest as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Rebuilds a hash from a byte slice, if it has the right length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(BlockHash(arr))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Transaction identifier (SHA-256 of the signed transaction payload).
///
/// Identifiers compare as big-endian byte strings; the derived ordering is
/// the canonical pre-order used for the transaction fingerprint and the
/// transport form of a block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; HASH_LEN]);

impl TxId {
    /// Returns the underlying 32-byte identifier as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Rebuilds an identifier from a byte slice, if it has the right length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(TxId(arr))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Account address: a 20-byte identifier derived from the holder's key.
///
/// The derivation scheme belongs to the transaction layer; the block core
/// only carries addresses around (miner, signers, touched accounts) and
/// orders them by their raw bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Returns the underlying 20-byte address as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Rebuilds an address from a byte slice, if it has the right length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().ok()?;
        Some(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Proof-of-work nonce of arbitrary length, as found by mining.
///
/// The empty nonce is a legitimate value: it is what genesis blocks carry
/// and what the search returns when the difficulty is trivial.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Nonce(pub Vec<u8>);

impl Nonce {
    /// Returns the raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the nonce length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the empty nonce.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Nonce {
    fn from(bytes: Vec<u8>) -> Self {
        Nonce(bytes)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_deterministic_sha256() {
        let h1 = BlockHash::compute(b"hello world");
        let h2 = BlockHash::compute(b"hello world");
        assert_eq!(h1, h2);

        // Well-known SHA-256 vector for the empty input.
        let empty = BlockHash::compute(b"");
        assert_eq!(
            empty.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn from_slice_enforces_lengths() {
        assert!(BlockHash::from_slice(&[0u8; HASH_LEN]).is_some());
        assert!(BlockHash::from_slice(&[0u8; HASH_LEN - 1]).is_none());
        assert!(Address::from_slice(&[0u8; ADDRESS_LEN]).is_some());
        assert!(Address::from_slice(&[0u8; HASH_LEN]).is_none());
        assert!(TxId::from_slice(&[]).is_none());
    }

    #[test]
    fn tx_ids_order_as_big_endian_byte_strings() {
        let mut low = [0u8; HASH_LEN];
        let mut high = [0u8; HASH_LEN];
        low[0] = 0x01;
        high[0] = 0x02;
        assert!(TxId(low) < TxId(high));

        // The first differing byte decides, like big-endian integers.
        let mut a = [0xffu8; HASH_LEN];
        let mut b = [0xffu8; HASH_LEN];
        a[HASH_LEN - 1] = 0x00;
        b[0] = 0x00;
        assert!(b < a);
    }

    #[test]
    fn display_renders_lowercase_hex() {
        let addr = Address([0xab; ADDRESS_LEN]);
        assert_eq!(addr.to_string(), "ab".repeat(ADDRESS_LEN));

        let nonce = Nonce(vec![0x01, 0x2f]);
        assert_eq!(nonce.to_string(), "012f");
        assert_eq!(Nonce::default().to_string(), "");
    }
}
