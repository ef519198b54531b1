//! SHA-256 proof-of-work primitives.
//!
//! Mining is a search over nonces: a stamp function renders a candidate
//! nonce into the canonical block bytes, and the SHA-256 digest of those
//! bytes, read as a 256-bit big-endian integer, must fall below
//! `2^256 / difficulty`. The search is deterministic - nonces are tried in
//! order of length and then numeric value - so two miners given the same
//! stamp and difficulty find the same nonce.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use primitive_types::U256;

use crate::types::{BlockHash, Nonce};

/// Shared cancellation flag for a proof-of-work search.
///
/// Clones observe the same flag, so the handle can be passed to the mining
/// thread while another thread keeps a clone to trip it.
#[derive(Clone, Debug, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    /// Creates a fresh, untripped flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every holder of the flag to stop searching.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Cancel::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Error type returned when a proof-of-work search is aborted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MineError {
    /// The cancellation flag was tripped before a nonce was found.
    Cancelled,
}

impl fmt::Display for MineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MineError::Cancelled => write!(f, "mining cancelled before a nonce was found"),
        }
    }
}

impl std::error::Error for MineError {}

/// Returns `true` if `digest`, read as a big-endian 256-bit integer, beats
/// `difficulty`, i.e. `digest < 2^256 / difficulty` as an exact rational
/// comparison.
///
/// A difficulty of zero or below is satisfied by every digest.
pub fn satisfies(digest: &BlockHash, difficulty: i64) -> bool {
    if difficulty <= 0 {
        return true;
    }
    let digest = U256::from_big_endian(digest.as_bytes());
    // digest < 2^256 / d  <=>  digest * d < 2^256, i.e. the product fits in
    // 256 bits. No widening or rounding needed.
    digest.checked_mul(U256::from(difficulty as u64)).is_some()
}

/// Searches for the smallest nonce whose stamped digest beats `difficulty`.
///
/// Candidates are tried by length first - the empty nonce, then every
/// one-byte nonce, then every two-byte nonce, and so on - and within a
/// length as a big-endian unsigned counter starting from zero. The first
/// satisfying candidate is therefore also the shortest one.
///
/// The cancellation flag is polled once per attempt; a tripped flag fails
/// the search with [`MineError::Cancelled`] and leaves no other trace. A
/// difficulty of zero or below returns the empty nonce immediately.
pub fn answer<F>(stamp: F, difficulty: i64, cancel: &Cancel) -> Result<Nonce, MineError>
where
    F: Fn(&[u8]) -> Vec<u8>,
{
    if difficulty <= 0 {
        return Ok(Nonce::default());
    }

    let mut attempts: u64 = 0;
    let mut nonce: Vec<u8> = Vec::new();
    loop {
        if cancel.is_cancelled() {
            tracing::warn!("proof-of-work search cancelled after {} attempts", attempts);
            return Err(MineError::Cancelled);
        }

        let digest = BlockHash::compute(&stamp(&nonce));
        attempts += 1;
        if satisfies(&digest, difficulty) {
            tracing::debug!(
                "proof-of-work search finished: attempts={}, nonce_len={}",
                attempts,
                nonce.len()
            );
            return Ok(Nonce(nonce));
        }

        advance(&mut nonce);
    }
}

/// Steps to the next candidate: big-endian increment, growing one byte when
/// the carry falls off the high end.
fn advance(nonce: &mut Vec<u8>) {
    for byte in nonce.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            return;
        }
    }
    let next_len = nonce.len() + 1;
    nonce.clear();
    nonce.resize(next_len, 0);
}
