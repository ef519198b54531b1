// orechain/src/types/tx.rs

//! Transaction contract required by the block core.
//!
//! Blocks treat transactions as opaque: the core never inspects actions,
//! signatures, or payload layout. Everything it needs is expressed as the
//! capability set below - identity, ordering inputs, a canonical byte form,
//! self-validation, and the ability to run its actions one at a time.

use std::collections::BTreeSet;
use std::fmt;

use crate::codec::{self, DecodeError, Value};
use crate::evaluation::{AccountStateDelta, ActionEvaluation, StateStore};
use crate::types::{Address, BlockHash, TxId};

/// Error type a transaction can report about itself.
///
/// These are produced by [`Transaction::validate`] and propagated unchanged
/// through block validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TxError {
    /// Signature does not verify against the payload.
    InvalidSignature(String),
    /// Public key does not correspond to the signer address.
    InvalidPublicKey(String),
    /// Per-signer nonce is out of sequence.
    InvalidNonce { signer: Address, expected: i64, actual: i64 },
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::InvalidSignature(msg) => write!(f, "invalid tx signature: {msg}"),
            TxError::InvalidPublicKey(msg) => write!(f, "invalid tx public key: {msg}"),
            TxError::InvalidNonce { signer, expected, actual } => {
                write!(
                    f,
                    "invalid tx nonce for signer {signer}: expected {expected}, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for TxError {}

/// Capabilities the block core needs from a transaction.
///
/// Implementations should be deterministic: the canonical value of a
/// transaction must not depend on anything but the transaction itself, and
/// evaluating its actions twice over the same inputs must produce the same
/// evaluations.
pub trait Transaction: Clone {
    /// 32-byte transaction identifier.
    fn id(&self) -> TxId;

    /// Address of the account that signed the transaction.
    fn signer(&self) -> Address;

    /// Monotonic per-signer nonce.
    fn nonce(&self) -> i64;

    /// Addresses the transaction declares its actions will touch.
    fn updated_addresses(&self) -> BTreeSet<Address>;

    /// Canonical value of the transaction, with or without its signature.
    fn to_canonical_value(&self, signed: bool) -> Value;

    /// Canonical bytes of the transaction.
    ///
    /// The signed form is what blocks embed on the wire and fingerprint.
    fn serialize(&self, signed: bool) -> Vec<u8> {
        codec::encode(&self.to_canonical_value(signed))
    }

    /// Rebuilds a transaction from its signed canonical bytes.
    fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized;

    /// Checks the transaction's own integrity (signature, key, nonce).
    fn validate(&self) -> Result<(), TxError>;

    /// Executes the transaction's actions one at a time.
    ///
    /// `delta` is the view of the world as of the previous action (or the
    /// previous transaction, for the first action). The returned evaluations
    /// must be in action order and cumulative: each one's output states
    /// layer over the previous one's, so the last evaluation reflects every
    /// write the transaction made.
    fn evaluate_actions_gradually(
        &self,
        pre_evaluation_hash: &BlockHash,
        block_index: i64,
        delta: AccountStateDelta,
        miner: &Address,
        previous_states_trie: Option<&dyn StateStore>,
    ) -> Vec<ActionEvaluation>;
}
