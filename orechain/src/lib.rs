//! Proof-of-work block core.
//!
//! This crate provides the consensus-critical heart of a permissionless
//! blockchain:
//!
//! - a canonical, self-delimiting value encoding (`codec`),
//! - SHA-256 hashcash and the deterministic nonce search (`hashcash`),
//! - strongly-typed domain types and the block itself (`types`),
//! - account-state views and per-action evaluation records (`evaluation`),
//! - and the error carriers shared across them (`error`).
//!
//! Everything here is pure with respect to its inputs: the only
//! long-running operation is mining, and the only way to interrupt it is
//! the cancellation flag it polls. Higher layers (chain selection, storage,
//! networking) compose these pieces; the core exposes no I/O surface.

pub mod codec;
pub mod error;
pub mod evaluation;
pub mod hashcash;
pub mod types;

// Re-export the codec value language.
pub use codec::{decode, encode, DecodeError, Value};

// Re-export error carriers.
pub use error::{BlockError, BlockValidationError};

// Re-export evaluation seams and records.
pub use evaluation::{
    AccountStateDelta, AccountStateView, ActionEvaluation, Currency, NullStateView, StateStore,
};

// Re-export hashcash primitives.
pub use hashcash::{answer, satisfies, Cancel, MineError};

// Re-export domain types at the crate root for convenience.
pub use types::block::{Block, PerTxEvaluations};
pub use types::header::{BlockHeader, MAX_FUTURE_TIMESTAMP_SKEW_SECS};
pub use types::raw::{BlockDigest, RawBlock};
pub use types::tx::{Transaction, TxError};
pub use types::{Address, BlockHash, Nonce, TxId, ADDRESS_LEN, HASH_LEN};
