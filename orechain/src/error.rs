//! Error types surfaced by block validation, decoding, and evaluation.

use std::collections::BTreeSet;
use std::fmt;

use crate::codec::DecodeError;
use crate::types::tx::TxError;
use crate::types::{Address, TxId};

/// Error type returned when a block fails structural validation.
///
/// Validation stops at the first failing rule, so a block with several
/// defects reports only the earliest one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlockValidationError {
    /// Height is negative.
    Index { index: i64 },
    /// Difficulty is negative, zero outside genesis, or nonzero at genesis.
    Difficulty { index: i64, difficulty: i64 },
    /// The canonical bytes do not reproduce the pre-evaluation hash, or its
    /// digest does not beat the difficulty.
    Nonce { difficulty: i64 },
    /// Timestamp is malformed or further in the future than the tolerated
    /// clock skew.
    Timestamp { timestamp: String, limit: String },
    /// Previous-hash presence disagrees with the height.
    PreviousHash { index: i64, present: bool },
    /// Recorded transaction fingerprint disagrees with the recomputed one.
    TxHash { expected: String, actual: String },
    /// Recorded block hash disagrees with the recomputed one.
    Hash { expected: String, actual: String },
    /// A transaction sits outside the canonical evaluation order.
    TxOrdering { position: usize },
}

impl fmt::Display for BlockValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockValidationError::Index { index } => {
                write!(f, "invalid block: negative index {index}")
            }
            BlockValidationError::Difficulty { index, difficulty } => {
                write!(
                    f,
                    "invalid block: difficulty {difficulty} is not allowed at index {index}"
                )
            }
            BlockValidationError::Nonce { difficulty } => {
                write!(
                    f,
                    "invalid block: nonce does not satisfy difficulty {difficulty}"
                )
            }
            BlockValidationError::Timestamp { timestamp, limit } => {
                write!(
                    f,
                    "invalid block: timestamp {timestamp} is malformed or later than {limit}"
                )
            }
            BlockValidationError::PreviousHash { index, present } => {
                if *present {
                    write!(f, "invalid block: genesis must not reference a previous hash")
                } else {
                    write!(f, "invalid block: index {index} requires a previous hash")
                }
            }
            BlockValidationError::TxHash { expected, actual } => {
                write!(
                    f,
                    "invalid block: tx hash {actual} does not match recomputed {expected}"
                )
            }
            BlockValidationError::Hash { expected, actual } => {
                write!(
                    f,
                    "invalid block: hash {actual} does not match recomputed {expected}"
                )
            }
            BlockValidationError::TxOrdering { position } => {
                write!(
                    f,
                    "invalid block: transaction at position {position} is out of canonical order"
                )
            }
        }
    }
}

impl std::error::Error for BlockValidationError {}

/// High-level errors that can occur while decoding, validating, or
/// evaluating a block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlockError {
    /// Underlying structural validation failure.
    Validation(BlockValidationError),
    /// Input bytes are not a canonically encoded block.
    Decoding(DecodeError),
    /// A transaction rejected itself during validation.
    Tx(TxError),
    /// Evaluation was requested on a block with no miner to credit.
    MissingMiner,
    /// A transaction touched addresses outside its declared set.
    InvalidTxUpdatedAddresses {
        tx_id: TxId,
        excess: BTreeSet<Address>,
    },
}

impl From<BlockValidationError> for BlockError {
    fn from(e: BlockValidationError) -> Self {
        BlockError::Validation(e)
    }
}

impl From<DecodeError> for BlockError {
    fn from(e: DecodeError) -> Self {
        BlockError::Decoding(e)
    }
}

impl From<TxError> for BlockError {
    fn from(e: TxError) -> Self {
        BlockError::Tx(e)
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::Validation(e) => write!(f, "{e}"),
            BlockError::Decoding(e) => write!(f, "{e}"),
            BlockError::Tx(e) => write!(f, "{e}"),
            BlockError::MissingMiner => {
                write!(f, "invalid block: evaluation requires a miner")
            }
            BlockError::InvalidTxUpdatedAddresses { tx_id, excess } => {
                let excess: Vec<String> = excess.iter().map(|a| a.to_string()).collect();
                write!(
                    f,
                    "transaction {tx_id} touched undeclared addresses: {}",
                    excess.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for BlockError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ADDRESS_LEN;
    use std::error::Error as StdError;

    #[test]
    fn validation_error_display_negative_index() {
        let err = BlockValidationError::Index { index: -3 };
        assert_eq!(err.to_string(), "invalid block: negative index -3");
    }

    #[test]
    fn validation_error_display_previous_hash_both_ways() {
        let err = BlockValidationError::PreviousHash { index: 0, present: true };
        assert_eq!(
            err.to_string(),
            "invalid block: genesis must not reference a previous hash"
        );

        let err = BlockValidationError::PreviousHash { index: 7, present: false };
        assert_eq!(err.to_string(), "invalid block: index 7 requires a previous hash");
    }

    #[test]
    fn block_error_wraps_validation_and_uses_same_message() {
        let v = BlockValidationError::Nonce { difficulty: 8 };
        let e: BlockError = v.into();
        assert_eq!(e.to_string(), "invalid block: nonce does not satisfy difficulty 8");
    }

    #[test]
    fn updated_addresses_error_names_the_excess() {
        let tx_id = TxId([0x11; 32]);
        let excess: BTreeSet<Address> = [Address([0xbb; ADDRESS_LEN])].into_iter().collect();
        let e = BlockError::InvalidTxUpdatedAddresses { tx_id, excess };
        assert_eq!(
            e.to_string(),
            format!(
                "transaction {} touched undeclared addresses: {}",
                "11".repeat(32),
                "bb".repeat(ADDRESS_LEN)
            )
        );
    }

    #[test]
    fn types_implement_std_error() {
        fn assert_is_error<E: StdError>() {}

        assert_is_error::<BlockValidationError>();
        assert_is_error::<BlockError>();
    }
}
