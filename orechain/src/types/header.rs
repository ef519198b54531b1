//! Raw-field block header and its structural validation.
//!
//! The header mirrors the block's scalar fields as plain byte sequences:
//! hashes and the nonce as raw bytes (empty meaning absent), the timestamp
//! as its formatted text. That makes it the natural carrier for the wire
//! format and lets `validate` rebuild the exact canonical bytes behind the
//! pre-evaluation hash without knowing the transaction type.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, Value};
use crate::error::BlockValidationError;
use crate::hashcash;
use crate::types::BlockHash;

/// How far into the future a block timestamp may sit, in seconds.
pub const MAX_FUTURE_TIMESTAMP_SKEW_SECS: i64 = 15;

/// Pinned timestamp layout: exactly six fractional digits and a literal `Z`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Length of a well-formed timestamp string, e.g. `2019-01-01T00:00:00.000000Z`.
const TIMESTAMP_LEN: usize = 27;

/// Formats an instant in the consensus timestamp layout.
///
/// Sub-microsecond precision is truncated; the output always carries six
/// fractional digits.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a consensus timestamp, rejecting every other layout.
///
/// Three-digit (millisecond) or nine-digit (nanosecond) fractions hash
/// differently and are refused rather than silently normalised.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if text.len() != TIMESTAMP_LEN {
        return None;
    }
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Canonical bytes hashed for a block, assembled from raw header fields.
///
/// The dictionary carries, in sorted key order: `difficulty`, `index`,
/// `nonce`, `previous_hash`, `reward_beneficiary`, `state_root_hash`,
/// `timestamp`, `transaction_fingerprint`. Empty optional fields contribute
/// no key at all; changing this key set or the encoding breaks consensus.
#[allow(clippy::too_many_arguments)]
pub(crate) fn hash_payload(
    index: i64,
    difficulty: i64,
    nonce: &[u8],
    miner: &[u8],
    previous_hash: &[u8],
    timestamp: &str,
    tx_hash: &[u8],
    state_root_hash: &[u8],
) -> Vec<u8> {
    let mut fields: BTreeMap<Vec<u8>, Value> = BTreeMap::new();
    fields.insert(b"difficulty".to_vec(), Value::integer(difficulty));
    fields.insert(b"index".to_vec(), Value::integer(index));
    fields.insert(b"nonce".to_vec(), Value::bytes(nonce.to_vec()));
    if !previous_hash.is_empty() {
        fields.insert(b"previous_hash".to_vec(), Value::bytes(previous_hash.to_vec()));
    }
    if !miner.is_empty() {
        fields.insert(b"reward_beneficiary".to_vec(), Value::bytes(miner.to_vec()));
    }
    if !state_root_hash.is_empty() {
        fields.insert(
            b"state_root_hash".to_vec(),
            Value::bytes(state_root_hash.to_vec()),
        );
    }
    fields.insert(b"timestamp".to_vec(), Value::bytes(timestamp.as_bytes().to_vec()));
    if !tx_hash.is_empty() {
        fields.insert(
            b"transaction_fingerprint".to_vec(),
            Value::bytes(tx_hash.to_vec()),
        );
    }
    codec::encode(&Value::Dict(fields))
}

/// Flat, raw-field projection of a block's scalar header.
///
/// Optional fields are represented as possibly-empty byte vectors: an empty
/// `previous_hash` means the block is genesis, an empty `state_root_hash`
/// means the block has not been evaluated yet, and so on.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height of the block; genesis is 0.
    pub index: i64,
    /// Difficulty target this block had to beat.
    pub difficulty: i64,
    /// Cumulative difficulty up to and including this block.
    pub total_difficulty: i128,
    /// Proof-of-work nonce found by mining; may be empty.
    pub nonce: Vec<u8>,
    /// Reward beneficiary address; empty when absent.
    pub miner: Vec<u8>,
    /// Hash of the previous block; empty at genesis.
    pub previous_hash: Vec<u8>,
    /// Formatted UTC timestamp with microsecond precision.
    pub timestamp: String,
    /// Fingerprint of the id-sorted signed transactions; empty when the
    /// block carries none.
    pub tx_hash: Vec<u8>,
    /// Hash committing to the block before state execution.
    pub pre_evaluation_hash: Vec<u8>,
    /// Commitment to the post-execution state; empty until evaluated.
    pub state_root_hash: Vec<u8>,
    /// Hash committing to the block including the state root.
    pub hash: Vec<u8>,
}

impl BlockHeader {
    /// Canonical bytes whose SHA-256 digest must reproduce
    /// [`pre_evaluation_hash`](BlockHeader::pre_evaluation_hash).
    pub fn pre_evaluation_bytes(&self) -> Vec<u8> {
        hash_payload(
            self.index,
            self.difficulty,
            &self.nonce,
            &self.miner,
            &self.previous_hash,
            &self.timestamp,
            &self.tx_hash,
            &[],
        )
    }

    /// Runs the cheap structural checks plus the proof-of-work check.
    ///
    /// Rules, in the order they are reported:
    ///
    /// 1. the index is non-negative,
    /// 2. the difficulty is non-negative and zero exactly at genesis,
    /// 3. the timestamp parses and is at most
    ///    [`MAX_FUTURE_TIMESTAMP_SKEW_SECS`] ahead of `current_time`,
    /// 4. a previous hash is present exactly when the index is positive,
    /// 5. the rebuilt canonical bytes hash to `pre_evaluation_hash` and that
    ///    digest beats the difficulty.
    pub fn validate(&self, current_time: DateTime<Utc>) -> Result<(), BlockValidationError> {
        if self.index < 0 {
            return Err(BlockValidationError::Index { index: self.index });
        }

        let genesis = self.index == 0;
        if self.difficulty < 0 || genesis != (self.difficulty == 0) {
            return Err(BlockValidationError::Difficulty {
                index: self.index,
                difficulty: self.difficulty,
            });
        }

        let limit = current_time + Duration::seconds(MAX_FUTURE_TIMESTAMP_SKEW_SECS);
        match parse_timestamp(&self.timestamp) {
            Some(timestamp) if timestamp <= limit => {}
            _ => {
                return Err(BlockValidationError::Timestamp {
                    timestamp: self.timestamp.clone(),
                    limit: format_timestamp(&limit),
                });
            }
        }

        if genesis == !self.previous_hash.is_empty() {
            return Err(BlockValidationError::PreviousHash {
                index: self.index,
                present: !self.previous_hash.is_empty(),
            });
        }

        let digest = BlockHash::compute(&self.pre_evaluation_bytes());
        if digest.as_bytes() != self.pre_evaluation_hash.as_slice()
            || !hashcash::satisfies(&digest, self.difficulty)
        {
            return Err(BlockValidationError::Nonce {
                difficulty: self.difficulty,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::types::{ADDRESS_LEN, HASH_LEN};

    fn past_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
    }

    /// Header whose proof-of-work section is internally consistent.
    fn consistent_header(index: i64, difficulty: i64) -> BlockHeader {
        let previous_hash = if index == 0 {
            Vec::new()
        } else {
            vec![0x99; HASH_LEN]
        };
        let timestamp = format_timestamp(&past_time());
        let payload = hash_payload(
            index,
            difficulty,
            &[],
            &[0x0a; ADDRESS_LEN],
            &previous_hash,
            &timestamp,
            &[],
            &[],
        );
        let pre_evaluation_hash = BlockHash::compute(&payload).as_bytes().to_vec();

        BlockHeader {
            index,
            difficulty,
            total_difficulty: difficulty as i128,
            nonce: Vec::new(),
            miner: vec![0x0a; ADDRESS_LEN],
            previous_hash,
            timestamp,
            tx_hash: Vec::new(),
            pre_evaluation_hash: pre_evaluation_hash.clone(),
            state_root_hash: Vec::new(),
            hash: pre_evaluation_hash,
        }
    }

    #[test]
    fn timestamp_format_round_trips_at_microsecond_precision() {
        let instant = Utc.with_ymd_and_hms(2021, 9, 6, 4, 46, 39).unwrap()
            + Duration::microseconds(123_456);
        let text = format_timestamp(&instant);
        assert_eq!(text, "2021-09-06T04:46:39.123456Z");
        assert_eq!(parse_timestamp(&text), Some(instant));
    }

    #[test]
    fn parse_rejects_other_precisions() {
        assert!(parse_timestamp("2019-01-01T00:00:00.000000Z").is_some());
        // Milliseconds, nanoseconds, no fraction, or a missing Z all fail.
        assert!(parse_timestamp("2019-01-01T00:00:00.000Z").is_none());
        assert!(parse_timestamp("2019-01-01T00:00:00.000000000Z").is_none());
        assert!(parse_timestamp("2019-01-01T00:00:00Z").is_none());
        assert!(parse_timestamp("2019-01-01T00:00:00.000000").is_none());
        assert!(parse_timestamp("2019-01-01 00:00:00.000000Z").is_none());
    }

    #[test]
    fn genesis_header_validates() {
        let header = consistent_header(0, 0);
        assert!(header.validate(past_time()).is_ok());
    }

    #[test]
    fn negative_index_is_rejected_first() {
        let mut header = consistent_header(0, 0);
        header.index = -1;
        assert_eq!(
            header.validate(past_time()),
            Err(BlockValidationError::Index { index: -1 })
        );
    }

    #[test]
    fn difficulty_zero_is_genesis_only() {
        // Non-genesis block with zero difficulty.
        let mut header = consistent_header(1, 1);
        header.difficulty = 0;
        assert!(matches!(
            header.validate(past_time()),
            Err(BlockValidationError::Difficulty { index: 1, difficulty: 0 })
        ));

        // Genesis block with nonzero difficulty.
        let mut header = consistent_header(0, 0);
        header.difficulty = 5;
        assert!(matches!(
            header.validate(past_time()),
            Err(BlockValidationError::Difficulty { index: 0, difficulty: 5 })
        ));
    }

    #[test]
    fn future_timestamp_is_rejected_beyond_the_skew() {
        let header = consistent_header(0, 0);

        // Validating against a clock 20 s before the block's timestamp puts
        // the block past the 15 s allowance.
        let early = past_time() - Duration::seconds(20);
        assert!(matches!(
            header.validate(early),
            Err(BlockValidationError::Timestamp { .. })
        ));

        // 10 s of skew is inside the allowance.
        let close = past_time() - Duration::seconds(10);
        assert!(header.validate(close).is_ok());
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let mut header = consistent_header(0, 0);
        header.timestamp = "2019-01-01T00:00:00.000Z".to_string();
        assert!(matches!(
            header.validate(past_time()),
            Err(BlockValidationError::Timestamp { .. })
        ));
    }

    #[test]
    fn previous_hash_presence_must_match_the_index() {
        let mut header = consistent_header(0, 0);
        header.previous_hash = vec![0x11; HASH_LEN];
        assert_eq!(
            header.validate(past_time()),
            Err(BlockValidationError::PreviousHash { index: 0, present: true })
        );

        let mut header = consistent_header(3, 2);
        header.previous_hash = Vec::new();
        assert_eq!(
            header.validate(past_time()),
            Err(BlockValidationError::PreviousHash { index: 3, present: false })
        );
    }

    #[test]
    fn tampered_pre_evaluation_hash_fails_the_nonce_check() {
        let mut header = consistent_header(0, 0);
        header.pre_evaluation_hash[0] ^= 0x01;
        assert_eq!(
            header.validate(past_time()),
            Err(BlockValidationError::Nonce { difficulty: 0 })
        );
    }

    #[test]
    fn tampered_field_invalidates_the_recorded_hash() {
        // Changing any hashed field changes the canonical bytes, so the
        // recorded pre-evaluation hash no longer reproduces.
        let mut header = consistent_header(3, 2);
        header.miner = vec![0x0b; ADDRESS_LEN];
        assert!(matches!(
            header.validate(past_time()),
            Err(BlockValidationError::Nonce { .. })
        ));
    }

    #[test]
    fn payload_omits_absent_optionals() {
        let with_state_root = hash_payload(
            0,
            0,
            &[],
            &[],
            &[],
            "2019-01-01T00:00:00.000000Z",
            &[],
            &[0x22; HASH_LEN],
        );
        let without = hash_payload(0, 0, &[], &[], &[], "2019-01-01T00:00:00.000000Z", &[], &[]);

        assert_ne!(with_state_root, without);
        // The absent form carries no key, not an empty value.
        let needle = b"state_root_hash";
        assert!(!without
            .windows(needle.len())
            .any(|window| window == needle));
    }
}
