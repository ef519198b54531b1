//! Transport and propagation projections of a block.
//!
//! [`RawBlock`] is the round-trip wire form: the raw-field header plus the
//! full signed serialization of every transaction, pinned to id order.
//! [`BlockDigest`] is the light form used for propagation: the same header
//! with transaction ids only, so a peer can decide what to fetch before
//! paying for the payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{DecodeError, Value};
use crate::types::header::BlockHeader;
use crate::types::TxId;

/// Key set of the wire header dictionary; anything else is rejected.
const HEADER_KEYS: [&[u8]; 11] = [
    b"difficulty",
    b"hash",
    b"index",
    b"nonce",
    b"pre_evaluation_hash",
    b"previous_hash",
    b"reward_beneficiary",
    b"state_root_hash",
    b"timestamp",
    b"total_difficulty",
    b"tx_hash",
];

/// Round-trip wire form of a block.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    /// Raw-field scalar header.
    pub header: BlockHeader,
    /// Signed canonical bytes of every transaction, in id order.
    pub transactions: Vec<Vec<u8>>,
}

impl RawBlock {
    /// Canonical dictionary form: `{"header": …, "transactions": […]}`.
    ///
    /// Optional header fields that are absent contribute no key, rather
    /// than a present-but-empty byte string.
    pub fn to_value(&self) -> Value {
        let mut header: BTreeMap<Vec<u8>, Value> = BTreeMap::new();
        header.insert(b"difficulty".to_vec(), Value::integer(self.header.difficulty));
        header.insert(b"hash".to_vec(), Value::bytes(self.header.hash.clone()));
        header.insert(b"index".to_vec(), Value::integer(self.header.index));
        header.insert(b"nonce".to_vec(), Value::bytes(self.header.nonce.clone()));
        header.insert(
            b"pre_evaluation_hash".to_vec(),
            Value::bytes(self.header.pre_evaluation_hash.clone()),
        );
        if !self.header.previous_hash.is_empty() {
            header.insert(
                b"previous_hash".to_vec(),
                Value::bytes(self.header.previous_hash.clone()),
            );
        }
        if !self.header.miner.is_empty() {
            header.insert(
                b"reward_beneficiary".to_vec(),
                Value::bytes(self.header.miner.clone()),
            );
        }
        if !self.header.state_root_hash.is_empty() {
            header.insert(
                b"state_root_hash".to_vec(),
                Value::bytes(self.header.state_root_hash.clone()),
            );
        }
        header.insert(
            b"timestamp".to_vec(),
            Value::bytes(self.header.timestamp.as_bytes().to_vec()),
        );
        header.insert(
            b"total_difficulty".to_vec(),
            Value::Integer(self.header.total_difficulty),
        );
        if !self.header.tx_hash.is_empty() {
            header.insert(b"tx_hash".to_vec(), Value::bytes(self.header.tx_hash.clone()));
        }

        let transactions = self
            .transactions
            .iter()
            .map(|payload| Value::bytes(payload.clone()))
            .collect();

        let mut block: BTreeMap<Vec<u8>, Value> = BTreeMap::new();
        block.insert(b"header".to_vec(), Value::Dict(header));
        block.insert(b"transactions".to_vec(), Value::List(transactions));
        Value::Dict(block)
    }

    /// Parses the canonical dictionary form.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let shape = |msg: &str| DecodeError::Shape(msg.to_string());

        let block = value.as_dict().ok_or_else(|| shape("block is not a dictionary"))?;
        for key in block.keys() {
            if key != b"header" && key != b"transactions" {
                return Err(shape("block carries an unknown key"));
            }
        }

        let header = block
            .get(b"header".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| shape("\"header\" is missing or not a dictionary"))?;
        for key in header.keys() {
            if !HEADER_KEYS.contains(&key.as_slice()) {
                return Err(shape("header carries an unknown key"));
            }
        }

        let integer = |key: &[u8]| {
            header
                .get(key)
                .and_then(|v| v.as_integer())
                .ok_or_else(|| shape("header integer field missing or mistyped"))
        };
        let required_bytes = |key: &[u8]| {
            header
                .get(key)
                .and_then(|v| v.as_bytes())
                .map(<[u8]>::to_vec)
                .ok_or_else(|| shape("header byte field missing or mistyped"))
        };
        // Absent optionals decode to empty, the raw form's "absent".
        let optional_bytes = |key: &[u8]| match header.get(key) {
            None => Ok(Vec::new()),
            Some(v) => v
                .as_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| shape("header byte field mistyped")),
        };

        let index = i64::try_from(integer(b"index")?)
            .map_err(|_| shape("header index out of range"))?;
        let difficulty = i64::try_from(integer(b"difficulty")?)
            .map_err(|_| shape("header difficulty out of range"))?;
        let total_difficulty = integer(b"total_difficulty")?;
        let timestamp = String::from_utf8(required_bytes(b"timestamp")?)
            .map_err(|_| shape("header timestamp is not UTF-8"))?;

        let transactions = block
            .get(b"transactions".as_slice())
            .and_then(|v| v.as_list())
            .ok_or_else(|| shape("\"transactions\" is missing or not a list"))?
            .iter()
            .map(|item| {
                item.as_bytes()
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| shape("transaction payload is not a byte string"))
            })
            .collect::<Result<Vec<Vec<u8>>, DecodeError>>()?;

        Ok(RawBlock {
            header: BlockHeader {
                index,
                difficulty,
                total_difficulty,
                nonce: required_bytes(b"nonce")?,
                miner: optional_bytes(b"reward_beneficiary")?,
                previous_hash: optional_bytes(b"previous_hash")?,
                timestamp,
                tx_hash: optional_bytes(b"tx_hash")?,
                pre_evaluation_hash: required_bytes(b"pre_evaluation_hash")?,
                state_root_hash: optional_bytes(b"state_root_hash")?,
                hash: required_bytes(b"hash")?,
            },
            transactions,
        })
    }
}

/// Propagation form of a block: header plus transaction ids.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockDigest {
    /// Raw-field scalar header.
    pub header: BlockHeader,
    /// Ids of the block's transactions, in id order.
    pub transaction_ids: Vec<TxId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::types::{HASH_LEN, TxId};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            index: 1,
            difficulty: 8,
            total_difficulty: 8,
            nonce: vec![0x2a],
            miner: vec![0x0a; 20],
            previous_hash: vec![0x99; HASH_LEN],
            timestamp: "2019-01-01T00:00:05.000000Z".to_string(),
            tx_hash: vec![0x33; HASH_LEN],
            pre_evaluation_hash: vec![0x44; HASH_LEN],
            state_root_hash: Vec::new(),
            hash: vec![0x55; HASH_LEN],
        }
    }

    #[test]
    fn raw_block_round_trips_through_the_codec() {
        let raw = RawBlock {
            header: sample_header(),
            transactions: vec![b"tx-one".to_vec(), b"tx-two".to_vec()],
        };

        let bytes = codec::encode(&raw.to_value());
        let decoded_value = codec::decode(&bytes).expect("canonical bytes");
        let decoded = RawBlock::from_value(&decoded_value).expect("shape");
        assert_eq!(decoded, raw);
    }

    #[test]
    fn absent_optionals_are_omitted_not_empty() {
        let mut header = sample_header();
        header.previous_hash = Vec::new();
        header.state_root_hash = Vec::new();
        let raw = RawBlock { header, transactions: Vec::new() };

        let value = raw.to_value();
        let header_dict = value
            .as_dict()
            .and_then(|d| d.get(b"header".as_slice()))
            .and_then(|v| v.as_dict())
            .expect("header dict");
        assert!(!header_dict.contains_key(b"previous_hash".as_slice()));
        assert!(!header_dict.contains_key(b"state_root_hash".as_slice()));
        assert!(header_dict.contains_key(b"nonce".as_slice()));

        // And they come back as empty (absent) after a round trip.
        let decoded = RawBlock::from_value(&value).expect("shape");
        assert!(decoded.header.previous_hash.is_empty());
        assert!(decoded.header.state_root_hash.is_empty());
    }

    #[test]
    fn unknown_header_keys_are_rejected() {
        let raw = RawBlock { header: sample_header(), transactions: Vec::new() };
        let mut value = raw.to_value();
        if let Value::Dict(block) = &mut value {
            if let Some(Value::Dict(header)) = block.get_mut(b"header".as_slice()) {
                header.insert(b"surprise".to_vec(), Value::integer(1));
            }
        }
        assert!(matches!(
            RawBlock::from_value(&value),
            Err(DecodeError::Shape(_))
        ));
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        let raw = RawBlock { header: sample_header(), transactions: Vec::new() };
        let mut value = raw.to_value();
        if let Value::Dict(block) = &mut value {
            if let Some(Value::Dict(header)) = block.get_mut(b"header".as_slice()) {
                header.insert(b"index".to_vec(), Value::bytes(*b"zero"));
            }
        }
        assert!(matches!(
            RawBlock::from_value(&value),
            Err(DecodeError::Shape(_))
        ));

        let mut value = raw.to_value();
        if let Value::Dict(block) = &mut value {
            block.insert(b"transactions".to_vec(), Value::integer(0));
        }
        assert!(matches!(
            RawBlock::from_value(&value),
            Err(DecodeError::Shape(_))
        ));
    }

    #[test]
    fn digest_serializes_to_json_for_tooling() {
        let digest = BlockDigest {
            header: sample_header(),
            transaction_ids: vec![TxId([0x11; HASH_LEN]), TxId([0x22; HASH_LEN])],
        };

        let json = serde_json::to_string(&digest).expect("digest should serialize");
        let back: BlockDigest = serde_json::from_str(&json).expect("digest should deserialize");
        assert_eq!(back, digest);
    }
}
