// orechain/src/types/block.rs

//! Block construction, mining, validation, and evaluation.
//!
//! A block commits to its contents twice. The pre-evaluation hash covers
//! everything known at mining time (the state root is deliberately absent),
//! which lets a miner search for a nonce before running a single action. The
//! final hash covers the state root as well. Transactions are kept in an
//! order derived from the pre-evaluation hash itself, so nobody can predict
//! their position before the nonce is found, yet every honest node derives
//! the same order afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, SubsecRound, Utc};
use primitive_types::U256;

use crate::codec::{self, DecodeError, Value};
use crate::error::{BlockError, BlockValidationError};
use crate::evaluation::{
    AccountStateDelta, AccountStateView, ActionEvaluation, NullStateView, StateStore,
};
use crate::hashcash::{self, Cancel, MineError};
use crate::types::header::{self, format_timestamp, parse_timestamp, BlockHeader};
use crate::types::raw::{BlockDigest, RawBlock};
use crate::types::tx::Transaction;
use crate::types::{Address, BlockHash, Nonce, TxId};

/// A mined or ingested block, generic over its transaction type.
///
/// Blocks are write-once: every field is derived at construction and only
/// read afterwards. `transactions` holds the canonical evaluation order;
/// the id-sorted order used for the fingerprint and the wire form is
/// recomputed on demand.
#[derive(Clone, Debug)]
pub struct Block<T> {
    index: i64,
    difficulty: i64,
    total_difficulty: i128,
    nonce: Nonce,
    miner: Option<Address>,
    previous_hash: Option<BlockHash>,
    timestamp: DateTime<Utc>,
    transactions: Vec<T>,
    tx_hash: Option<BlockHash>,
    pre_evaluation_hash: BlockHash,
    state_root_hash: Option<BlockHash>,
    hash: BlockHash,
    bytes_length: OnceLock<usize>,
}

impl<T: Transaction> Block<T> {
    /// Assembles a block from raw parts, deriving the fingerprint, both
    /// hashes, and the canonical transaction order.
    ///
    /// The incoming transaction order does not matter; any permutation of
    /// the same transactions yields an identical block. The timestamp is
    /// truncated to microseconds, the precision the canonical format can
    /// carry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: i64,
        difficulty: i64,
        total_difficulty: i128,
        nonce: Nonce,
        miner: Option<Address>,
        previous_hash: Option<BlockHash>,
        timestamp: DateTime<Utc>,
        transactions: Vec<T>,
        state_root_hash: Option<BlockHash>,
    ) -> Self {
        let timestamp = timestamp.trunc_subsecs(6);
        let timestamp_text = format_timestamp(&timestamp);

        // 1. Pin the id-sorted pre-order; it feeds the fingerprint.
        let mut txs = transactions;
        txs.sort_by_key(|tx| tx.id());

        // 2. Fingerprint the signed payloads.
        let tx_hash = fingerprint(&txs);

        // 3. Commit to the contents before any state execution.
        let pre_evaluation_hash = BlockHash::compute(&hash_bytes(
            index,
            difficulty,
            &nonce,
            miner.as_ref(),
            previous_hash.as_ref(),
            &timestamp_text,
            tx_hash.as_ref(),
            None,
        ));

        // 4. Reshuffle into the evaluation order derived from that
        //    commitment.
        let txs = canonical_order(txs, &pre_evaluation_hash);

        // 5. The full hash additionally covers the state root, when present.
        let hash = BlockHash::compute(&hash_bytes(
            index,
            difficulty,
            &nonce,
            miner.as_ref(),
            previous_hash.as_ref(),
            &timestamp_text,
            tx_hash.as_ref(),
            state_root_hash.as_ref(),
        ));

        Self {
            index,
            difficulty,
            total_difficulty,
            nonce,
            miner,
            previous_hash,
            timestamp,
            transactions: txs,
            tx_hash,
            pre_evaluation_hash,
            state_root_hash,
            hash,
            bytes_length: OnceLock::new(),
        }
    }

    /// Mines a new block on top of `previous_hash`.
    ///
    /// The search re-serialises as little as possible: the canonical bytes
    /// are rendered once with an empty nonce and once with a one-byte nonce,
    /// and the region where the two diverge is exactly the nonce's
    /// length-prefixed encoding. Each attempt then splices a candidate nonce
    /// between the shared prefix and suffix instead of re-encoding the whole
    /// dictionary.
    ///
    /// Fails with [`MineError::Cancelled`] when `cancel` is tripped; no
    /// partial block is produced.
    #[allow(clippy::too_many_arguments)]
    pub fn mine(
        index: i64,
        difficulty: i64,
        previous_total_difficulty: i128,
        miner: Address,
        previous_hash: Option<BlockHash>,
        timestamp: DateTime<Utc>,
        transactions: Vec<T>,
        cancel: &Cancel,
    ) -> Result<Self, MineError> {
        let timestamp = timestamp.trunc_subsecs(6);
        let timestamp_text = format_timestamp(&timestamp);

        let mut txs = transactions;
        txs.sort_by_key(|tx| tx.id());
        let tx_hash = fingerprint(&txs);

        tracing::debug!(
            "mining block: index={}, difficulty={}, txs={}",
            index,
            difficulty,
            txs.len()
        );

        // Stamp template. The two renderings agree up to the nonce value and
        // again after it; the empty nonce encodes as the two bytes `0:`.
        let empty_stamp = hash_bytes(
            index,
            difficulty,
            &Nonce::default(),
            Some(&miner),
            previous_hash.as_ref(),
            &timestamp_text,
            tx_hash.as_ref(),
            None,
        );
        let one_byte_stamp = hash_bytes(
            index,
            difficulty,
            &Nonce(vec![0x00]),
            Some(&miner),
            previous_hash.as_ref(),
            &timestamp_text,
            tx_hash.as_ref(),
            None,
        );
        let offset = common_prefix_len(&empty_stamp, &one_byte_stamp);
        debug_assert_eq!(&empty_stamp[offset..offset + 2], b"0:");
        let prefix = &empty_stamp[..offset];
        let suffix = &empty_stamp[offset + 2..];

        let nonce = hashcash::answer(
            |candidate: &[u8]| {
                let mut stamp =
                    Vec::with_capacity(prefix.len() + suffix.len() + candidate.len() + 8);
                stamp.extend_from_slice(prefix);
                stamp.extend_from_slice(candidate.len().to_string().as_bytes());
                stamp.push(b':');
                stamp.extend_from_slice(candidate);
                stamp.extend_from_slice(suffix);
                stamp
            },
            difficulty,
            cancel,
        )?;

        tracing::info!("mined block {}: nonce_len={}", index, nonce.len());

        Ok(Self::new(
            index,
            difficulty,
            previous_total_difficulty.saturating_add(difficulty as i128),
            nonce,
            Some(miner),
            previous_hash,
            timestamp,
            txs,
            None,
        ))
    }

    /// Re-wraps the block with a freshly computed state root.
    ///
    /// Everything up to the pre-evaluation commitment carries over
    /// unchanged; only the final hash is re-derived.
    pub fn with_state_root(&self, state_root_hash: BlockHash) -> Self {
        let hash = BlockHash::compute(&self.serialize_for_hash(Some(&state_root_hash)));
        Self {
            state_root_hash: Some(state_root_hash),
            hash,
            nonce: self.nonce.clone(),
            transactions: self.transactions.clone(),
            bytes_length: OnceLock::new(),
            ..*self
        }
    }

    /// Height of the block; genesis is 0.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Difficulty target this block had to beat.
    pub fn difficulty(&self) -> i64 {
        self.difficulty
    }

    /// Cumulative difficulty up to and including this block.
    pub fn total_difficulty(&self) -> i128 {
        self.total_difficulty
    }

    /// Proof-of-work nonce found by mining.
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Reward beneficiary, if one was recorded.
    pub fn miner(&self) -> Option<Address> {
        self.miner
    }

    /// Hash of the previous block; `None` at genesis.
    pub fn previous_hash(&self) -> Option<BlockHash> {
        self.previous_hash
    }

    /// Block timestamp, truncated to microseconds.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Transactions in the canonical evaluation order.
    pub fn transactions(&self) -> &[T] {
        &self.transactions
    }

    /// Fingerprint of the id-sorted signed transactions; `None` when empty.
    pub fn tx_hash(&self) -> Option<BlockHash> {
        self.tx_hash
    }

    /// Hash committing to the block before state execution.
    pub fn pre_evaluation_hash(&self) -> BlockHash {
        self.pre_evaluation_hash
    }

    /// Commitment to the post-execution state, once known.
    pub fn state_root_hash(&self) -> Option<BlockHash> {
        self.state_root_hash
    }

    /// Hash committing to the block including the state root.
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Canonical bytes hashed for this block with the given state root.
    pub fn serialize_for_hash(&self, state_root_hash: Option<&BlockHash>) -> Vec<u8> {
        hash_bytes(
            self.index,
            self.difficulty,
            &self.nonce,
            self.miner.as_ref(),
            self.previous_hash.as_ref(),
            &format_timestamp(&self.timestamp),
            self.tx_hash.as_ref(),
            state_root_hash,
        )
    }

    /// Raw-field projection of the scalar header.
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            index: self.index,
            difficulty: self.difficulty,
            total_difficulty: self.total_difficulty,
            nonce: self.nonce.as_bytes().to_vec(),
            miner: self
                .miner
                .map(|m| m.as_bytes().to_vec())
                .unwrap_or_default(),
            previous_hash: self
                .previous_hash
                .map(|h| h.as_bytes().to_vec())
                .unwrap_or_default(),
            timestamp: format_timestamp(&self.timestamp),
            tx_hash: self
                .tx_hash
                .map(|h| h.as_bytes().to_vec())
                .unwrap_or_default(),
            pre_evaluation_hash: self.pre_evaluation_hash.as_bytes().to_vec(),
            state_root_hash: self
                .state_root_hash
                .map(|h| h.as_bytes().to_vec())
                .unwrap_or_default(),
            hash: self.hash.as_bytes().to_vec(),
        }
    }

    /// Transport projection: header plus the signed serialization of every
    /// transaction, pinned to id order.
    pub fn to_raw_block(&self) -> RawBlock {
        let mut txs: Vec<&T> = self.transactions.iter().collect();
        txs.sort_by_key(|tx| tx.id());
        RawBlock {
            header: self.header(),
            transactions: txs.iter().map(|tx| tx.serialize(true)).collect(),
        }
    }

    /// Propagation projection: header plus transaction ids only.
    pub fn to_block_digest(&self) -> BlockDigest {
        let mut ids: Vec<TxId> = self.transactions.iter().map(|tx| tx.id()).collect();
        ids.sort();
        BlockDigest {
            header: self.header(),
            transaction_ids: ids,
        }
    }

    /// Canonical wire bytes of the whole block.
    ///
    /// The first call memoises the serialized length, which
    /// [`bytes_length`](Block::bytes_length) reads back for free.
    pub fn serialize(&self) -> Vec<u8> {
        let bytes = codec::encode(&self.to_raw_block().to_value());
        let _ = self.bytes_length.set(bytes.len());
        bytes
    }

    /// Length in bytes of the canonical serialization.
    ///
    /// Lazily computed; blocks built by [`deserialize`](Block::deserialize)
    /// already know it from the input.
    pub fn bytes_length(&self) -> usize {
        match self.bytes_length.get() {
            Some(length) => *length,
            None => self.serialize().len(),
        }
    }

    /// Decodes a canonical block.
    ///
    /// The constructor re-derives every hash and the transaction order from
    /// the decoded parts; recorded hashes that disagree with the re-derived
    /// ones mean the input was tampered with and are rejected as decoding
    /// errors. Recorded-but-empty optionals are treated as absent.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        let raw = RawBlock::from_value(&codec::decode(bytes)?)?;
        let block = Self::from_raw(raw)?;
        let _ = block.bytes_length.set(bytes.len());
        Ok(block)
    }

    fn from_raw(raw: RawBlock) -> Result<Self, BlockError> {
        let shape = |msg: &str| BlockError::Decoding(DecodeError::Shape(msg.to_string()));

        let timestamp = parse_timestamp(&raw.header.timestamp)
            .ok_or_else(|| shape("header timestamp is not in canonical form"))?;
        let miner = match raw.header.miner.as_slice() {
            [] => None,
            bytes => Some(
                Address::from_slice(bytes).ok_or_else(|| shape("reward beneficiary length"))?,
            ),
        };
        let previous_hash = match raw.header.previous_hash.as_slice() {
            [] => None,
            bytes => {
                Some(BlockHash::from_slice(bytes).ok_or_else(|| shape("previous hash length"))?)
            }
        };
        let state_root_hash = match raw.header.state_root_hash.as_slice() {
            [] => None,
            bytes => {
                Some(BlockHash::from_slice(bytes).ok_or_else(|| shape("state root length"))?)
            }
        };

        let transactions = raw
            .transactions
            .iter()
            .map(|payload| T::deserialize(payload))
            .collect::<Result<Vec<T>, DecodeError>>()?;

        let block = Self::new(
            raw.header.index,
            raw.header.difficulty,
            raw.header.total_difficulty,
            Nonce(raw.header.nonce),
            miner,
            previous_hash,
            timestamp,
            transactions,
            state_root_hash,
        );

        // Integrity: hashes the sender recorded must match what the decoded
        // parts re-derive to.
        let recorded_matches = |recorded: &[u8], derived: &BlockHash| {
            recorded.is_empty() || recorded == derived.as_bytes()
        };
        if !recorded_matches(&raw.header.pre_evaluation_hash, &block.pre_evaluation_hash) {
            return Err(shape("recorded pre-evaluation hash does not reproduce"));
        }
        if !recorded_matches(&raw.header.hash, &block.hash) {
            return Err(shape("recorded hash does not reproduce"));
        }
        match (raw.header.tx_hash.is_empty(), block.tx_hash) {
            (true, _) => {}
            (false, Some(derived)) if raw.header.tx_hash == derived.as_bytes() => {}
            _ => return Err(shape("recorded tx hash does not reproduce")),
        }

        Ok(block)
    }

    /// Runs every structural check against the block.
    pub fn validate(&self, current_time: DateTime<Utc>) -> Result<(), BlockError> {
        // 1. Header-level checks, including proof of work.
        self.header().validate(current_time)?;

        // 2. Every transaction must accept itself.
        for tx in &self.transactions {
            tx.validate()?;
        }

        // 3. Recorded fingerprint vs. the one recomputed from the payloads.
        let mut id_sorted: Vec<T> = self.transactions.clone();
        id_sorted.sort_by_key(|tx| tx.id());
        let recomputed = fingerprint(&id_sorted);
        if recomputed != self.tx_hash {
            return Err(BlockValidationError::TxHash {
                expected: hash_text(recomputed.as_ref()),
                actual: hash_text(self.tx_hash.as_ref()),
            }
            .into());
        }

        // 4. Both derived hashes must reproduce.
        let pre = BlockHash::compute(&self.serialize_for_hash(None));
        if pre != self.pre_evaluation_hash {
            return Err(BlockValidationError::Nonce {
                difficulty: self.difficulty,
            }
            .into());
        }
        let full = BlockHash::compute(&self.serialize_for_hash(self.state_root_hash.as_ref()));
        if full != self.hash {
            return Err(BlockValidationError::Hash {
                expected: full.to_string(),
                actual: self.hash.to_string(),
            }
            .into());
        }

        // 5. Transactions must sit in the canonical order for this block's
        //    pre-evaluation hash.
        let expected = canonical_order(id_sorted, &self.pre_evaluation_hash);
        for (position, (have, want)) in self.transactions.iter().zip(&expected).enumerate() {
            if have.id() != want.id() {
                return Err(BlockValidationError::TxOrdering { position }.into());
            }
        }

        Ok(())
    }

    /// Streams `(transaction, evaluation)` pairs in canonical order.
    ///
    /// Each transaction starts from a fresh delta whose base is the previous
    /// transaction's final output states (or `base` for the first one,
    /// defaulting to [`NullStateView`]). Transactions are only evaluated as
    /// the iterator is advanced.
    ///
    /// Fails with [`BlockError::MissingMiner`] when the block has no miner
    /// to credit action execution to.
    pub fn evaluate_actions_per_tx<'a>(
        &'a self,
        base: Option<Arc<dyn AccountStateView>>,
        previous_states_trie: Option<&'a dyn StateStore>,
    ) -> Result<PerTxEvaluations<'a, T>, BlockError> {
        let miner = self.miner.ok_or(BlockError::MissingMiner)?;
        Ok(PerTxEvaluations {
            block: self,
            miner,
            trie: previous_states_trie,
            view: base.unwrap_or_else(|| Arc::new(NullStateView)),
            next: 0,
            pending: Vec::new().into_iter(),
            pending_tx: 0,
            last_output: None,
        })
    }

    /// Validates the block, runs every action, and enforces the declared
    /// updated-address sets.
    ///
    /// A transaction whose actions touched addresses outside
    /// `updated_addresses()` fails the whole evaluation with
    /// [`BlockError::InvalidTxUpdatedAddresses`] naming the excess.
    pub fn evaluate(
        &self,
        current_time: DateTime<Utc>,
        base: Option<Arc<dyn AccountStateView>>,
        previous_states_trie: Option<&dyn StateStore>,
    ) -> Result<Vec<ActionEvaluation>, BlockError> {
        // 1. Evaluating an invalid block would be meaningless.
        self.validate(current_time)?;

        // 2. Materialise the stream, remembering each transaction's final
        //    output delta for the subset check.
        let mut evaluations = Vec::new();
        let mut current: Option<(TxId, BTreeSet<Address>, Arc<AccountStateDelta>)> = None;
        for (tx, evaluation) in self.evaluate_actions_per_tx(base, previous_states_trie)? {
            match &mut current {
                Some((id, _, last)) if *id == tx.id() => {
                    *last = evaluation.output_states.clone();
                }
                _ => {
                    if let Some(finished) = current.take() {
                        check_updated_addresses(finished)?;
                    }
                    current = Some((
                        tx.id(),
                        tx.updated_addresses(),
                        evaluation.output_states.clone(),
                    ));
                }
            }
            evaluations.push(evaluation);
        }
        if let Some(finished) = current.take() {
            check_updated_addresses(finished)?;
        }

        Ok(evaluations)
    }
}

impl<T: Transaction> PartialEq for Block<T> {
    fn eq(&self, other: &Self) -> bool {
        // The hash commits to every consensus field; the cumulative
        // difficulty is the one chain-derived extra.
        self.hash == other.hash && self.total_difficulty == other.total_difficulty
    }
}

impl<T: Transaction> Eq for Block<T> {}

/// Lazy per-transaction evaluation stream.
///
/// Created by [`Block::evaluate_actions_per_tx`]; see there for semantics.
pub struct PerTxEvaluations<'a, T> {
    block: &'a Block<T>,
    miner: Address,
    trie: Option<&'a dyn StateStore>,
    view: Arc<dyn AccountStateView>,
    next: usize,
    pending: std::vec::IntoIter<ActionEvaluation>,
    pending_tx: usize,
    last_output: Option<Arc<AccountStateDelta>>,
}

impl<'a, T: Transaction> Iterator for PerTxEvaluations<'a, T> {
    type Item = (&'a T, ActionEvaluation);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(evaluation) = self.pending.next() {
                self.last_output = Some(evaluation.output_states.clone());
                return Some((&self.block.transactions[self.pending_tx], evaluation));
            }

            // A finished transaction's writes become the base view for the
            // next one.
            if let Some(output) = self.last_output.take() {
                self.view = output;
            }

            let tx = self.block.transactions.get(self.next)?;
            let delta = AccountStateDelta::new(self.view.clone(), tx.signer());
            let evaluations = tx.evaluate_actions_gradually(
                &self.block.pre_evaluation_hash,
                self.block.index,
                delta,
                &self.miner,
                self.trie,
            );
            self.pending_tx = self.next;
            self.next += 1;
            self.pending = evaluations.into_iter();
        }
    }
}

fn check_updated_addresses(
    (tx_id, declared, last): (TxId, BTreeSet<Address>, Arc<AccountStateDelta>),
) -> Result<(), BlockError> {
    let touched = last.updated_addresses();
    let excess: BTreeSet<Address> = touched.difference(&declared).copied().collect();
    if excess.is_empty() {
        Ok(())
    } else {
        Err(BlockError::InvalidTxUpdatedAddresses { tx_id, excess })
    }
}

/// SHA-256 over the canonical encoding of the id-sorted signed transaction
/// values; `None` for an empty block.
fn fingerprint<T: Transaction>(id_sorted: &[T]) -> Option<BlockHash> {
    if id_sorted.is_empty() {
        return None;
    }
    let values: Vec<Value> = id_sorted
        .iter()
        .map(|tx| tx.to_canonical_value(true))
        .collect();
    Some(BlockHash::compute(&codec::encode(&Value::List(values))))
}

/// Reorders id-sorted transactions into the evaluation order.
///
/// Transactions are grouped by signer; each group's position is decided by
/// the XOR of its transaction ids (order-independent) mixed with the
/// pre-evaluation hash, and nonces order transactions within a group.
fn canonical_order<T: Transaction>(id_sorted: Vec<T>, pre_evaluation_hash: &BlockHash) -> Vec<T> {
    let mix = U256::from_big_endian(pre_evaluation_hash.as_bytes());

    let mut by_signer: BTreeMap<Address, Vec<T>> = BTreeMap::new();
    for tx in id_sorted {
        by_signer.entry(tx.signer()).or_default().push(tx);
    }

    let mut groups: Vec<(Address, Vec<T>)> = by_signer.into_iter().collect();
    groups.sort_by_cached_key(|(signer, group)| {
        let flattened = group.iter().fold(U256::zero(), |acc, tx| {
            acc ^ U256::from_big_endian(tx.id().as_bytes())
        });
        (flattened ^ mix, *signer)
    });

    let total = groups.iter().map(|(_, group)| group.len()).sum();
    let mut ordered = Vec::with_capacity(total);
    for (_, mut group) in groups {
        // Stable sort: equal nonces keep the id-sorted order.
        group.sort_by_key(|tx| tx.nonce());
        ordered.extend(group);
    }
    ordered
}

/// Canonical hash payload assembled from typed parts.
#[allow(clippy::too_many_arguments)]
fn hash_bytes(
    index: i64,
    difficulty: i64,
    nonce: &Nonce,
    miner: Option<&Address>,
    previous_hash: Option<&BlockHash>,
    timestamp: &str,
    tx_hash: Option<&BlockHash>,
    state_root_hash: Option<&BlockHash>,
) -> Vec<u8> {
    header::hash_payload(
        index,
        difficulty,
        nonce.as_bytes(),
        miner.map(|m| m.as_bytes().as_slice()).unwrap_or(&[]),
        previous_hash.map(|h| h.as_bytes().as_slice()).unwrap_or(&[]),
        timestamp,
        tx_hash.map(|h| h.as_bytes().as_slice()).unwrap_or(&[]),
        state_root_hash
            .map(|h| h.as_bytes().as_slice())
            .unwrap_or(&[]),
    )
}

fn hash_text(hash: Option<&BlockHash>) -> String {
    match hash {
        Some(hash) => hash.to_string(),
        None => "absent".to_string(),
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
