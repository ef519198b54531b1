//! Account-state views and per-action evaluation records.
//!
//! Action execution never touches storage directly. It reads through an
//! [`AccountStateView`] and writes into an [`AccountStateDelta`], a
//! functional overlay on top of that view. Each executed action produces an
//! [`ActionEvaluation`] carrying the delta as of that step; the block
//! evaluation driver chains the final delta of one transaction into the
//! base view of the next.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::Value;
use crate::types::{Address, BlockHash};

/// Fungible asset identifier.
///
/// The block core does not interpret currencies; it only keys balances by
/// them. Ordering and equality follow the ticker bytes.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Currency {
    /// Stable ticker naming the asset, e.g. `"ORE"`.
    pub ticker: String,
}

impl Currency {
    /// Creates a currency from its ticker.
    pub fn new(ticker: &str) -> Self {
        Self { ticker: ticker.to_string() }
    }
}

/// Read-only view over account states and balances.
///
/// Implementations can be backed by a state trie, a cache, or another
/// delta. The contract is total: unknown addresses read as absent state and
/// zero balance rather than as errors.
pub trait AccountStateView {
    /// Returns the state of `address`, or `None` if it has never been set.
    fn get_state(&self, address: &Address) -> Option<Value>;

    /// Returns the balance of `address` in `currency`; zero if untracked.
    fn get_balance(&self, address: &Address, currency: &Currency) -> i128;
}

/// View that knows nothing: every state is absent and every balance zero.
///
/// This is the default starting point for evaluating a genesis block, and
/// a convenient stand-in for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStateView;

impl AccountStateView for NullStateView {
    fn get_state(&self, _address: &Address) -> Option<Value> {
        None
    }

    fn get_balance(&self, _address: &Address, _currency: &Currency) -> i128 {
        0
    }
}

/// Read-only contract over the previous block's persisted state trie.
///
/// The block core never interprets the trie; it only threads it through to
/// transaction evaluation, which may use it to resolve historical reads.
pub trait StateStore {
    /// Root commitment of the trie, if it has one.
    fn state_root(&self) -> Option<BlockHash>;

    /// Looks up the persisted state for `address`.
    fn get(&self, address: &Address) -> Option<Value>;
}

/// Overlay of writes produced by executing actions on top of a base view.
///
/// Deltas are functional: the setters return a new delta and leave the
/// receiver untouched, so an evaluation step can be recorded without
/// worrying about later steps mutating it. Reads fall through to the base
/// view for anything the overlay has not written.
#[derive(Clone)]
pub struct AccountStateDelta {
    base: Arc<dyn AccountStateView>,
    signer: Address,
    states: BTreeMap<Address, Value>,
    balances: BTreeMap<(Address, Currency), i128>,
}

impl AccountStateDelta {
    /// Creates an empty overlay for `signer` on top of `base`.
    pub fn new(base: Arc<dyn AccountStateView>, signer: Address) -> Self {
        Self {
            base,
            signer,
            states: BTreeMap::new(),
            balances: BTreeMap::new(),
        }
    }

    /// Signer of the transaction this delta belongs to.
    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Returns a delta with the state of `address` set to `state`.
    pub fn set_state(&self, address: Address, state: Value) -> Self {
        let mut next = self.clone();
        next.states.insert(address, state);
        next
    }

    /// Returns a delta with the balance of `address` in `currency` set to
    /// `amount`.
    pub fn set_balance(&self, address: Address, currency: Currency, amount: i128) -> Self {
        let mut next = self.clone();
        next.balances.insert((address, currency), amount);
        next
    }

    /// Addresses written by this delta, through states or balances.
    pub fn updated_addresses(&self) -> BTreeSet<Address> {
        let mut addresses: BTreeSet<Address> = self.states.keys().copied().collect();
        addresses.extend(self.balances.keys().map(|(address, _)| *address));
        addresses
    }
}

impl AccountStateView for AccountStateDelta {
    fn get_state(&self, address: &Address) -> Option<Value> {
        match self.states.get(address) {
            Some(state) => Some(state.clone()),
            None => self.base.get_state(address),
        }
    }

    fn get_balance(&self, address: &Address, currency: &Currency) -> i128 {
        match self.balances.get(&(*address, currency.clone())) {
            Some(amount) => *amount,
            None => self.base.get_balance(address, currency),
        }
    }
}

impl fmt::Debug for AccountStateDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountStateDelta")
            .field("signer", &self.signer)
            .field("states", &self.states)
            .field("balances", &self.balances)
            .finish_non_exhaustive()
    }
}

impl PartialEq for AccountStateDelta {
    fn eq(&self, other: &Self) -> bool {
        // The base view has no identity worth comparing; two deltas are the
        // same if they wrote the same things for the same signer.
        self.signer == other.signer
            && self.states == other.states
            && self.balances == other.balances
    }
}

/// Record of a single executed action.
#[derive(Clone, Debug)]
pub struct ActionEvaluation {
    /// Canonical value of the action that ran.
    pub action: Value,
    /// Signer of the transaction the action belongs to.
    pub signer: Address,
    /// States after the action, layered over everything that ran before it.
    pub output_states: Arc<AccountStateDelta>,
}

impl PartialEq for ActionEvaluation {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action
            && self.signer == other.signer
            && self.output_states == other.output_states
    }
}
