//! The mempool engine.
//!
//! Admission runs a fixed pipeline: sanity → standardness → finality →
//! known-ness → double-spend → coin-view build → orphan classification →
//! contextual verification → insert → capacity cap. Mutations only happen
//! after every fallible check has passed, so a rejected transaction leaves
//! no trace beyond the reject filter.
//!
//! The engine is single-writer: every mutation takes `&mut self`, and the
//! surrounding node serializes block events against admissions with its
//! own lock (a `Mutex<Mempool>` on the node).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use ember_core::chain::{ChainView, ScriptVerifier};
use ember_core::coins::{Coin, CoinView};
use ember_core::constants::{
    COIN_HEIGHT_UNCONFIRMED, MAX_TX_SIGOPS_COST, MAX_TX_WEIGHT, SEQUENCE_DISABLE_FLAG,
    STANDARD_LOCKTIME_FLAGS, STANDARD_VERIFY_FLAGS, VERIFY_CLEANSTACK, VERIFY_WITNESS,
};
use ember_core::error::{CacheError, ChainError, MempoolError, RejectCode, VerifyError};
use ember_core::policy;
use ember_core::types::{Block, Hash256, OutPoint, Transaction, TxOutput};

use crate::cache::MempoolCache;
use crate::config::MempoolConfig;
use crate::entry::MempoolEntry;
use crate::estimator::FeeEstimator;
use crate::event::{EventBus, MempoolEvent};
use crate::filter::RollingFilter;
use crate::heap::{FeeHeap, RateKey};
use crate::index::{CoinIndex, IndexedCoin, TxIndex};
use crate::orphans::{Orphan, OrphanPool};
use crate::unix_time;

/// Reject filter capacity and false-positive rate.
const REJECT_FILTER_ITEMS: usize = 120_000;
const REJECT_FILTER_RATE: f64 = 0.000_001;

/// Free-relay counter half-life constant: the budget decays by 1/600 per
/// second.
const FREE_DECAY: f64 = 1.0 - 1.0 / 600.0;

/// Outcome of a successful [`Mempool::add_tx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddResult {
    /// The entry was inserted. Carries the txids of any orphans resolved
    /// as a side effect.
    Added(Vec<Hash256>),
    /// Parents are missing; the transaction was stored as an orphan.
    /// Carries the missing parent txids.
    Orphan(Vec<Hash256>),
}

/// Unconfirmed-transaction pool.
pub struct Mempool {
    chain: Arc<dyn ChainView>,
    verifier: Arc<dyn ScriptVerifier>,
    config: MempoolConfig,

    /// Authoritative entry set.
    by_hash: HashMap<Hash256, MempoolEntry>,
    /// Every in-pool input, mapped to its spender. Conflicts are rejected
    /// at admission, so this is a function.
    spent: HashMap<OutPoint, Hash256>,
    orphans: OrphanPool,
    rejects: RollingFilter,
    /// Sum of `mem_usage` over `by_hash`.
    size: u64,
    /// Block the pool's state is valid against.
    tip: Hash256,

    tx_index: TxIndex,
    coin_index: CoinIndex,
    estimator: Option<FeeEstimator>,
    cache: Option<MempoolCache>,
    events: EventBus,

    free_count: f64,
    last_free_time: u64,
}

impl Mempool {
    /// Create a pool against `chain`, loading persisted entries when the
    /// configuration names a cache path.
    pub fn open(
        chain: Arc<dyn ChainView>,
        verifier: Arc<dyn ScriptVerifier>,
        config: MempoolConfig,
    ) -> Result<Self, MempoolError> {
        let tip = chain.tip();
        let mut pool = Self {
            chain,
            verifier,
            by_hash: HashMap::new(),
            spent: HashMap::new(),
            orphans: OrphanPool::new(),
            rejects: RollingFilter::new(REJECT_FILTER_ITEMS, REJECT_FILTER_RATE),
            size: 0,
            tip,
            tx_index: TxIndex::new(),
            coin_index: CoinIndex::new(),
            estimator: Some(FeeEstimator::new()),
            cache: None,
            events: EventBus::new(),
            free_count: 0.0,
            last_free_time: unix_time(),
            config,
        };

        if let Some(path) = pool.config.persistent.clone() {
            let (cache, entries) = MempoolCache::open(path, tip)?;
            if let Some(blob) = cache.load_estimator()? {
                match FeeEstimator::decode(&blob) {
                    Ok(estimator) => pool.estimator = Some(estimator),
                    Err(_) => warn!("discarding undecodable fee estimator state"),
                }
            }
            pool.cache = Some(cache);
            pool.load_entries(entries)?;
        }

        Ok(pool)
    }

    /// Subscribe to the pool's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MempoolEvent> {
        self.events.subscribe()
    }

    // --- Read surface ---

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Total memory charge of all entries.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Block the pool's state is valid against.
    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    pub fn has(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&MempoolEntry> {
        self.by_hash.get(hash)
    }

    /// Whether the pool knows this txid as an entry or an orphan.
    pub fn exists(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash) || self.orphans.has(hash)
    }

    /// Whether the txid was recently rejected (probabilistic).
    pub fn has_reject(&self, hash: &Hash256) -> bool {
        self.rejects.contains(hash.as_bytes())
    }

    /// Whether any of `tx`'s inputs are already spent by a pool entry.
    pub fn is_double_spend(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .any(|input| self.spent.contains_key(&input.previous_output))
    }

    /// The pool entry spending `outpoint`, if any.
    pub fn get_spender(&self, outpoint: &OutPoint) -> Option<&MempoolEntry> {
        self.spent.get(outpoint).and_then(|hash| self.by_hash.get(hash))
    }

    /// Number of tracked spent outpoints.
    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }

    /// An output created by a pool transaction, regardless of whether it
    /// is spent within the pool.
    pub fn output_of(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        self.by_hash
            .get(&outpoint.txid)
            .and_then(|entry| entry.tx.outputs.get(outpoint.index as usize))
            .cloned()
    }

    /// An unconfirmed coin created by a pool transaction and not yet spent
    /// within the pool.
    pub fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        if self.spent.contains_key(outpoint) {
            return None;
        }
        self.output_of(outpoint).map(|output| Coin {
            output,
            height: COIN_HEIGHT_UNCONFIRMED,
            coinbase: false,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_hash.values()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.by_hash.keys().copied().collect()
    }

    /// Entries ordered best-package-rate first, for block template
    /// assembly.
    pub fn entries_by_rate(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.by_hash.values().collect();
        entries.sort_by(|a, b| RateKey::from_entry(b).cmp(&RateKey::from_entry(a)));
        entries
    }

    pub fn orphan_pool(&self) -> &OrphanPool {
        &self.orphans
    }

    /// Fee-rate estimate for confirmation within `target` blocks, or 0.
    pub fn estimate_fee(&self, target: u64) -> u64 {
        self.estimator
            .as_ref()
            .map(|estimator| estimator.estimate_fee(target))
            .unwrap_or(0)
    }

    /// Unconfirmed transactions touching `address` (requires
    /// `index_address`).
    pub fn txs_by_address(&self, address: &Hash256) -> Vec<&MempoolEntry> {
        self.tx_index
            .get(address)
            .into_iter()
            .filter_map(|hash| self.by_hash.get(&hash))
            .collect()
    }

    /// Unspent in-pool coins paying `address` (requires `index_address`).
    pub fn coins_by_address(&self, address: &Hash256) -> Vec<IndexedCoin> {
        self.coin_index.get(address)
    }

    // --- Admission ---

    /// Admit a candidate transaction from `peer` (-1 for local clients).
    ///
    /// On a [`VerifyError`] the reject filter learns the txid unless the
    /// transaction carries witness data or the failure was flagged as
    /// malleation-caused, so third parties cannot poison the filter.
    pub fn add_tx(&mut self, tx: &Transaction, peer: i32) -> Result<AddResult, MempoolError> {
        let hash = tx
            .txid()
            .map_err(|_| VerifyError::new(Hash256::ZERO, RejectCode::Invalid, "bad-txns-undecodable", 100))?;

        match self.insert_tx(tx, hash, peer) {
            Ok(result) => Ok(result),
            Err(MempoolError::Verify(err)) => {
                if !tx.has_witness() && !err.malleated {
                    self.rejects.add(hash.as_bytes());
                }
                debug!(%hash, code = %err.code, reason = err.reason, "rejected transaction");
                Err(err.into())
            }
            Err(other) => Err(other),
        }
    }

    /// The admission pipeline. Callers go through [`add_tx`](Self::add_tx),
    /// which owns the reject-filter bookkeeping.
    fn insert_tx(
        &mut self,
        tx: &Transaction,
        hash: Hash256,
        peer: i32,
    ) -> Result<AddResult, MempoolError> {
        let height = self.chain.height();

        policy::check_sanity(hash, tx)?;

        if tx.is_coinbase() {
            return Err(VerifyError::new(hash, RejectCode::Invalid, "coinbase", 100).into());
        }

        if self.config.require_standard {
            if tx.version >= 2 && !self.chain.has_csv() {
                return Err(
                    VerifyError::new(hash, RejectCode::Nonstandard, "premature-version2-tx", 0)
                        .into(),
                );
            }
            // Witness relay before activation is soft-rejected: the
            // failure must not poison the reject filter.
            if tx.has_witness() && !self.chain.has_witness() {
                return Err(
                    VerifyError::malleated(hash, RejectCode::Nonstandard, "no-witness-yet", 0)
                        .into(),
                );
            }
            policy::check_standard(hash, tx, self.config.min_relay_fee)?;
        }

        if !self.config.replace_by_fee && tx.is_rbf() {
            return Err(
                VerifyError::new(hash, RejectCode::Nonstandard, "replace-by-fee", 0).into()
            );
        }

        if !policy::verify_final(self.chain.as_ref(), tx, STANDARD_LOCKTIME_FLAGS) {
            return Err(VerifyError::new(hash, RejectCode::Nonstandard, "non-final", 0).into());
        }

        if self.exists(&hash) {
            return Err(
                VerifyError::new(hash, RejectCode::AlreadyKnown, "txn-already-in-mempool", 0)
                    .into(),
            );
        }
        if self.chain.has_coins(&hash)? {
            return Err(
                VerifyError::new(hash, RejectCode::AlreadyKnown, "txn-already-known", 0).into()
            );
        }

        if self.is_double_spend(tx) {
            self.events.emit(MempoolEvent::Conflict { hash });
            return Err(
                VerifyError::new(hash, RejectCode::Duplicate, "bad-txns-inputs-spent", 0).into()
            );
        }

        let view = self.resolve_view(tx)?;

        if let Some(missing) = self.maybe_orphan(tx, hash, &view, peer)? {
            return Ok(AddResult::Orphan(missing));
        }

        let entry = MempoolEntry::from_tx(tx.clone(), hash, &view, height, unix_time(), peer)
            .map_err(|_| VerifyError::new(hash, RejectCode::Invalid, "bad-txns-undecodable", 100))?;

        self.verify_entry(&entry, &view)?;

        self.track_entry(entry.clone(), &view);
        self.update_ancestors(&entry, add_fee);
        self.events.emit(MempoolEvent::Tx { hash });
        self.events.emit(MempoolEvent::AddEntry { entry: entry.clone() });
        if let Some(cache) = &mut self.cache {
            cache.save_entry(&entry)?;
            cache.maybe_flush()?;
        }
        if let Some(estimator) = &mut self.estimator {
            estimator.process_entry(&entry, height, self.chain.is_synced());
        }
        info!(%hash, fee = entry.fee, size = entry.size, "added transaction to mempool");

        let resolved = self.handle_orphans(&hash)?;

        if self.size > self.config.max_size && self.limit_size(&hash) {
            return Err(
                VerifyError::new(hash, RejectCode::InsufficientFee, "mempool full", 0).into()
            );
        }

        Ok(AddResult::Added(resolved))
    }

    /// Resolve every input against in-pool parents first, the chain
    /// second. Unresolvable slots stay absent for orphan classification.
    fn resolve_view(&self, tx: &Transaction) -> Result<CoinView, MempoolError> {
        let mut view = CoinView::new();
        for input in &tx.inputs {
            let prevout = input.previous_output;
            if let Some(parent) = self.by_hash.get(&prevout.txid) {
                view.add_index(parent.hash, &parent.tx, prevout.index, COIN_HEIGHT_UNCONFIRMED);
            } else if let Some(coin) = self.chain.read_coin(&prevout)? {
                view.add_entry(prevout, coin);
            }
        }
        Ok(view)
    }

    /// Admission step 9: classify a transaction with unresolved inputs.
    ///
    /// Returns `Some(missing)` when the transaction was enrolled as an
    /// orphan, `None` when the view is complete.
    fn maybe_orphan(
        &mut self,
        tx: &Transaction,
        hash: Hash256,
        view: &CoinView,
        peer: i32,
    ) -> Result<Option<Vec<Hash256>>, MempoolError> {
        let unresolved = view.missing(tx);
        if unresolved.is_empty() {
            return Ok(None);
        }

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for outpoint in &unresolved {
            let parent = outpoint.txid;
            if !seen.insert(parent) {
                continue;
            }
            if self.rejects.contains(parent.as_bytes()) {
                // A child of a rejected parent is as good as rejected.
                self.rejects.add(hash.as_bytes());
                debug!(%hash, %parent, "dropping orphan with rejected ancestor");
                return Err(
                    VerifyError::new(hash, RejectCode::Duplicate, "duplicate-orphan", 0).into()
                );
            }
            missing.push(parent);
        }

        let weight = tx
            .weight()
            .map_err(|_| VerifyError::new(hash, RejectCode::Invalid, "bad-txns-undecodable", 100))?;
        if weight > MAX_TX_WEIGHT {
            return Err(VerifyError::new(hash, RejectCode::Nonstandard, "tx-size", 0).into());
        }

        let orphan = Orphan::new(tx, hash, missing.len(), peer)
            .map_err(|_| VerifyError::new(hash, RejectCode::Invalid, "bad-txns-undecodable", 100))?;
        self.orphans.insert(orphan, &missing);
        self.events.emit(MempoolEvent::AddOrphan { hash, peer });
        debug!(%hash, missing = missing.len(), "stored orphan");

        for victim in self.orphans.limit(self.config.max_orphans, &mut rand::thread_rng()) {
            self.events.emit(MempoolEvent::RemoveOrphan { hash: victim });
        }

        Ok(Some(missing))
    }

    /// Admission step 10: contextual verification of a fully resolved
    /// entry.
    fn verify_entry(&mut self, entry: &MempoolEntry, view: &CoinView) -> Result<(), MempoolError> {
        let hash = entry.hash;
        let tx = &entry.tx;
        let height = self.chain.height();

        if !policy::check_sequence_locks(self.chain.as_ref(), tx, view, STANDARD_LOCKTIME_FLAGS) {
            return Err(VerifyError::new(hash, RejectCode::Nonstandard, "non-BIP68-final", 0).into());
        }

        if self.config.require_standard {
            policy::check_standard_inputs(hash, tx, view)?;
        }

        if entry.sigops > MAX_TX_SIGOPS_COST {
            return Err(
                VerifyError::new(hash, RejectCode::Nonstandard, "bad-txns-too-many-sigops", 0)
                    .into(),
            );
        }

        let min_fee = policy::min_fee(entry.size, self.config.min_relay_fee);
        if entry.fee < min_fee {
            if self.config.relay_priority && entry.is_free(height + 1) {
                self.throttle_free(hash, entry.size)?;
            } else {
                return Err(
                    VerifyError::new(hash, RejectCode::InsufficientFee, "insufficient fee", 0)
                        .into(),
                );
            }
        }

        if self.config.reject_absurd_fees && min_fee > 0 && entry.fee > min_fee * 10_000 {
            return Err(
                VerifyError::new(hash, RejectCode::HighFee, "absurdly-high-fee", 0).into()
            );
        }

        if self.count_ancestors(tx) + 1 > self.config.max_ancestors {
            return Err(
                VerifyError::new(hash, RejectCode::Nonstandard, "too-long-mempool-chain", 0)
                    .into(),
            );
        }

        policy::check_inputs(hash, tx, view, height + 1)?;

        self.verify_scripts(hash, tx, view)
    }

    /// Exponentially decayed free-relay budget.
    fn throttle_free(&mut self, hash: Hash256, size: u64) -> Result<(), MempoolError> {
        let now = unix_time();
        let elapsed = now.saturating_sub(self.last_free_time);
        self.free_count *= FREE_DECAY.powf(elapsed as f64);
        self.last_free_time = now;

        if self.free_count > self.config.limit_free_relay as f64 * 10_000.0 {
            return Err(
                VerifyError::new(hash, RejectCode::InsufficientFee, "insufficient priority", 0)
                    .into(),
            );
        }
        self.free_count += size as f64;
        debug!(%hash, "relaying free transaction");
        Ok(())
    }

    /// Script verification with the malleation retry dance: a standard
    /// failure that disappears without witness semantics but reappears
    /// under cleanstack alone is concluded to be witness-stuffing, and is
    /// reported `malleated` so the reject filter stays clean.
    fn verify_scripts(
        &self,
        hash: Hash256,
        tx: &Transaction,
        view: &CoinView,
    ) -> Result<(), MempoolError> {
        let original = match self.verifier.verify(hash, tx, view, STANDARD_VERIFY_FLAGS) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let relaxed = STANDARD_VERIFY_FLAGS & !(VERIFY_WITNESS | VERIFY_CLEANSTACK);
        if self.verifier.verify(hash, tx, view, relaxed).is_ok() {
            let cleanstack_only = STANDARD_VERIFY_FLAGS & !VERIFY_WITNESS;
            if self.verifier.verify(hash, tx, view, cleanstack_only).is_err() {
                return Err(VerifyError::malleated(
                    hash,
                    RejectCode::Nonstandard,
                    "bad-witness-nonstandard",
                    0,
                )
                .into());
            }
        }

        Err(original.into())
    }

    // --- Graph traversals ---

    /// Number of in-pool ancestors of `tx`, bounded by `max_ancestors`.
    pub fn count_ancestors(&self, tx: &Transaction) -> usize {
        self.ancestor_hashes(tx).len()
    }

    /// Transitive in-pool ancestors, capped at `max_ancestors`.
    fn ancestor_hashes(&self, tx: &Transaction) -> Vec<Hash256> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Hash256> =
            tx.inputs.iter().map(|input| input.previous_output.txid).collect();
        let mut ancestors = Vec::new();

        while let Some(parent) = queue.pop_front() {
            if !visited.insert(parent) {
                continue;
            }
            let Some(entry) = self.by_hash.get(&parent) else {
                continue;
            };
            ancestors.push(parent);
            if ancestors.len() >= self.config.max_ancestors {
                break;
            }
            for input in &entry.tx.inputs {
                queue.push_back(input.previous_output.txid);
            }
        }
        ancestors
    }

    /// Number of in-pool descendants of the entry named by `hash`.
    pub fn count_descendants(&self, hash: &Hash256) -> usize {
        self.descendant_hashes(hash).len()
    }

    /// Transitive in-pool spenders of the entry named by `hash`.
    pub fn get_descendants(&self, hash: &Hash256) -> Vec<Hash256> {
        self.descendant_hashes(hash)
    }

    fn descendant_hashes(&self, hash: &Hash256) -> Vec<Hash256> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Hash256> = self.direct_spenders(hash).into();
        let mut descendants = Vec::new();

        while let Some(spender) = queue.pop_front() {
            if !visited.insert(spender) {
                continue;
            }
            if !self.by_hash.contains_key(&spender) {
                continue;
            }
            descendants.push(spender);
            for next in self.direct_spenders(&spender) {
                queue.push_back(next);
            }
        }
        descendants
    }

    fn direct_spenders(&self, hash: &Hash256) -> Vec<Hash256> {
        let Some(entry) = self.by_hash.get(hash) else {
            return Vec::new();
        };
        (0..entry.tx.outputs.len() as u32)
            .filter_map(|index| self.spent.get(&OutPoint { txid: *hash, index }).copied())
            .collect()
    }

    /// Apply `apply(parent, child)` to every in-pool ancestor of `child`,
    /// where `child` is always the originating entry.
    fn update_ancestors(
        &mut self,
        child: &MempoolEntry,
        apply: fn(&mut MempoolEntry, &MempoolEntry),
    ) {
        for hash in self.ancestor_hashes(&child.tx) {
            if let Some(parent) = self.by_hash.get_mut(&hash) {
                apply(parent, child);
            }
        }
    }

    /// Manually adjust an entry's priority and comparison fee. Infallible;
    /// unknown hashes are ignored. Ancestor sums are kept consistent by
    /// backing the old delta out before applying the new one.
    pub fn prioritise(&mut self, hash: &Hash256, priority_delta: i64, fee_delta: i64) {
        let Some(entry) = self.by_hash.get(hash).cloned() else {
            return;
        };

        self.update_ancestors(&entry, pre_prioritise);

        let entry = self.by_hash.get_mut(hash).expect("entry just read");
        entry.priority = entry.priority.saturating_add(priority_delta);
        entry.delta_fee = entry.delta_fee.saturating_add(fee_delta);
        entry.desc_fee = entry.desc_fee.saturating_add_signed(fee_delta);
        let updated = entry.clone();

        self.update_ancestors(&updated, post_prioritise);
        debug!(%hash, priority_delta, fee_delta, "prioritised transaction");
    }

    // --- Tracking ---

    fn track_entry(&mut self, entry: MempoolEntry, view: &CoinView) {
        for input in &entry.tx.inputs {
            self.spent.insert(input.previous_output, entry.hash);
        }
        if self.config.index_address {
            self.tx_index.insert(&entry, view);
            self.coin_index.insert(&entry, view);
        }
        self.size += entry.mem_usage();
        self.by_hash.insert(entry.hash, entry);
    }

    /// Untrack and return an entry: maps, indices, size accounting, and
    /// the cache delete buffer. Emits nothing.
    fn delete_entry(&mut self, hash: &Hash256) -> Option<MempoolEntry> {
        let entry = self.by_hash.remove(hash)?;
        for input in &entry.tx.inputs {
            self.spent.remove(&input.previous_output);
        }
        if self.config.index_address {
            self.tx_index.remove(hash);
            let by_hash = &self.by_hash;
            self.coin_index.remove(&entry, |outpoint| {
                by_hash
                    .get(&outpoint.txid)
                    .and_then(|parent| parent.tx.outputs.get(outpoint.index as usize))
                    .cloned()
            });
        }
        self.size = self.size.saturating_sub(entry.mem_usage());
        if let Some(cache) = &mut self.cache {
            cache.delete_entry(hash);
        }
        Some(entry)
    }

    /// Evict an entry: spenders go first, then the entry's package is
    /// backed out of its ancestors, then the entry itself.
    fn evict_entry(&mut self, hash: &Hash256) {
        self.remove_spenders(hash);
        if let Some(entry) = self.by_hash.get(hash).cloned() {
            self.update_ancestors(&entry, remove_fee);
            self.delete_entry(hash);
            if let Some(estimator) = &mut self.estimator {
                estimator.remove_entry(hash);
            }
            debug!(%hash, "evicted transaction");
            self.events.emit(MempoolEvent::RemoveEntry { entry });
        }
    }

    /// Recursively remove every in-pool spender of `hash`'s outputs.
    fn remove_spenders(&mut self, hash: &Hash256) {
        for spender in self.direct_spenders(hash) {
            self.remove_spenders(&spender);
            if let Some(entry) = self.delete_entry(&spender) {
                if let Some(estimator) = &mut self.estimator {
                    estimator.remove_entry(&spender);
                }
                debug!(parent = %hash, spender = %spender, "removed spender");
                self.events.emit(MempoolEvent::RemoveEntry { entry });
            }
        }
    }

    /// Evict every in-pool spender of `tx`'s inputs. Called for each
    /// confirmed transaction when a block connects.
    fn remove_double_spends(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            if let Some(spender) = self.spent.get(&input.previous_output).copied() {
                warn!(%spender, outpoint = %input.previous_output, "double spend confirmed against pool");
                self.evict_entry(&spender);
                self.events.emit(MempoolEvent::DoubleSpend { hash: spender });
            }
        }
    }

    // --- Orphan resolution ---

    /// Replay orphans completed by the arrival of `parent`. Verification
    /// failures discard the orphan and are not propagated; collaborator
    /// errors abort.
    fn handle_orphans(&mut self, parent: &Hash256) -> Result<Vec<Hash256>, MempoolError> {
        let mut resolved = Vec::new();

        for orphan in self.orphans.resolve(parent) {
            let tx = match orphan.decode() {
                Ok(tx) => tx,
                Err(_) => {
                    self.events
                        .emit(MempoolEvent::BadOrphan { hash: orphan.hash, peer: orphan.peer });
                    continue;
                }
            };

            match self.insert_tx(&tx, orphan.hash, orphan.peer) {
                Ok(AddResult::Added(nested)) => {
                    debug!(hash = %orphan.hash, "resolved orphan");
                    resolved.push(orphan.hash);
                    resolved.extend(nested);
                }
                // A parent vanished again between enrollment and replay;
                // the orphan is re-enrolled with a fresh missing set.
                Ok(AddResult::Orphan(_)) => {}
                Err(MempoolError::Verify(err)) => {
                    if !tx.has_witness() && !err.malleated {
                        self.rejects.add(orphan.hash.as_bytes());
                    }
                    debug!(hash = %orphan.hash, reason = err.reason, "bad orphan");
                    self.events
                        .emit(MempoolEvent::BadOrphan { hash: orphan.hash, peer: orphan.peer });
                }
                Err(other) => return Err(other),
            }
        }

        Ok(resolved)
    }

    /// Drop an orphan, scrubbing its waiting references.
    pub fn remove_orphan(&mut self, hash: &Hash256) -> bool {
        if self.orphans.remove(hash).is_some() {
            self.events.emit(MempoolEvent::RemoveOrphan { hash: *hash });
            true
        } else {
            false
        }
    }

    // --- Eviction ---

    /// Enforce `max_size`: expire stale dependency-free entries, then pop
    /// the cheapest packages until the pool is back under 90% of budget.
    ///
    /// Returns `true` when the entry named by `added` was itself evicted,
    /// in which case its admission is reported as "mempool full".
    fn limit_size(&mut self, added: &Hash256) -> bool {
        let now = unix_time();
        let mut heap = FeeHeap::new();
        let mut expired = Vec::new();

        for entry in self.by_hash.values() {
            // Dependent entries ride with their ancestors: they are
            // neither expired directly nor heaped.
            if self.has_depends(&entry.tx) {
                continue;
            }
            if now >= entry.time + self.config.expiry_time {
                expired.push(entry.hash);
            } else {
                heap.push(entry);
            }
        }

        for hash in expired {
            debug!(%hash, "expiring stale transaction");
            self.evict_entry(&hash);
        }

        let threshold = self.config.threshold();
        while self.size > threshold {
            let Some(key) = heap.pop() else {
                break;
            };
            // Already removed as somebody's spender.
            if !self.by_hash.contains_key(&key.hash) {
                continue;
            }
            self.evict_entry(&key.hash);
        }

        !self.by_hash.contains_key(added)
    }

    /// Whether `tx` spends any output created inside the pool.
    fn has_depends(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .any(|input| self.by_hash.contains_key(&input.previous_output.txid))
    }

    // --- Block reconciliation ---

    /// Reconcile against a block connected to the best chain. The chain
    /// collaborator must already reflect the new tip.
    pub fn add_block(&mut self, block: &Block) -> Result<(), MempoolError> {
        let block_hash = block.header.hash();
        let height = self.chain.height();
        let mut confirmed = Vec::new();

        for tx in block.transactions.iter().rev() {
            if tx.is_coinbase() {
                continue;
            }
            let hash = tx.txid().map_err(ChainError::from)?;

            if self.by_hash.contains_key(&hash) {
                self.delete_entry(&hash);
                confirmed.push(hash);
                self.events.emit(MempoolEvent::Confirmed { hash, block: block_hash });
            } else {
                self.remove_orphan(&hash);
                self.remove_double_spends(tx);
                // A mined parent frees orphans just like a pooled one.
                if self.orphans.has_waiting(&hash) {
                    self.handle_orphans(&hash)?;
                }
            }
        }

        self.rejects.reset();
        if let Some(estimator) = &mut self.estimator {
            estimator.process_block(height, &confirmed, self.chain.is_synced());
        }
        self.tip = block_hash;

        if let Some(cache) = &mut self.cache {
            if let Some(estimator) = &self.estimator {
                cache.save_estimator(&estimator.encode().map_err(CacheError::from)?);
            }
            cache.save_tip(block_hash);
            cache.flush()?;
        }

        info!(block = %block_hash, confirmed = confirmed.len(), "mempool connected block");
        Ok(())
    }

    /// Reconcile against a block disconnected from the best chain: its
    /// transactions become unconfirmed again. Per-transaction rejections
    /// are reported as events and do not abort the batch.
    pub fn remove_block(&mut self, block: &Block) -> Result<(), MempoolError> {
        let prev_hash = block.header.prev_hash;
        let mut restored = 0usize;

        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            let hash = tx.txid().map_err(ChainError::from)?;
            if self.by_hash.contains_key(&hash) {
                continue;
            }

            match self.insert_tx(tx, hash, -1) {
                Ok(AddResult::Added(_)) => {
                    restored += 1;
                    self.events.emit(MempoolEvent::Unconfirmed { hash });
                }
                Ok(AddResult::Orphan(_)) => {}
                Err(MempoolError::Verify(err)) => {
                    debug!(%hash, reason = err.reason, "disconnected tx did not re-enter pool");
                    self.events
                        .emit(MempoolEvent::Error { hash, reason: err.reason.to_string() });
                }
                Err(other) => return Err(other),
            }
        }

        self.rejects.reset();
        self.tip = prev_hash;

        if let Some(cache) = &mut self.cache {
            cache.save_tip(prev_hash);
            cache.flush()?;
        }

        info!(block = %block.header.hash(), restored, "mempool disconnected block");
        Ok(())
    }

    /// Reorg sanitizer: scan every entry for state the new chain no longer
    /// supports and evict offenders.
    ///
    /// Evicted: entries no longer final at the next height under
    /// median-time-past, version 2+ entries carrying non-disabled relative
    /// locks (their lock baselines may have moved), and entries spending
    /// coinbase outputs (their maturity may have broken).
    pub fn handle_reorg(&mut self) {
        let next_height = self.chain.height() + 1;
        let mtp = self.chain.median_time_past();
        let mut remove = Vec::new();

        for (hash, entry) in &self.by_hash {
            let tx = &entry.tx;
            if !tx.is_final(next_height, mtp) {
                remove.push(*hash);
                continue;
            }
            if tx.version >= 2
                && tx.inputs.iter().any(|input| input.sequence & SEQUENCE_DISABLE_FLAG == 0)
            {
                remove.push(*hash);
                continue;
            }
            if entry.spends_coinbase {
                remove.push(*hash);
            }
        }

        info!(evicting = remove.len(), "sanitizing mempool after reorg");
        for hash in remove {
            self.evict_entry(&hash);
        }
    }

    /// Empty every structure and re-initialize the cache.
    pub fn reset(&mut self) -> Result<(), MempoolError> {
        self.by_hash.clear();
        self.spent.clear();
        self.orphans.clear();
        self.tx_index.clear();
        self.coin_index.clear();
        self.size = 0;
        self.free_count = 0.0;
        self.last_free_time = unix_time();
        self.rejects.reset();
        if let Some(estimator) = &mut self.estimator {
            estimator.reset();
        }
        self.tip = self.chain.tip();
        if let Some(cache) = &mut self.cache {
            cache.wipe(self.tip)?;
        }
        info!("mempool reset");
        Ok(())
    }

    // --- Persistence ---

    /// Flush buffered cache writes. Call before shutdown; admissions only
    /// flush on a throttle.
    pub fn close(&mut self) -> Result<(), MempoolError> {
        if let Some(cache) = &mut self.cache {
            if let Some(estimator) = &self.estimator {
                cache.save_estimator(&estimator.encode().map_err(CacheError::from)?);
            }
            cache.save_tip(self.tip);
            cache.flush()?;
        }
        Ok(())
    }

    /// Re-track entries loaded from the cache: pass one restores the maps
    /// with each entry's descendant sums reset to its own contribution,
    /// pass two rebuilds the ancestor sums, pass three rebuilds the
    /// optional indices parents-first.
    fn load_entries(&mut self, entries: Vec<MempoolEntry>) -> Result<(), MempoolError> {
        if entries.is_empty() {
            return Ok(());
        }

        for mut entry in entries {
            entry.desc_fee = entry.delta_fee.max(0) as u64;
            entry.desc_size = entry.size;
            for input in &entry.tx.inputs {
                self.spent.insert(input.previous_output, entry.hash);
            }
            self.size += entry.mem_usage();
            self.by_hash.insert(entry.hash, entry);
        }

        let mut hashes: Vec<Hash256> = self.by_hash.keys().copied().collect();
        for hash in &hashes {
            let entry = self.by_hash.get(hash).cloned().expect("entry just inserted");
            self.update_ancestors(&entry, add_fee);
        }

        if self.config.index_address {
            // Children list their parents among their ancestors, so
            // ascending ancestor count is a topological order.
            hashes.sort_by_key(|hash| self.count_ancestors(&self.by_hash[hash].tx));
            for hash in &hashes {
                let entry = self.by_hash.get(hash).cloned().expect("entry just inserted");
                let view = self.resolve_view(&entry.tx)?;
                self.tx_index.insert(&entry, &view);
                self.coin_index.insert(&entry, &view);
            }
        }

        info!(count = self.by_hash.len(), "restored mempool from cache");
        Ok(())
    }
}

// --- Ancestor update callbacks ---

/// A new child adds its delta fee and size to every ancestor's package.
fn add_fee(parent: &mut MempoolEntry, child: &MempoolEntry) {
    parent.desc_fee = parent.desc_fee.saturating_add_signed(child.delta_fee);
    parent.desc_size += child.size;
}

/// An evicted child backs its whole package out of every ancestor.
fn remove_fee(parent: &mut MempoolEntry, child: &MempoolEntry) {
    parent.desc_fee = parent.desc_fee.saturating_sub(child.desc_fee);
    parent.desc_size = parent.desc_size.saturating_sub(child.desc_size);
}

fn pre_prioritise(parent: &mut MempoolEntry, child: &MempoolEntry) {
    parent.desc_fee = parent.desc_fee.saturating_add_signed(-child.delta_fee);
}

fn post_prioritise(parent: &mut MempoolEntry, child: &MempoolEntry) {
    parent.desc_fee = parent.desc_fee.saturating_add_signed(child.delta_fee);
}
