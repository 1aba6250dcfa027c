//! Orphan transactions: arrived before their parents.
//!
//! Orphans are kept serialized to cap memory and defer parsing until the
//! missing parents show up. Two maps carry the bookkeeping:
//!
//! - `orphans`: txid → [`Orphan`]
//! - `waiting`: missing-parent txid → set of orphan txids blocked on it
//!
//! Every orphan's missing parent appears once per orphan in `waiting`, and
//! an orphan's `missing` count always equals the number of waiting sets
//! that reference it.

use std::collections::{HashMap, HashSet};

use rand::seq::IteratorRandom;
use tracing::debug;

use ember_core::error::CodecError;
use ember_core::types::{Hash256, Transaction};

/// An unverified transaction waiting on missing parents.
#[derive(Clone, Debug)]
pub struct Orphan {
    /// Serialized transaction bytes.
    pub raw: Vec<u8>,
    /// Number of parents still missing.
    pub missing: usize,
    /// Peer the transaction arrived from.
    pub peer: i32,
    /// Cached transaction id.
    pub hash: Hash256,
}

impl Orphan {
    pub fn new(tx: &Transaction, hash: Hash256, missing: usize, peer: i32) -> Result<Self, CodecError> {
        Ok(Self { raw: tx.encode()?, missing, peer, hash })
    }

    /// Parse the stored transaction back out.
    pub fn decode(&self) -> Result<Transaction, CodecError> {
        Transaction::decode(&self.raw)
    }
}

/// The orphan table and its parent → dependents index.
#[derive(Default)]
pub struct OrphanPool {
    orphans: HashMap<Hash256, Orphan>,
    waiting: HashMap<Hash256, HashSet<Hash256>>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn has(&self, hash: &Hash256) -> bool {
        self.orphans.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Orphan> {
        self.orphans.get(hash)
    }

    /// Txids of every buffered orphan.
    pub fn hashes(&self) -> Vec<Hash256> {
        self.orphans.keys().copied().collect()
    }

    /// Whether any orphan is waiting on `parent`.
    pub fn has_waiting(&self, parent: &Hash256) -> bool {
        self.waiting.contains_key(parent)
    }

    /// Orphan txids blocked on `parent`.
    pub fn waiting_on(&self, parent: &Hash256) -> Option<&HashSet<Hash256>> {
        self.waiting.get(parent)
    }

    /// Enroll an orphan blocked on `missing_parents`.
    pub fn insert(&mut self, orphan: Orphan, missing_parents: &[Hash256]) {
        debug_assert_eq!(orphan.missing, missing_parents.len());
        for parent in missing_parents {
            self.waiting.entry(*parent).or_default().insert(orphan.hash);
        }
        self.orphans.insert(orphan.hash, orphan);
    }

    /// Remove an orphan, scrubbing it out of every waiting set it belongs
    /// to. Empty sets are deleted.
    pub fn remove(&mut self, hash: &Hash256) -> Option<Orphan> {
        let orphan = self.orphans.remove(hash)?;

        // The waiting sets are keyed by the orphan's parent txids; recover
        // them from the stored transaction. If the stored bytes fail to
        // parse, fall back to a full scrub.
        match orphan.decode() {
            Ok(tx) => {
                for input in &tx.inputs {
                    let parent = input.previous_output.txid;
                    if let Some(set) = self.waiting.get_mut(&parent) {
                        set.remove(hash);
                        if set.is_empty() {
                            self.waiting.remove(&parent);
                        }
                    }
                }
            }
            Err(_) => {
                self.waiting.retain(|_, set| {
                    set.remove(hash);
                    !set.is_empty()
                });
            }
        }

        Some(orphan)
    }

    /// Parent `parent` has become available: decrement every dependent's
    /// missing count and extract those now complete.
    pub fn resolve(&mut self, parent: &Hash256) -> Vec<Orphan> {
        let Some(dependents) = self.waiting.remove(parent) else {
            return Vec::new();
        };

        let mut complete = Vec::new();
        for hash in dependents {
            let Some(orphan) = self.orphans.get_mut(&hash) else {
                continue;
            };
            orphan.missing = orphan.missing.saturating_sub(1);
            if orphan.missing == 0 {
                complete.push(self.orphans.remove(&hash).expect("orphan present"));
            }
        }
        complete
    }

    /// Enforce the orphan cap by uniformly random eviction. Returns the
    /// evicted txids.
    pub fn limit(&mut self, max_orphans: usize, rng: &mut impl rand::Rng) -> Vec<Hash256> {
        let mut evicted = Vec::new();
        while self.orphans.len() > max_orphans {
            let victim = self
                .orphans
                .keys()
                .copied()
                .choose(rng)
                .expect("pool is non-empty");
            debug!(hash = %victim, "evicting random orphan");
            self.remove(&victim);
            evicted.push(victim);
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.orphans.clear();
        self.waiting.clear();
    }

    /// Check the `waiting` cross-references; used by tests and debug
    /// assertions.
    #[cfg(test)]
    pub fn consistent(&self) -> bool {
        let mut referenced: HashMap<Hash256, usize> = HashMap::new();
        for set in self.waiting.values() {
            if set.is_empty() {
                return false;
            }
            for hash in set {
                *referenced.entry(*hash).or_default() += 1;
            }
        }
        self.orphans
            .values()
            .all(|o| referenced.get(&o.hash).copied().unwrap_or(0) == o.missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::constants::{COIN, SEQUENCE_FINAL};
    use ember_core::types::{OutPoint, TxInput, TxOutput};

    fn spend(parents: &[Hash256]) -> Transaction {
        Transaction {
            version: 1,
            inputs: parents
                .iter()
                .map(|txid| TxInput {
                    previous_output: OutPoint { txid: *txid, index: 0 },
                    signature: vec![0; 64],
                    public_key: vec![0; 32],
                    sequence: SEQUENCE_FINAL,
                    witness: vec![],
                })
                .collect(),
            outputs: vec![TxOutput { value: COIN, pubkey_hash: Hash256::ZERO }],
            lock_time: 0,
        }
    }

    fn enroll(pool: &mut OrphanPool, parents: &[Hash256], peer: i32) -> Hash256 {
        let tx = spend(parents);
        let hash = tx.txid().unwrap();
        let orphan = Orphan::new(&tx, hash, parents.len(), peer).unwrap();
        pool.insert(orphan, parents);
        hash
    }

    #[test]
    fn insert_and_lookup() {
        let mut pool = OrphanPool::new();
        let parent = Hash256([1; 32]);
        let hash = enroll(&mut pool, &[parent], 7);

        assert_eq!(pool.len(), 1);
        assert!(pool.has(&hash));
        assert!(pool.has_waiting(&parent));
        assert!(pool.waiting_on(&parent).unwrap().contains(&hash));
        assert_eq!(pool.get(&hash).unwrap().peer, 7);
        assert!(pool.consistent());
    }

    #[test]
    fn orphan_round_trips_raw_bytes() {
        let tx = spend(&[Hash256([1; 32])]);
        let hash = tx.txid().unwrap();
        let orphan = Orphan::new(&tx, hash, 1, 0).unwrap();
        assert_eq!(orphan.decode().unwrap(), tx);
    }

    #[test]
    fn resolve_extracts_complete_orphans() {
        let mut pool = OrphanPool::new();
        let parent_a = Hash256([1; 32]);
        let parent_b = Hash256([2; 32]);
        let single = enroll(&mut pool, &[parent_a], 0);
        let double = enroll(&mut pool, &[parent_a, parent_b], 0);

        let complete = pool.resolve(&parent_a);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].hash, single);

        // The two-parent orphan is still waiting on parent_b.
        assert!(pool.has(&double));
        assert_eq!(pool.get(&double).unwrap().missing, 1);
        assert!(!pool.has_waiting(&parent_a));
        assert!(pool.consistent());

        let complete = pool.resolve(&parent_b);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].hash, double);
        assert!(pool.is_empty());
        assert!(pool.consistent());
    }

    #[test]
    fn resolve_unknown_parent_is_empty() {
        let mut pool = OrphanPool::new();
        assert!(pool.resolve(&Hash256([9; 32])).is_empty());
    }

    #[test]
    fn remove_scrubs_waiting_sets() {
        let mut pool = OrphanPool::new();
        let parent_a = Hash256([1; 32]);
        let parent_b = Hash256([2; 32]);
        let hash = enroll(&mut pool, &[parent_a, parent_b], 0);
        enroll(&mut pool, &[parent_a], 0);

        pool.remove(&hash);
        assert!(!pool.has(&hash));
        // parent_a still has the other orphan; parent_b's set is gone.
        assert!(pool.has_waiting(&parent_a));
        assert!(!pool.has_waiting(&parent_b));
        assert!(pool.consistent());
    }

    #[test]
    fn limit_evicts_down_to_cap() {
        let mut pool = OrphanPool::new();
        for i in 0..20u8 {
            enroll(&mut pool, &[Hash256([i; 32])], 0);
        }
        let mut rng = rand::thread_rng();
        let evicted = pool.limit(5, &mut rng);
        assert_eq!(evicted.len(), 15);
        assert_eq!(pool.len(), 5);
        assert!(pool.consistent());
    }

    #[test]
    fn clear_empties_everything() {
        let mut pool = OrphanPool::new();
        enroll(&mut pool, &[Hash256([1; 32])], 0);
        pool.clear();
        assert!(pool.is_empty());
        assert!(!pool.has_waiting(&Hash256([1; 32])));
    }
}
