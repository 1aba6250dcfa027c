//! Optional address-keyed secondary indices.
//!
//! When `index_address` is enabled the pool maintains two views keyed by
//! output pubkey hash:
//!
//! - [`TxIndex`]: address → unconfirmed transactions touching it (as
//!   sender or recipient).
//! - [`CoinIndex`]: address → unspent in-pool coins. Spending a parent's
//!   output removes it from the index; removing the spender restores it
//!   when the parent is still pooled.

use std::collections::{HashMap, HashSet};

use ember_core::coins::CoinView;
use ember_core::types::{Hash256, OutPoint, Transaction, TxOutput};

use crate::entry::MempoolEntry;

/// Address → unconfirmed transaction ids, with the inverse map for
/// removal.
#[derive(Default)]
pub struct TxIndex {
    by_address: HashMap<Hash256, HashSet<Hash256>>,
    addresses: HashMap<Hash256, Vec<Hash256>>,
}

impl TxIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactions touching `address`.
    pub fn get(&self, address: &Hash256) -> Vec<Hash256> {
        self.by_address
            .get(address)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Index an inserted entry: the union of its input owners (resolved
    /// via `view`) and its output recipients.
    pub fn insert(&mut self, entry: &MempoolEntry, view: &CoinView) {
        let mut touched: HashSet<Hash256> = HashSet::new();
        for input in &entry.tx.inputs {
            if let Some(coin) = view.get(&input.previous_output) {
                touched.insert(coin.output.pubkey_hash);
            }
        }
        for output in &entry.tx.outputs {
            touched.insert(output.pubkey_hash);
        }

        for address in &touched {
            self.by_address.entry(*address).or_default().insert(entry.hash);
        }
        self.addresses.insert(entry.hash, touched.into_iter().collect());
    }

    pub fn remove(&mut self, hash: &Hash256) {
        let Some(addresses) = self.addresses.remove(hash) else {
            return;
        };
        for address in addresses {
            if let Some(set) = self.by_address.get_mut(&address) {
                set.remove(hash);
                if set.is_empty() {
                    self.by_address.remove(&address);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_address.clear();
        self.addresses.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty() && self.addresses.is_empty()
    }
}

/// An unspent in-pool coin carried by the [`CoinIndex`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedCoin {
    pub outpoint: OutPoint,
    pub output: TxOutput,
}

/// Address → unspent in-pool coins, with the inverse map for removal.
#[derive(Default)]
pub struct CoinIndex {
    by_address: HashMap<Hash256, HashMap<[u8; 36], IndexedCoin>>,
    // txid → addresses whose coin sets reference its outputs.
    owners: HashMap<Hash256, Vec<Hash256>>,
}

impl CoinIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unspent in-pool coins paying `address`.
    pub fn get(&self, address: &Hash256) -> Vec<IndexedCoin> {
        self.by_address
            .get(address)
            .map(|coins| coins.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Index an inserted entry: the parents' outputs it spends are no
    /// longer unspent; its own outputs are.
    pub fn insert(&mut self, entry: &MempoolEntry, view: &CoinView) {
        for input in &entry.tx.inputs {
            if let Some(coin) = view.get(&input.previous_output) {
                if coin.is_unconfirmed() {
                    self.remove_coin(&coin.output.pubkey_hash, &input.previous_output);
                }
            }
        }
        self.add_outputs(entry.hash, &entry.tx);
    }

    /// Unindex a removed entry. `parent_output` resolves an outpoint to
    /// the output of a transaction still in the pool, so spent parent
    /// coins can be restored.
    pub fn remove(
        &mut self,
        entry: &MempoolEntry,
        parent_output: impl Fn(&OutPoint) -> Option<TxOutput>,
    ) {
        // Drop this entry's own outputs.
        if let Some(addresses) = self.owners.remove(&entry.hash) {
            for (index, address) in addresses.into_iter().enumerate() {
                let outpoint = OutPoint { txid: entry.hash, index: index as u32 };
                self.remove_coin(&address, &outpoint);
            }
        }

        // Restore the parents' outputs this entry was spending, for
        // parents still present in the pool.
        for input in &entry.tx.inputs {
            let outpoint = input.previous_output;
            if let Some(output) = parent_output(&outpoint) {
                self.by_address
                    .entry(output.pubkey_hash)
                    .or_default()
                    .insert(outpoint.key(), IndexedCoin { outpoint, output });
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_address.clear();
        self.owners.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty() && self.owners.is_empty()
    }

    fn add_outputs(&mut self, txid: Hash256, tx: &Transaction) {
        let mut addresses = Vec::with_capacity(tx.outputs.len());
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            self.by_address
                .entry(output.pubkey_hash)
                .or_default()
                .insert(outpoint.key(), IndexedCoin { outpoint, output: output.clone() });
            addresses.push(output.pubkey_hash);
        }
        self.owners.insert(txid, addresses);
    }

    fn remove_coin(&mut self, address: &Hash256, outpoint: &OutPoint) {
        if let Some(coins) = self.by_address.get_mut(address) {
            coins.remove(&outpoint.key());
            if coins.is_empty() {
                self.by_address.remove(address);
            }
        }
    }
}
