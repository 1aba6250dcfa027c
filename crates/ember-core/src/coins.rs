//! Spendable coins and the per-transaction coin view.
//!
//! A [`CoinView`] is assembled for each transaction being validated: every
//! input's outpoint is resolved against in-pool parents and the chain
//! database, and the resulting map travels through policy checks, script
//! verification, and index updates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{COINBASE_MATURITY, COIN_HEIGHT_UNCONFIRMED};
use crate::types::{Hash256, OutPoint, Transaction, TxOutput};

/// A spendable output as seen by validation.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Coin {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block containing this coin, or
    /// [`COIN_HEIGHT_UNCONFIRMED`] for in-pool parents.
    pub height: u64,
    /// Whether this output is from a coinbase transaction.
    pub coinbase: bool,
}

impl Coin {
    /// Whether this coin is spendable at `current_height`.
    ///
    /// Coinbase outputs require [`COINBASE_MATURITY`] confirmations;
    /// everything else is always mature. Unconfirmed coins are never
    /// coinbase (coinbases cannot enter the mempool).
    pub fn is_mature(&self, current_height: u64) -> bool {
        if !self.coinbase {
            return true;
        }
        if self.height == COIN_HEIGHT_UNCONFIRMED {
            return false;
        }
        current_height.saturating_sub(self.height) >= COINBASE_MATURITY
    }

    /// Whether this coin comes from an unconfirmed in-pool parent.
    pub fn is_unconfirmed(&self) -> bool {
        self.height == COIN_HEIGHT_UNCONFIRMED
    }
}

/// Resolved coins for one transaction's inputs.
///
/// Slots that could not be resolved are simply absent; orphan
/// classification inspects the gaps.
#[derive(Debug, Default, Clone)]
pub struct CoinView {
    entries: HashMap<OutPoint, Coin>,
}

impl CoinView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the view holds a coin for this outpoint.
    pub fn has_entry(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.entries.get(outpoint)
    }

    /// Add a resolved coin for an outpoint.
    pub fn add_entry(&mut self, outpoint: OutPoint, coin: Coin) {
        self.entries.insert(outpoint, coin);
    }

    /// Add a chain coin by its parts.
    pub fn add_coin(&mut self, outpoint: OutPoint, output: TxOutput, height: u64, coinbase: bool) {
        self.add_entry(outpoint, Coin { output, height, coinbase });
    }

    /// Add output `index` of `tx` as a coin at `height`. Used to pull
    /// in-pool parent outputs into the view
    /// (`height == COIN_HEIGHT_UNCONFIRMED`).
    pub fn add_index(&mut self, txid: Hash256, tx: &Transaction, index: u32, height: u64) {
        if let Some(output) = tx.outputs.get(index as usize) {
            self.add_entry(
                OutPoint { txid, index },
                Coin { output: output.clone(), height, coinbase: tx.is_coinbase() },
            );
        }
    }

    /// Total value of the coins resolved for `tx`'s inputs, or `None` if
    /// any input is unresolved or the sum overflows.
    pub fn input_value(&self, tx: &Transaction) -> Option<u64> {
        tx.inputs.iter().try_fold(0u64, |acc, input| {
            let coin = self.entries.get(&input.previous_output)?;
            acc.checked_add(coin.output.value)
        })
    }

    /// Outpoints of `tx`'s inputs that the view failed to resolve.
    pub fn missing(&self, tx: &Transaction) -> Vec<OutPoint> {
        tx.inputs
            .iter()
            .map(|input| input.previous_output)
            .filter(|outpoint| !self.entries.contains_key(outpoint))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
