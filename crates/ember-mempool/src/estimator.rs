//! Fee estimation from observed confirmation times.
//!
//! Accepted transactions are filed into geometric fee-rate buckets; when a
//! block confirms one, the bucket's exponential moving average of
//! blocks-to-confirm is updated. [`estimate_fee`](FeeEstimator::estimate_fee)
//! answers "what rate confirms within N blocks" by scanning buckets from
//! the cheapest up.
//!
//! Tracking only happens while the chain is synced; during initial block
//! download confirmation times say nothing about the live fee market.

use std::collections::HashMap;

use tracing::debug;

use ember_core::error::CodecError;
use ember_core::types::Hash256;

use crate::entry::MempoolEntry;

/// Ratio between adjacent bucket boundaries.
const BUCKET_SPACING: f64 = 1.1;
/// Lowest bucketed fee rate in motes/kB.
const MIN_BUCKET_RATE: f64 = 1_000.0;
/// Highest bucketed fee rate in motes/kB.
const MAX_BUCKET_RATE: f64 = 1e9;
/// EMA decay per confirmation sample.
const DECAY: f64 = 0.998;
/// Samples a bucket needs before it may answer estimates.
const MIN_SAMPLES: u64 = 8;

#[derive(Clone, Debug, bincode::Encode, bincode::Decode)]
struct FeeBucket {
    /// Upper fee-rate boundary of this bucket, motes/kB.
    max_rate: u64,
    /// Moving average of blocks-to-confirm for transactions in this
    /// bucket. Stored scaled by 1000 so the state blob stays integral.
    avg_blocks_milli: u64,
    samples: u64,
}

/// Serializable estimator state (the cache's `F` record).
#[derive(Clone, Debug, bincode::Encode, bincode::Decode)]
struct EstimatorState {
    buckets: Vec<FeeBucket>,
    best_height: u64,
}

struct TrackedTx {
    bucket: usize,
    height: u64,
}

/// Tracks fee-rate buckets from accepted and confirmed transactions.
pub struct FeeEstimator {
    buckets: Vec<FeeBucket>,
    tracked: HashMap<Hash256, TrackedTx>,
    best_height: u64,
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl FeeEstimator {
    pub fn new() -> Self {
        let mut buckets = Vec::new();
        let mut rate = MIN_BUCKET_RATE;
        while rate < MAX_BUCKET_RATE {
            buckets.push(FeeBucket { max_rate: rate as u64, avg_blocks_milli: 0, samples: 0 });
            rate *= BUCKET_SPACING;
        }
        Self { buckets, tracked: HashMap::new(), best_height: 0 }
    }

    /// Start tracking an accepted entry. No-op while unsynced.
    pub fn process_entry(&mut self, entry: &MempoolEntry, height: u64, synced: bool) {
        if !synced || entry.fee == 0 {
            return;
        }
        let bucket = self.bucket_for(entry.fee_rate());
        self.tracked.insert(entry.hash, TrackedTx { bucket, height });
    }

    /// Stop tracking an evicted entry.
    pub fn remove_entry(&mut self, hash: &Hash256) {
        self.tracked.remove(hash);
    }

    /// Record confirmations from a connected block.
    pub fn process_block(&mut self, height: u64, confirmed: &[Hash256], synced: bool) {
        self.best_height = height;
        if !synced {
            return;
        }
        let mut recorded = 0usize;
        for hash in confirmed {
            let Some(tracked) = self.tracked.remove(hash) else {
                continue;
            };
            let blocks = height.saturating_sub(tracked.height).max(1);
            let bucket = &mut self.buckets[tracked.bucket];
            let sample_milli = blocks * 1000;
            if bucket.samples == 0 {
                bucket.avg_blocks_milli = sample_milli;
            } else {
                bucket.avg_blocks_milli = ((bucket.avg_blocks_milli as f64) * DECAY
                    + (sample_milli as f64) * (1.0 - DECAY))
                    as u64;
            }
            bucket.samples += 1;
            recorded += 1;
        }
        if recorded > 0 {
            debug!(height, recorded, "fee estimator absorbed block");
        }
    }

    /// Lowest fee rate (motes/kB) expected to confirm within `target`
    /// blocks, or 0 when there is not enough data.
    pub fn estimate_fee(&self, target: u64) -> u64 {
        let target_milli = target.max(1) * 1000;
        for bucket in &self.buckets {
            if bucket.samples >= MIN_SAMPLES && bucket.avg_blocks_milli <= target_milli {
                return bucket.max_rate;
            }
        }
        0
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Serialize bucket state for the on-disk cache. In-flight tracking is
    /// deliberately not persisted; the pool reloads entries separately.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let state = EstimatorState {
            buckets: self.buckets.clone(),
            best_height: self.best_height,
        };
        bincode::encode_to_vec(&state, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Restore bucket state from the on-disk cache.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (state, _): (EstimatorState, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(Self { buckets: state.buckets, tracked: HashMap::new(), best_height: state.best_height })
    }

    pub fn best_height(&self) -> u64 {
        self.best_height
    }

    fn bucket_for(&self, fee_rate: u64) -> usize {
        self.buckets
            .iter()
            .position(|b| fee_rate <= b.max_rate)
            .unwrap_or(self.buckets.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::coins::{Coin, CoinView};
    use ember_core::constants::{COIN, SEQUENCE_FINAL};
    use ember_core::types::{OutPoint, Transaction, TxInput, TxOutput};

    fn entry_with_fee(seed: u8, fee: u64) -> MempoolEntry {
        let op = OutPoint { txid: Hash256([seed; 32]), index: 0 };
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: op,
                signature: vec![0; 64],
                public_key: vec![0; 32],
                sequence: SEQUENCE_FINAL,
                witness: vec![],
            }],
            outputs: vec![TxOutput { value: COIN, pubkey_hash: Hash256::ZERO }],
            lock_time: 0,
        };
        let hash = tx.txid().unwrap();
        let mut view = CoinView::new();
        view.add_entry(
            op,
            Coin {
                output: TxOutput { value: COIN + fee, pubkey_hash: Hash256::ZERO },
                height: 1,
                coinbase: false,
            },
        );
        MempoolEntry::from_tx(tx, hash, &view, 100, 0, 0).unwrap()
    }

    fn feed(estimator: &mut FeeEstimator, fee: u64, blocks_to_confirm: u64, count: u8) {
        for i in 0..count {
            let entry = entry_with_fee(i.wrapping_mul(31).wrapping_add(fee as u8), fee);
            let height = 100 + i as u64;
            estimator.process_entry(&entry, height, true);
            estimator.process_block(height + blocks_to_confirm, &[entry.hash], true);
        }
    }

    #[test]
    fn no_data_no_estimate() {
        let estimator = FeeEstimator::new();
        assert_eq!(estimator.estimate_fee(6), 0);
    }

    #[test]
    fn fast_confirmations_produce_estimate() {
        let mut estimator = FeeEstimator::new();
        feed(&mut estimator, 50_000, 1, 20);
        let estimate = estimator.estimate_fee(2);
        assert!(estimate > 0);
        // The answering bucket must cover the observed fee rate region.
        assert!(estimate <= 1_000_000);
    }

    #[test]
    fn slow_bucket_does_not_answer_tight_target() {
        let mut estimator = FeeEstimator::new();
        feed(&mut estimator, 2_000, 20, 20);
        assert_eq!(estimator.estimate_fee(2), 0);
        assert!(estimator.estimate_fee(25) > 0);
    }

    #[test]
    fn unsynced_chain_is_ignored() {
        let mut estimator = FeeEstimator::new();
        let entry = entry_with_fee(1, 10_000);
        estimator.process_entry(&entry, 100, false);
        estimator.process_block(101, &[entry.hash], false);
        assert_eq!(estimator.estimate_fee(6), 0);
        assert_eq!(estimator.best_height(), 101);
    }

    #[test]
    fn removed_entries_never_report() {
        let mut estimator = FeeEstimator::new();
        let entry = entry_with_fee(1, 10_000);
        estimator.process_entry(&entry, 100, true);
        estimator.remove_entry(&entry.hash);
        estimator.process_block(101, &[entry.hash], true);
        assert_eq!(estimator.estimate_fee(6), 0);
    }

    #[test]
    fn state_round_trips() {
        let mut estimator = FeeEstimator::new();
        feed(&mut estimator, 50_000, 1, 20);
        let blob = estimator.encode().unwrap();
        let restored = FeeEstimator::decode(&blob).unwrap();
        assert_eq!(restored.best_height(), estimator.best_height());
        assert_eq!(restored.estimate_fee(2), estimator.estimate_fee(2));
    }

    #[test]
    fn reset_clears_state() {
        let mut estimator = FeeEstimator::new();
        feed(&mut estimator, 50_000, 1, 20);
        estimator.reset();
        assert_eq!(estimator.estimate_fee(2), 0);
        assert_eq!(estimator.best_height(), 0);
    }
}
