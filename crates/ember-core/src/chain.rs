//! Trait seams between the mempool engine and its collaborators.
//!
//! - [`ChainView`]: read-only view of the blockchain the engine validates
//!   against (the full node implements this over its UTXO database).
//! - [`ScriptVerifier`]: signature verification seam; [`SigWorkers`] is
//!   the default implementation, fanning input checks across a bounded
//!   thread pool.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::coins::{Coin, CoinView};
use crate::error::{ChainError, VerifyError};
use crate::policy;
use crate::types::{Hash256, OutPoint, Transaction};

/// Read-only view of the blockchain state the mempool validates against.
///
/// `read_coin` and `has_coins` may touch disk; everything else is cheap
/// metadata. Implemented by the full node over its chain database.
pub trait ChainView: Send + Sync {
    /// Hash of the current best block.
    fn tip(&self) -> Hash256;

    /// Height of the current best block.
    fn height(&self) -> u64;

    /// Whether relative lock times (v2 sequence semantics) have activated.
    fn has_csv(&self) -> bool;

    /// Whether witness relay has activated.
    fn has_witness(&self) -> bool;

    /// Whether initial block download has finished.
    fn is_synced(&self) -> bool;

    /// Median time of the last blocks up to the tip.
    fn median_time_past(&self) -> u64;

    /// Median time as of the block at `height`.
    ///
    /// Default implementation falls back to the tip's median time, which
    /// is correct for chains that do not retain per-block medians.
    fn median_time_at(&self, height: u64) -> u64 {
        let _ = height;
        self.median_time_past()
    }

    /// Current network-adjusted time in Unix seconds.
    fn time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Look up an unspent coin by outpoint. Returns `None` if spent or
    /// unknown.
    fn read_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ChainError>;

    /// Whether the chain holds any unspent coins created by `txid`.
    fn has_coins(&self, txid: &Hash256) -> Result<bool, ChainError>;
}

/// Signature verification seam.
///
/// The engine hands a fully resolved [`CoinView`] and a flag set to the
/// verifier; implementations decide how the work is scheduled.
pub trait ScriptVerifier: Send + Sync {
    fn verify(
        &self,
        hash: Hash256,
        tx: &Transaction,
        view: &CoinView,
        flags: u32,
    ) -> Result<(), VerifyError>;
}

/// Default verifier: fans input signature checks across a bounded scoped
/// thread pool. Small transactions are verified inline.
pub struct SigWorkers {
    threads: usize,
}

/// Below this many inputs the thread fan-out costs more than it saves.
const PARALLEL_THRESHOLD: usize = 8;

impl SigWorkers {
    pub fn new(threads: usize) -> Self {
        Self { threads: threads.max(1) }
    }
}

impl Default for SigWorkers {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }
}

impl ScriptVerifier for SigWorkers {
    fn verify(
        &self,
        hash: Hash256,
        tx: &Transaction,
        view: &CoinView,
        flags: u32,
    ) -> Result<(), VerifyError> {
        let inputs = tx.inputs.len();
        if self.threads <= 1 || inputs < PARALLEL_THRESHOLD {
            return policy::verify_scripts(hash, tx, view, flags);
        }

        let chunk = inputs.div_ceil(self.threads);
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.threads);
            for start in (0..inputs).step_by(chunk) {
                let end = (start + chunk).min(inputs);
                handles.push(scope.spawn(move || {
                    for index in start..end {
                        policy::verify_input_script(hash, tx, index, view, flags)?;
                    }
                    Ok(())
                }));
            }
            for handle in handles {
                handle.join().expect("verification worker panicked")?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Fixed-state chain stub for policy and engine tests.
    #[derive(Clone, Debug)]
    pub struct StubChain {
        pub tip: Hash256,
        pub height: u64,
        pub csv: bool,
        pub witness: bool,
        pub synced: bool,
        pub median_time: u64,
    }

    impl StubChain {
        pub fn at_height(height: u64) -> Self {
            Self {
                tip: Hash256([0xEE; 32]),
                height,
                csv: true,
                witness: true,
                synced: true,
                median_time: 1_700_000_000,
            }
        }

        pub fn with_median_time(mut self, time: u64) -> Self {
            self.median_time = time;
            self
        }
    }

    impl ChainView for StubChain {
        fn tip(&self) -> Hash256 {
            self.tip
        }
        fn height(&self) -> u64 {
            self.height
        }
        fn has_csv(&self) -> bool {
            self.csv
        }
        fn has_witness(&self) -> bool {
            self.witness
        }
        fn is_synced(&self) -> bool {
            self.synced
        }
        fn median_time_past(&self) -> u64 {
            self.median_time
        }
        fn read_coin(&self, _outpoint: &OutPoint) -> Result<Option<Coin>, ChainError> {
            Ok(None)
        }
        fn has_coins(&self, _txid: &Hash256) -> Result<bool, ChainError> {
            Ok(false)
        }
    }

    mod sig_workers {
        use super::*;
        use crate::constants::{COIN, SEQUENCE_FINAL, STANDARD_VERIFY_FLAGS};
        use crate::crypto::{self, KeyPair};
        use crate::types::{TxInput, TxOutput};

        fn signed_multi_input_tx(inputs: usize) -> (Transaction, CoinView) {
            let kp = KeyPair::from_secret_bytes([3; 32]);
            let owner = kp.public_key().pubkey_hash();

            let mut tx = Transaction {
                version: 1,
                inputs: (0..inputs)
                    .map(|i| TxInput {
                        previous_output: OutPoint {
                            txid: Hash256([i as u8 + 1; 32]),
                            index: 0,
                        },
                        signature: vec![],
                        public_key: vec![],
                        sequence: SEQUENCE_FINAL,
                        witness: vec![],
                    })
                    .collect(),
                outputs: vec![TxOutput { value: COIN, pubkey_hash: Hash256([0xBB; 32]) }],
                lock_time: 0,
            };

            let mut view = CoinView::new();
            for input in tx.inputs.clone() {
                view.add_coin(input.previous_output, TxOutput { value: COIN, pubkey_hash: owner }, 1, false);
            }
            for i in 0..inputs {
                crypto::sign_input(&mut tx, i, &kp).unwrap();
            }
            (tx, view)
        }

        #[test]
        fn parallel_verify_accepts_valid() {
            let (tx, view) = signed_multi_input_tx(PARALLEL_THRESHOLD + 4);
            let hash = tx.txid().unwrap();
            SigWorkers::new(4).verify(hash, &tx, &view, STANDARD_VERIFY_FLAGS).unwrap();
        }

        #[test]
        fn parallel_verify_rejects_one_bad_input() {
            let (mut tx, view) = signed_multi_input_tx(PARALLEL_THRESHOLD + 4);
            tx.inputs[5].signature[0] ^= 1;
            let hash = tx.txid().unwrap();
            assert!(SigWorkers::new(4)
                .verify(hash, &tx, &view, STANDARD_VERIFY_FLAGS)
                .is_err());
        }

        #[test]
        fn single_thread_falls_back_inline() {
            let (tx, view) = signed_multi_input_tx(2);
            let hash = tx.txid().unwrap();
            SigWorkers::new(1).verify(hash, &tx, &view, STANDARD_VERIFY_FLAGS).unwrap();
        }
    }
}
