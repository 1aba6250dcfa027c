//! Shared fixtures for mempool integration tests: a mutable chain stub
//! and transaction builders over a single well-known keypair.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ember_core::chain::{ChainView, SigWorkers};
use ember_core::coins::Coin;
use ember_core::constants::SEQUENCE_FINAL;
use ember_core::crypto::{self, KeyPair};
use ember_core::error::ChainError;
use ember_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput,
};
use ember_mempool::{Mempool, MempoolConfig};

/// The keypair owning every test coin.
pub fn keypair() -> KeyPair {
    KeyPair::from_secret_bytes([42; 32])
}

pub fn owner_hash() -> Hash256 {
    keypair().public_key().pubkey_hash()
}

/// Mutable chain stub: coins live in a map, tip and height are settable.
pub struct TestChain {
    tip: Mutex<Hash256>,
    height: AtomicU64,
    median_time: AtomicU64,
    synced: AtomicBool,
    coins: Mutex<HashMap<OutPoint, Coin>>,
}

impl TestChain {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            tip: Mutex::new(Hash256([0xAB; 32])),
            height: AtomicU64::new(height),
            median_time: AtomicU64::new(1_700_000_000),
            synced: AtomicBool::new(true),
            coins: Mutex::new(HashMap::new()),
        })
    }

    /// Create a spendable coin owned by the test keypair.
    pub fn fund(&self, outpoint: OutPoint, value: u64, height: u64, coinbase: bool) {
        self.coins.lock().unwrap().insert(
            outpoint,
            Coin {
                output: TxOutput { value, pubkey_hash: owner_hash() },
                height,
                coinbase,
            },
        );
    }

    pub fn remove_coin(&self, outpoint: &OutPoint) {
        self.coins.lock().unwrap().remove(outpoint);
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_tip(&self, tip: Hash256) {
        *self.tip.lock().unwrap() = tip;
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }
}

impl ChainView for TestChain {
    fn tip(&self) -> Hash256 {
        *self.tip.lock().unwrap()
    }

    fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    fn has_csv(&self) -> bool {
        true
    }

    fn has_witness(&self) -> bool {
        true
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn median_time_past(&self) -> u64 {
        self.median_time.load(Ordering::SeqCst)
    }

    fn read_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ChainError> {
        Ok(self.coins.lock().unwrap().get(outpoint).cloned())
    }

    fn has_coins(&self, txid: &Hash256) -> Result<bool, ChainError> {
        Ok(self
            .coins
            .lock()
            .unwrap()
            .keys()
            .any(|outpoint| outpoint.txid == *txid))
    }
}

/// A pool over the given chain with inline (single-thread) verification.
pub fn pool_with(chain: Arc<TestChain>, config: MempoolConfig) -> Mempool {
    Mempool::open(chain, Arc::new(SigWorkers::new(1)), config).unwrap()
}

pub fn outpoint(seed: u8, index: u32) -> OutPoint {
    OutPoint { txid: Hash256([seed; 32]), index }
}

/// A signed transaction spending `inputs` into `outputs`, all owned by the
/// test keypair.
pub fn signed_tx(inputs: &[OutPoint], outputs: &[(u64, Hash256)]) -> Transaction {
    let kp = keypair();
    let mut tx = Transaction {
        version: 1,
        inputs: inputs
            .iter()
            .map(|op| TxInput {
                previous_output: *op,
                signature: vec![],
                public_key: vec![],
                sequence: SEQUENCE_FINAL,
                witness: vec![],
            })
            .collect(),
        outputs: outputs
            .iter()
            .map(|(value, pubkey_hash)| TxOutput { value: *value, pubkey_hash: *pubkey_hash })
            .collect(),
        lock_time: 0,
    };
    for index in 0..tx.inputs.len() {
        crypto::sign_input(&mut tx, index, &kp).unwrap();
    }
    tx
}

/// A spend of one outpoint back to the test keypair, leaving `fee` motes
/// behind.
pub fn simple_spend(op: OutPoint, input_value: u64, fee: u64) -> Transaction {
    signed_tx(&[op], &[(input_value - fee, owner_hash())])
}

/// A coinbase transaction paying the test keypair. `tag` makes the txid
/// unique per block.
pub fn coinbase_tx(value: u64, tag: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: vec![],
            public_key: vec![],
            sequence: SEQUENCE_FINAL,
            witness: vec![],
        }],
        outputs: vec![TxOutput { value, pubkey_hash: owner_hash() }],
        lock_time: tag,
    }
}

/// A block over the given transactions. The merkle root is not validated
/// by the mempool, so a placeholder suffices.
pub fn make_block(prev_hash: Hash256, txs: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: Hash256([0x77; 32]),
            timestamp: 1_700_000_100,
            difficulty_target: u64::MAX,
            nonce: 7,
        },
        transactions: txs,
    }
}

/// Re-derive every pool invariant that must hold at quiescence:
/// size accounting, the spent-map bijection, and descendant fee rollups
/// (exact for diamond-free graphs).
pub fn assert_invariants(pool: &Mempool) {
    // I1: size is the sum of entry memory usage.
    let expected: u64 = pool.entries().map(|e| e.mem_usage()).sum();
    assert_eq!(pool.size(), expected, "size accounting drifted");

    // I2/I3: every input maps to its spender, and nothing else is mapped.
    let mut input_count = 0usize;
    for entry in pool.entries() {
        for input in &entry.tx.inputs {
            input_count += 1;
            let spender = pool
                .get_spender(&input.previous_output)
                .unwrap_or_else(|| panic!("unmapped input {}", input.previous_output));
            assert_eq!(spender.hash, entry.hash, "spent map points at wrong entry");
        }
    }
    assert_eq!(pool.spent_count(), input_count, "stale spent-map entries");

    // I7: descendant fee rollup, recomputed by brute force.
    for entry in pool.entries() {
        let mut desc_fee = entry.delta_fee.max(0) as u64;
        let mut desc_size = entry.size;
        for hash in pool.get_descendants(&entry.hash) {
            let descendant = pool.get(&hash).expect("descendant present");
            desc_fee = desc_fee.saturating_add_signed(descendant.delta_fee);
            desc_size += descendant.size;
        }
        assert_eq!(entry.desc_fee, desc_fee, "desc_fee drifted for {}", entry.hash);
        assert_eq!(entry.desc_size, desc_size, "desc_size drifted for {}", entry.hash);
    }
}
