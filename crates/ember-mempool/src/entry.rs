//! Pool entries: a transaction plus the bookkeeping the engine maintains
//! around it.
//!
//! `desc_fee`/`desc_size` are *descendant-updated* sums: each entry's own
//! `delta_fee`/`size` plus the contribution of every in-pool descendant at
//! the time it was admitted or re-prioritised. The eviction comparator
//! reads them as the package view of the entry.

use ember_core::coins::CoinView;
use ember_core::constants::FREE_THRESHOLD;
use ember_core::error::CodecError;
use ember_core::types::{Hash256, Transaction};

/// A transaction tracked by the mempool, with fee, priority, and
/// descendant accounting.
///
/// Field order is the on-disk cache blob layout; [`encode`](Self::encode)
/// and [`decode`](Self::decode) round-trip it exactly.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MempoolEntry {
    /// The verified transaction.
    pub tx: Transaction,
    /// Cached transaction id.
    pub hash: Hash256,
    /// Serialized size in bytes, witness included.
    pub size: u64,
    /// Fee actually paid: input value minus output value.
    pub fee: u64,
    /// Fee used for rate comparisons; starts at `fee`, moved by
    /// `prioritise`.
    pub delta_fee: i64,
    /// Total input value, needed to re-price priority at later heights.
    pub value: u64,
    /// Whether any input spends a coinbase output. Reorgs can break the
    /// maturity such a spend was admitted under, so these entries are
    /// evicted wholesale by the reorg sanitizer.
    pub spends_coinbase: bool,
    /// Priority at entry time: confirmed input value weighted by age,
    /// per byte.
    pub priority: i64,
    /// Chain height when the entry was admitted.
    pub height: u64,
    /// Unix time when the entry was admitted.
    pub time: u64,
    /// Signature-operation cost.
    pub sigops: u32,
    /// Descendant-updated fee: own `delta_fee` plus all in-pool
    /// descendants'.
    pub desc_fee: u64,
    /// Descendant-updated size: own `size` plus all in-pool descendants'.
    pub desc_size: u64,
    /// Peer the transaction arrived from; -1 for local or reorg reinserts.
    pub peer: i32,
}

/// Map/graph bookkeeping overhead charged per entry on top of its
/// serialized size.
const MEM_OVERHEAD: u64 = 160;

impl MempoolEntry {
    /// Build an entry for a transaction whose inputs are fully resolved in
    /// `view`.
    ///
    /// The fee saturates at zero when outputs exceed inputs; admission
    /// rejects such transactions before the entry is kept.
    pub fn from_tx(
        tx: Transaction,
        hash: Hash256,
        view: &CoinView,
        height: u64,
        time: u64,
        peer: i32,
    ) -> Result<Self, CodecError> {
        let size = tx.size()? as u64;
        let value = view.input_value(&tx).unwrap_or(0);
        let output_value = tx.total_output_value().unwrap_or(0);
        let fee = value.saturating_sub(output_value);
        let sigops = tx.sigops_cost();
        let spends_coinbase = tx
            .inputs
            .iter()
            .any(|input| view.get(&input.previous_output).is_some_and(|coin| coin.coinbase));

        // Confirmed input value weighted by age, per byte.
        let mut weighted: u128 = 0;
        for input in &tx.inputs {
            if let Some(coin) = view.get(&input.previous_output) {
                if !coin.is_unconfirmed() && coin.height <= height {
                    let age = (height - coin.height) as u128;
                    weighted += coin.output.value as u128 * age;
                }
            }
        }
        let priority = (weighted / size.max(1) as u128).min(i64::MAX as u128) as i64;

        Ok(Self {
            tx,
            hash,
            size,
            fee,
            delta_fee: fee as i64,
            value,
            spends_coinbase,
            priority,
            height,
            time,
            sigops,
            desc_fee: fee,
            desc_size: size,
            peer,
        })
    }

    /// Bytes this entry charges against the pool's `max_size`.
    pub fn mem_usage(&self) -> u64 {
        self.size + MEM_OVERHEAD
    }

    /// Priority re-priced at `height`: input value keeps aging while the
    /// entry waits.
    pub fn priority_at(&self, height: u64) -> i64 {
        let delta = height.saturating_sub(self.height) as u128;
        let accrued = (self.value as u128 * delta / self.size.max(1) as u128)
            .min(i64::MAX as u128) as i64;
        self.priority.saturating_add(accrued)
    }

    /// Whether this entry rides free relay at `height`.
    pub fn is_free(&self, height: u64) -> bool {
        self.priority_at(height) > FREE_THRESHOLD as i64
    }

    /// Direct fee rate in motes per 1000 bytes.
    pub fn fee_rate(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        (self.fee as u128 * 1000 / self.size as u128).min(u64::MAX as u128) as u64
    }

    /// Whether the descendant package view outbids the direct view:
    /// `desc_fee / desc_size > delta_fee / size`, cross-multiplied.
    pub fn use_desc(&self) -> bool {
        let delta = self.delta_fee.max(0) as u128;
        self.desc_fee as u128 * self.size as u128 > delta * self.desc_size as u128
    }

    /// Serialize for the on-disk cache.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Deserialize from the on-disk cache.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (entry, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::coins::Coin;
    use ember_core::constants::{COIN, COIN_HEIGHT_UNCONFIRMED, SEQUENCE_FINAL};
    use ember_core::types::{OutPoint, TxInput, TxOutput};

    fn outpoint(seed: u8) -> OutPoint {
        OutPoint { txid: Hash256([seed; 32]), index: 0 }
    }

    fn spend(seed: u8, out_value: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: outpoint(seed),
                signature: vec![0; 64],
                public_key: vec![0; 32],
                sequence: SEQUENCE_FINAL,
                witness: vec![],
            }],
            outputs: vec![TxOutput { value: out_value, pubkey_hash: Hash256::ZERO }],
            lock_time: 0,
        }
    }

    fn entry_for(in_value: u64, out_value: u64, coin_height: u64, height: u64) -> MempoolEntry {
        let tx = spend(1, out_value);
        let hash = tx.txid().unwrap();
        let mut view = CoinView::new();
        view.add_entry(
            outpoint(1),
            Coin {
                output: TxOutput { value: in_value, pubkey_hash: Hash256::ZERO },
                height: coin_height,
                coinbase: false,
            },
        );
        MempoolEntry::from_tx(tx, hash, &view, height, 1_000, 3).unwrap()
    }

    #[test]
    fn spends_coinbase_flag() {
        let tx = spend(1, COIN);
        let hash = tx.txid().unwrap();
        let mut view = CoinView::new();
        view.add_entry(
            outpoint(1),
            Coin {
                output: TxOutput { value: 2 * COIN, pubkey_hash: Hash256::ZERO },
                height: 5,
                coinbase: true,
            },
        );
        let entry = MempoolEntry::from_tx(tx, hash, &view, 200, 0, 0).unwrap();
        assert!(entry.spends_coinbase);
        assert!(!entry_for(COIN, COIN / 2, 5, 100).spends_coinbase);
    }

    #[test]
    fn fee_and_descendant_seeds() {
        let entry = entry_for(50 * COIN, 49 * COIN, 10, 100);
        assert_eq!(entry.fee, COIN);
        assert_eq!(entry.delta_fee, COIN as i64);
        assert_eq!(entry.desc_fee, COIN);
        assert_eq!(entry.desc_size, entry.size);
        assert_eq!(entry.value, 50 * COIN);
        assert_eq!(entry.peer, 3);
    }

    #[test]
    fn fee_saturates_when_outputs_exceed_inputs() {
        let entry = entry_for(COIN, 2 * COIN, 10, 100);
        assert_eq!(entry.fee, 0);
    }

    #[test]
    fn mem_usage_exceeds_size() {
        let entry = entry_for(50 * COIN, 49 * COIN, 10, 100);
        assert_eq!(entry.mem_usage(), entry.size + 160);
    }

    #[test]
    fn priority_grows_with_height() {
        let entry = entry_for(50 * COIN, 49 * COIN, 0, 100);
        let now = entry.priority_at(100);
        let later = entry.priority_at(200);
        assert!(later > now);
        assert_eq!(now, entry.priority);
    }

    #[test]
    fn unconfirmed_inputs_carry_no_priority() {
        let tx = spend(1, COIN);
        let hash = tx.txid().unwrap();
        let mut view = CoinView::new();
        view.add_entry(
            outpoint(1),
            Coin {
                output: TxOutput { value: 2 * COIN, pubkey_hash: Hash256::ZERO },
                height: COIN_HEIGHT_UNCONFIRMED,
                coinbase: false,
            },
        );
        let entry = MempoolEntry::from_tx(tx, hash, &view, 100, 1_000, 0).unwrap();
        assert_eq!(entry.priority, 0);
    }

    #[test]
    fn aged_whale_rides_free() {
        // A large, old input accrues priority past the free threshold.
        let entry = entry_for(1_000 * COIN, 999 * COIN, 0, 0);
        assert!(!entry.is_free(0));
        assert!(entry.is_free(10_000));
    }

    #[test]
    fn fee_rate_per_kilobyte() {
        let mut entry = entry_for(50 * COIN, 49 * COIN, 10, 100);
        entry.fee = 500;
        entry.size = 250;
        assert_eq!(entry.fee_rate(), 2000);
    }

    #[test]
    fn use_desc_flips_when_package_outbids() {
        let mut entry = entry_for(50 * COIN, 49 * COIN, 10, 100);
        assert!(!entry.use_desc());
        // A high-fee child doubles the package fee for little extra size.
        entry.desc_fee = entry.fee * 3;
        entry.desc_size = entry.size + 10;
        assert!(entry.use_desc());
    }

    #[test]
    fn cache_blob_round_trip() {
        let mut entry = entry_for(50 * COIN, 49 * COIN, 10, 100);
        entry.delta_fee = -44;
        entry.desc_fee = 12345;
        entry.peer = -1;
        let blob = entry.encode().unwrap();
        assert_eq!(MempoolEntry::decode(&blob).unwrap(), entry);
    }
}
