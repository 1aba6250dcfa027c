//! Core protocol types: transactions, blocks, outpoints.
//!
//! All monetary values are in motes (1 EMBER = 10^8 motes).
//! Transaction ids are BLAKE3 hashes of the canonical encoding with witness
//! data stripped, so relay-stuffed witnesses cannot malleate the id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{
    LOCKTIME_THRESHOLD, SEQUENCE_FINAL, SEQUENCE_RBF_THRESHOLD,
};
use crate::error::CodecError;

/// A 32-byte hash value.
///
/// Used for transaction IDs (BLAKE3), block header hashes (SHA-256),
/// and address hashes (BLAKE3 of an Ed25519 public key).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self { txid: Hash256::ZERO, index: u32::MAX }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }

    /// Fixed 36-byte lookup key: 32-byte txid followed by the
    /// little-endian output index.
    pub fn key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(self.txid.as_bytes());
        key[32..].copy_from_slice(&self.index.to_le_bytes());
        key
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
///
/// Credentials live either in the `signature`/`public_key` fields, or, for
/// witness inputs, in `witness[0]` (signature) and `witness[1]` (public
/// key) with the base fields left empty.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Ed25519 signature (64 bytes). Empty for coinbase or witness inputs.
    pub signature: Vec<u8>,
    /// Ed25519 public key (32 bytes). Empty for coinbase or witness inputs.
    pub public_key: Vec<u8>,
    /// Sequence number carrying relative-lock and replaceability signals.
    pub sequence: u32,
    /// Witness items. Excluded from the transaction id.
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    /// Total bytes of witness data carried by this input.
    pub fn witness_size(&self) -> usize {
        self.witness.iter().map(|item| item.len()).sum()
    }

    /// The signature and public key bytes for this input, resolved from the
    /// witness when present.
    pub fn credentials(&self) -> (&[u8], &[u8]) {
        if self.witness.is_empty() {
            (&self.signature, &self.public_key)
        } else {
            let sig: &[u8] = self.witness.first().map(Vec::as_slice).unwrap_or(&[]);
            let key: &[u8] = self.witness.get(1).map(Vec::as_slice).unwrap_or(&[]);
            (sig, key)
        }
    }
}

/// A transaction output, creating a new spendable coin.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in motes (1 EMBER = 10^8 motes).
    pub value: u64,
    /// BLAKE3 hash of the recipient's Ed25519 public key.
    pub pubkey_hash: Hash256,
}

/// A transaction transferring value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version. Version 2 opts into relative lock times.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
}

impl Transaction {
    /// Compute the transaction ID: BLAKE3 over the canonical encoding with
    /// witness data stripped.
    pub fn txid(&self) -> Result<Hash256, CodecError> {
        let encoded = self.encode_base()?;
        Ok(Hash256(blake3::hash(&encoded).into()))
    }

    /// Canonical encoding including witness data.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a transaction from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (tx, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(tx)
    }

    /// Canonical encoding with witness data stripped.
    fn encode_base(&self) -> Result<Vec<u8>, CodecError> {
        let mut stripped = self.clone();
        for input in &mut stripped.inputs {
            input.witness.clear();
        }
        bincode::encode_to_vec(&stripped, bincode::config::standard())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Serialized size in bytes, witness included.
    pub fn size(&self) -> Result<usize, CodecError> {
        Ok(self.encode()?.len())
    }

    /// Serialized size in bytes with witness data stripped.
    pub fn base_size(&self) -> Result<usize, CodecError> {
        Ok(self.encode_base()?.len())
    }

    /// Transaction weight: `3 * base_size + total_size`, so witness bytes
    /// count once and base bytes count four times.
    pub fn weight(&self) -> Result<u64, CodecError> {
        let base = self.base_size()? as u64;
        let total = self.size()? as u64;
        Ok(3 * base + total)
    }

    /// Virtual size: weight scaled back to bytes, rounded up.
    pub fn vsize(&self) -> Result<u64, CodecError> {
        Ok(self.weight()?.div_ceil(4))
    }

    /// Whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Whether the transaction is final at the given height and time.
    ///
    /// `lock_time == 0` is always final. Otherwise the lock is compared
    /// against the height (below [`LOCKTIME_THRESHOLD`]) or the time, and
    /// inputs may override by all carrying [`SEQUENCE_FINAL`].
    pub fn is_final(&self, height: u64, time: u64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD { height } else { time };
        if self.lock_time < cutoff {
            return true;
        }
        self.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
    }

    /// Whether any input signals replace-by-fee willingness.
    pub fn is_rbf(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| input.sequence < SEQUENCE_RBF_THRESHOLD)
    }

    /// Signature-operation cost, scaled like weight: a base input costs 4,
    /// a witness input costs 1.
    pub fn sigops_cost(&self) -> u32 {
        self.inputs
            .iter()
            .map(|input| if input.witness.is_empty() { 4u32 } else { 1 })
            .sum()
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// Block header containing the proof-of-work puzzle.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u32,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// BLAKE3 merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Compact difficulty target.
    pub difficulty_target: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing.
    const HASH_SIZE: usize = 4 + 3 * 8 + 2 * 32;

    /// Compute the block header hash (double SHA-256) over a fixed
    /// little-endian byte layout.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty_target.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}
