//! Error types for the Ember protocol.
use std::fmt;

use thiserror::Error;

use crate::types::Hash256;

/// Reject classification carried by a [`VerifyError`].
///
/// Mirrors the reject categories used on the wire: peers receiving one of
/// these know whether the transaction was malformed (`Invalid`), merely
/// unwelcome under local policy (`Nonstandard`), or redundant
/// (`AlreadyKnown` / `Duplicate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Invalid,
    Nonstandard,
    AlreadyKnown,
    Duplicate,
    InsufficientFee,
    HighFee,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Nonstandard => "nonstandard",
            Self::AlreadyKnown => "alreadyknown",
            Self::Duplicate => "duplicate",
            Self::InsufficientFee => "insufficientfee",
            Self::HighFee => "highfee",
        };
        f.write_str(s)
    }
}

/// The only externally visible failure class of transaction admission.
///
/// Carries the offending txid, a reject classification, a short reason
/// string, and a misbehavior score for the originating peer. `malleated`
/// marks failures that third parties could have caused by stuffing witness
/// data; such failures must not poison the reject filter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {reason} (score {score})")]
pub struct VerifyError {
    pub hash: Hash256,
    pub code: RejectCode,
    pub reason: &'static str,
    pub score: u32,
    pub malleated: bool,
}

impl VerifyError {
    pub fn new(hash: Hash256, code: RejectCode, reason: &'static str, score: u32) -> Self {
        Self { hash, code, reason, score, malleated: false }
    }

    /// Same as [`new`](Self::new) but flagged as witness-malleation-caused.
    pub fn malleated(hash: Hash256, code: RejectCode, reason: &'static str, score: u32) -> Self {
        Self { hash, code, reason, score, malleated: true }
    }
}

/// Serialization failures from the canonical bincode encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
}

/// Failures reported by the chain collaborator (UTXO database reads,
/// tip queries). Propagated unchanged through the mempool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain storage: {0}")] Storage(String),
    #[error("chain codec: {0}")] Codec(#[from] CodecError),
}

/// Failures from the on-disk mempool cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache storage: {0}")] Storage(String),
    #[error("cache codec: {0}")] Codec(#[from] CodecError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("pubkey hash does not match expected")] PubkeyHashMismatch,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
}

/// Aggregate error for mempool operations: a typed admission rejection, or
/// a collaborator/IO failure passed through unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error(transparent)] Verify(#[from] VerifyError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Cache(#[from] CacheError),
}

impl MempoolError {
    /// The admission rejection, if this is one.
    pub fn verify(&self) -> Option<&VerifyError> {
        match self {
            Self::Verify(e) => Some(e),
            _ => None,
        }
    }
}
