//! Ed25519 cryptographic operations for the Ember protocol.
//!
//! Provides key generation, transaction signing, and signature verification.
//! Uses ed25519-dalek for the underlying Ed25519 implementation and BLAKE3
//! for pubkey hashing and signing hashes.
//!
//! # Signing scheme
//!
//! Transaction inputs are signed using a **sighash** that commits to:
//! - Transaction version and lock_time
//! - All input outpoints and sequence numbers
//! - All outputs (value + pubkey_hash)
//! - The index of the input being signed
//!
//! Signatures, public keys, and witness data are excluded from the sighash
//! to avoid circularity and allow inputs to be signed independently in any
//! order. Credentials may be carried in the input's base fields or, for
//! witness inputs, in `witness[0]` / `witness[1]`.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Hash256, Transaction};

/// Ed25519 keypair for signing transactions.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self { signing_key: ed25519_dalek::SigningKey::generate(&mut csprng) }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self { signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes) }
    }

    /// Derive the public key from this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey { verifying_key: self.signing_key.verifying_key() }
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verifying signatures and deriving addresses.
///
/// The pubkey hash (BLAKE3 of the raw 32-byte key) is what
/// [`TxOutput`](crate::types::TxOutput) stores to identify the recipient.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Create a public key from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    /// Get the raw public key bytes (32 bytes).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Compute the BLAKE3 pubkey hash used in transaction outputs.
    pub fn pubkey_hash(&self) -> Hash256 {
        pubkey_hash(&self.to_bytes())
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.pubkey_hash())
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

/// Compute the BLAKE3 pubkey hash from raw public key bytes.
pub fn pubkey_hash(pubkey_bytes: &[u8; 32]) -> Hash256 {
    Hash256(blake3::hash(pubkey_bytes).into())
}

/// Compute the signing hash (sighash) for a transaction input.
pub fn signing_hash(tx: &Transaction, input_index: usize) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = Vec::new();

    data.extend_from_slice(&tx.version.to_le_bytes());

    // All input outpoints and sequences (no signatures, pubkeys, witnesses).
    data.extend_from_slice(&(tx.inputs.len() as u64).to_le_bytes());
    for input in &tx.inputs {
        data.extend_from_slice(input.previous_output.txid.as_bytes());
        data.extend_from_slice(&input.previous_output.index.to_le_bytes());
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    data.extend_from_slice(&(tx.outputs.len() as u64).to_le_bytes());
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        data.extend_from_slice(output.pubkey_hash.as_bytes());
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data.extend_from_slice(&(input_index as u64).to_le_bytes());

    Ok(Hash256(blake3::hash(&data).into()))
}

/// Sign a transaction input in place, writing the signature and public key
/// into the input's base fields.
pub fn sign_input(
    tx: &mut Transaction,
    input_index: usize,
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index)?;
    let signature = keypair.sign(sighash.as_bytes());
    let pubkey_bytes = keypair.public_key().to_bytes();

    tx.inputs[input_index].signature = signature.to_vec();
    tx.inputs[input_index].public_key = pubkey_bytes.to_vec();
    Ok(())
}

/// Sign a transaction input in place, carrying the credentials as witness
/// items (`witness[0]` = signature, `witness[1]` = public key) and leaving
/// the base fields empty.
pub fn sign_input_witness(
    tx: &mut Transaction,
    input_index: usize,
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index)?;
    let signature = keypair.sign(sighash.as_bytes());
    let pubkey_bytes = keypair.public_key().to_bytes();

    let input = &mut tx.inputs[input_index];
    input.signature.clear();
    input.public_key.clear();
    input.witness = vec![signature.to_vec(), pubkey_bytes.to_vec()];
    Ok(())
}

/// Verify a transaction input's signature against an expected pubkey hash.
///
/// Credentials are resolved from the witness when present. Checks that:
/// 1. The input carries a 64-byte signature and 32-byte public key
/// 2. The public key's BLAKE3 hash matches `expected_pubkey_hash`
/// 3. The Ed25519 signature verifies against the sighash
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    expected_pubkey_hash: &Hash256,
) -> Result<(), CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let (sig, key) = tx.inputs[input_index].credentials();
    verify_input_credentials(tx, input_index, expected_pubkey_hash, sig, key)
}

/// Verify explicit credentials against an input's sighash, bypassing the
/// witness-or-base resolution of [`verify_input`].
pub fn verify_input_credentials(
    tx: &Transaction,
    input_index: usize,
    expected_pubkey_hash: &Hash256,
    sig: &[u8],
    key: &[u8],
) -> Result<(), CryptoError> {
    let pk_bytes: [u8; 32] = key.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
    let pk = PublicKey::from_bytes(&pk_bytes)?;

    if pk.pubkey_hash() != *expected_pubkey_hash {
        return Err(CryptoError::PubkeyHashMismatch);
    }

    let sig_bytes: [u8; 64] = sig.try_into().map_err(|_| CryptoError::InvalidSignature)?;

    let sighash = signing_hash(tx, input_index)?;
    pk.verify(sighash.as_bytes(), &sig_bytes)
}
