//! Relay policy and contextual transaction checks.
//!
//! Layers, in the order the admission pipeline applies them:
//!
//! - **sanity** ([`check_sanity`]): context-free shape checks. No external
//!   state required.
//! - **standardness** ([`check_standard`], [`check_standard_inputs`]):
//!   local relay policy. Only consulted when the node requires standard
//!   transactions.
//! - **contextual** ([`check_inputs`], [`verify_final`],
//!   [`check_sequence_locks`]): coin-aware checks including maturity,
//!   value conservation, and lock times.
//! - **scripts** ([`verify_scripts`]): signature verification under a set
//!   of verify flags. The flag-retry dance that detects witness malleation
//!   lives in the mempool, not here.

use std::collections::HashSet;

use crate::chain::ChainView;
use crate::coins::CoinView;
use crate::constants::{
    LOCKTIME_MEDIAN_TIME_PAST, LOCKTIME_VERIFY_SEQUENCE, MAX_INPUTS, MAX_OUTPUTS,
    MAX_STANDARD_VERSION, MAX_TX_SIZE, MAX_TX_WEIGHT, MAX_WITNESS_ITEMS, MAX_WITNESS_ITEM_SIZE,
    SEQUENCE_DISABLE_FLAG, SEQUENCE_GRANULARITY, SEQUENCE_MASK, SEQUENCE_TYPE_FLAG,
    VERIFY_CLEANSTACK, VERIFY_WITNESS,
};
use crate::crypto;
use crate::error::{RejectCode, VerifyError};
use crate::types::{Hash256, Transaction};

/// Serialized size assumed for spending one output, used by the dust rule.
const INPUT_SPEND_SIZE: u64 = 148;

/// Largest signature field accepted by sanity (coinbase data rides in the
/// signature field and may exceed 64 bytes).
const MAX_SCRIPT_FIELD_SIZE: usize = 1_000;

/// Minimum fee for a transaction of `size` bytes at `rate` motes/kB.
pub fn min_fee(size: u64, rate: u64) -> u64 {
    let fee = rate.saturating_mul(size) / 1000;
    if fee == 0 && rate > 0 {
        1
    } else {
        fee
    }
}

/// Outputs below this value are considered dust at the given relay rate:
/// three times the relay cost of spending them.
pub fn dust_threshold(min_relay_fee: u64) -> u64 {
    3 * INPUT_SPEND_SIZE * min_relay_fee / 1000
}

/// Context-free shape checks: size and weight bounds, non-empty inputs and
/// outputs, value overflow, duplicate inputs, null prevouts, oversized
/// script fields.
pub fn check_sanity(hash: Hash256, tx: &Transaction) -> Result<(), VerifyError> {
    let invalid = |reason, score| Err(VerifyError::new(hash, RejectCode::Invalid, reason, score));

    if tx.inputs.is_empty() {
        return invalid("bad-txns-vin-empty", 100);
    }
    if tx.outputs.is_empty() {
        return invalid("bad-txns-vout-empty", 100);
    }
    if tx.inputs.len() > MAX_INPUTS {
        return invalid("bad-txns-too-many-inputs", 100);
    }
    if tx.outputs.len() > MAX_OUTPUTS {
        return invalid("bad-txns-too-many-outputs", 100);
    }

    let size = tx
        .size()
        .map_err(|_| VerifyError::new(hash, RejectCode::Invalid, "bad-txns-undecodable", 100))?;
    if size > MAX_TX_SIZE {
        return invalid("bad-txns-oversize", 100);
    }
    let weight = tx
        .weight()
        .map_err(|_| VerifyError::new(hash, RejectCode::Invalid, "bad-txns-undecodable", 100))?;
    if weight > MAX_TX_WEIGHT {
        return invalid("bad-txns-oversize", 100);
    }

    if tx.total_output_value().is_none() {
        return invalid("bad-txns-txouttotal-toolarge", 100);
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    let coinbase = tx.is_coinbase();
    for input in &tx.inputs {
        if !coinbase && input.previous_output.is_null() {
            return invalid("bad-txns-prevout-null", 10);
        }
        if !seen.insert(input.previous_output) {
            return invalid("bad-txns-inputs-duplicate", 100);
        }
        if input.signature.len() > MAX_SCRIPT_FIELD_SIZE
            || input.public_key.len() > MAX_SCRIPT_FIELD_SIZE
        {
            return invalid("bad-txns-script-oversize", 100);
        }
    }

    Ok(())
}

/// Local relay policy: version cap, standard credential forms, witness
/// shape, dust outputs.
pub fn check_standard(
    hash: Hash256,
    tx: &Transaction,
    min_relay_fee: u64,
) -> Result<(), VerifyError> {
    let nonstandard =
        |reason| Err(VerifyError::new(hash, RejectCode::Nonstandard, reason, 0));

    if tx.version > MAX_STANDARD_VERSION {
        return nonstandard("version");
    }

    for input in &tx.inputs {
        if input.witness.is_empty() {
            if input.signature.len() != 64 || input.public_key.len() != 32 {
                return nonstandard("scriptsig-size");
            }
        } else {
            if !input.signature.is_empty() || !input.public_key.is_empty() {
                return nonstandard("bad-witness-nonstandard");
            }
            if input.witness.len() > MAX_WITNESS_ITEMS {
                return nonstandard("bad-witness-nonstandard");
            }
            if input.witness.iter().any(|item| item.len() > MAX_WITNESS_ITEM_SIZE) {
                return nonstandard("bad-witness-nonstandard");
            }
        }
    }

    let dust = dust_threshold(min_relay_fee);
    for output in &tx.outputs {
        if output.value < dust {
            return nonstandard("dust");
        }
    }

    Ok(())
}

/// Cheap owner precheck on resolved inputs: the carried public key must
/// hash to the coin's pubkey hash. Catches mismatched credentials before
/// paying for signature verification.
pub fn check_standard_inputs(
    hash: Hash256,
    tx: &Transaction,
    view: &CoinView,
) -> Result<(), VerifyError> {
    for input in &tx.inputs {
        let Some(coin) = view.get(&input.previous_output) else {
            continue;
        };
        let (_, key) = input.credentials();
        let Ok(key_bytes) = <&[u8; 32]>::try_from(key) else {
            return Err(VerifyError::new(
                hash,
                RejectCode::Nonstandard,
                "bad-txns-nonstandard-inputs",
                0,
            ));
        };
        if crypto::pubkey_hash(key_bytes) != coin.output.pubkey_hash {
            return Err(VerifyError::new(
                hash,
                RejectCode::Nonstandard,
                "bad-txns-nonstandard-inputs",
                0,
            ));
        }
    }
    Ok(())
}

/// Coin-aware consensus checks: every input resolved, coinbase maturity,
/// value conservation. Returns the transaction fee.
pub fn check_inputs(
    hash: Hash256,
    tx: &Transaction,
    view: &CoinView,
    height: u64,
) -> Result<u64, VerifyError> {
    let mut total_input: u64 = 0;

    for input in &tx.inputs {
        let coin = view.get(&input.previous_output).ok_or_else(|| {
            VerifyError::new(hash, RejectCode::Invalid, "bad-txns-inputs-missingorspent", 100)
        })?;

        if coin.coinbase && !coin.is_mature(height) {
            return Err(VerifyError::new(
                hash,
                RejectCode::Invalid,
                "bad-txns-premature-spend-of-coinbase",
                0,
            ));
        }

        total_input = total_input.checked_add(coin.output.value).ok_or_else(|| {
            VerifyError::new(hash, RejectCode::Invalid, "bad-txns-inputvalues-outofrange", 100)
        })?;
    }

    let total_output = tx.total_output_value().ok_or_else(|| {
        VerifyError::new(hash, RejectCode::Invalid, "bad-txns-txouttotal-toolarge", 100)
    })?;

    if total_input < total_output {
        return Err(VerifyError::new(hash, RejectCode::Invalid, "bad-txns-in-belowout", 100));
    }

    Ok(total_input - total_output)
}

/// Whether the transaction is final with respect to the next block.
///
/// Time-based locks compare against median-time-past when
/// [`LOCKTIME_MEDIAN_TIME_PAST`] is set, the chain's network-adjusted
/// time otherwise.
pub fn verify_final(chain: &dyn ChainView, tx: &Transaction, flags: u32) -> bool {
    let height = chain.height() + 1;
    let time = if flags & LOCKTIME_MEDIAN_TIME_PAST != 0 {
        chain.median_time_past()
    } else {
        chain.time()
    };
    tx.is_final(height, time)
}

/// BIP68-style relative lock check for version 2+ transactions.
///
/// Returns `true` when every non-disabled input lock is satisfied at the
/// next block. Unconfirmed parents count from `chain.height() + 1`.
pub fn check_sequence_locks(
    chain: &dyn ChainView,
    tx: &Transaction,
    view: &CoinView,
    flags: u32,
) -> bool {
    if flags & LOCKTIME_VERIFY_SEQUENCE == 0 || tx.version < 2 {
        return true;
    }

    let next_height = chain.height() + 1;
    let mtp = chain.median_time_past();

    for input in &tx.inputs {
        let sequence = input.sequence;
        if sequence & SEQUENCE_DISABLE_FLAG != 0 {
            continue;
        }
        let value = (sequence & SEQUENCE_MASK) as u64;

        let coin_height = match view.get(&input.previous_output) {
            Some(coin) if !coin.is_unconfirmed() => coin.height,
            // In-pool or unknown parents are treated as confirming in the
            // next block.
            _ => next_height,
        };

        if sequence & SEQUENCE_TYPE_FLAG != 0 {
            let coin_time = chain.median_time_at(coin_height.saturating_sub(1));
            if coin_time + (value << SEQUENCE_GRANULARITY) > mtp {
                return false;
            }
        } else if coin_height + value > next_height {
            return false;
        }
    }

    true
}

/// Verify one input's signature under the given flags.
///
/// Semantics of the flags in this protocol:
/// - [`VERIFY_WITNESS`]: witness data, when present, carries the
///   credentials and is validated. Without it, witness data is ignored and
///   only base-field credentials are checked.
/// - [`VERIFY_CLEANSTACK`]: no leftovers. With witness validation on, an
///   input's witness may hold nothing beyond signature and key; with it
///   off, the presence of any witness data at all fails the check.
pub fn verify_input_script(
    hash: Hash256,
    tx: &Transaction,
    index: usize,
    view: &CoinView,
    flags: u32,
) -> Result<(), VerifyError> {
    let input = &tx.inputs[index];
    let coin = view.get(&input.previous_output).ok_or_else(|| {
        VerifyError::new(hash, RejectCode::Invalid, "bad-txns-inputs-missingorspent", 100)
    })?;

    let has_witness = !input.witness.is_empty();

    if has_witness && flags & VERIFY_WITNESS == 0 {
        if flags & VERIFY_CLEANSTACK != 0 {
            return Err(VerifyError::new(hash, RejectCode::Invalid, "cleanstack", 100));
        }
        // Witness ignored. Verify base credentials when present; an input
        // with nothing but witness data has nothing checkable here.
        if input.signature.is_empty() && input.public_key.is_empty() {
            return Ok(());
        }
        return crypto::verify_input_credentials(
            tx,
            index,
            &coin.output.pubkey_hash,
            &input.signature,
            &input.public_key,
        )
        .map_err(|_| {
            VerifyError::new(hash, RejectCode::Invalid, "mandatory-script-verify-flag-failed", 100)
        });
    }

    if has_witness && flags & VERIFY_CLEANSTACK != 0 && input.witness.len() > 2 {
        return Err(VerifyError::new(hash, RejectCode::Invalid, "cleanstack", 100));
    }

    crypto::verify_input(tx, index, &coin.output.pubkey_hash).map_err(|_| {
        VerifyError::new(hash, RejectCode::Invalid, "mandatory-script-verify-flag-failed", 100)
    })
}

/// Verify every input signature of a non-coinbase transaction.
pub fn verify_scripts(
    hash: Hash256,
    tx: &Transaction,
    view: &CoinView,
    flags: u32,
) -> Result<(), VerifyError> {
    for index in 0..tx.inputs.len() {
        verify_input_script(hash, tx, index, view, flags)?;
    }
    Ok(())
}
