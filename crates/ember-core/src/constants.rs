//! Protocol constants. All monetary values in motes (1 EMBER = 10^8 motes).

pub const COIN: u64 = 100_000_000;

pub const MAX_TX_SIZE: usize = 100_000;
/// Maximum transaction weight (`3 * base_size + total_size`).
pub const MAX_TX_WEIGHT: u64 = 400_000;
pub const MAX_INPUTS: usize = 1_000;
pub const MAX_OUTPUTS: usize = 1_000;
pub const COINBASE_MATURITY: u64 = 100;
/// Lock times below this are block heights; at or above, Unix timestamps.
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

// --- Input sequence semantics ---

/// Sequence number that opts an input out of lock-time semantics entirely.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
/// Any input sequence below this signals replace-by-fee willingness.
pub const SEQUENCE_RBF_THRESHOLD: u32 = 0xffff_fffe;
/// Bit 31: the relative lock on this input is disabled.
pub const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;
/// Bit 22: the relative lock is time-based rather than height-based.
pub const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;
/// Low 16 bits carry the relative lock value.
pub const SEQUENCE_MASK: u32 = 0x0000_ffff;
/// Time-based relative locks advance in units of 2^9 = 512 seconds.
pub const SEQUENCE_GRANULARITY: u32 = 9;

// --- Relay policy ---

/// Highest transaction version considered standard for relay.
pub const MAX_STANDARD_VERSION: u32 = 2;
/// Maximum signature-operation cost per transaction (scaled like weight:
/// a base input costs 4, a witness input costs 1).
pub const MAX_TX_SIGOPS_COST: u32 = 4_000;
/// Maximum witness items per input considered standard.
pub const MAX_WITNESS_ITEMS: usize = 4;
/// Maximum size in bytes of a single witness item considered standard.
pub const MAX_WITNESS_ITEM_SIZE: usize = 80;

/// Default minimum relay fee in motes per 1000 bytes.
pub const MIN_RELAY_FEE: u64 = 1_000;
/// Priority above which a below-minimum-fee transaction may still relay.
pub const FREE_THRESHOLD: u64 = COIN * 144 / 250;
/// Height marker for unconfirmed (in-pool) parent outputs.
pub const COIN_HEIGHT_UNCONFIRMED: u64 = u64::MAX;

// --- Verification flags ---

/// Validate witness data when present.
pub const VERIFY_WITNESS: u32 = 1 << 0;
/// Reject trailing witness garbage left over after verification.
pub const VERIFY_CLEANSTACK: u32 = 1 << 1;
/// Flags applied to transactions entering the mempool.
pub const STANDARD_VERIFY_FLAGS: u32 = VERIFY_WITNESS | VERIFY_CLEANSTACK;
/// Flags applied by block-level (mandatory) validation.
pub const MANDATORY_VERIFY_FLAGS: u32 = VERIFY_WITNESS;

/// Evaluate absolute lock times against median-time-past.
pub const LOCKTIME_MEDIAN_TIME_PAST: u32 = 1 << 0;
/// Enforce relative lock times on version 2+ transactions.
pub const LOCKTIME_VERIFY_SEQUENCE: u32 = 1 << 1;
/// Lock-time flags applied to transactions entering the mempool.
pub const STANDARD_LOCKTIME_FLAGS: u32 = LOCKTIME_MEDIAN_TIME_PAST | LOCKTIME_VERIFY_SEQUENCE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_threshold_math() {
        // One COIN aged 144 blocks in a 250-byte transaction.
        assert_eq!(FREE_THRESHOLD, COIN * 144 / 250);
    }

    #[test]
    fn standard_flags_include_witness_and_cleanstack() {
        assert_ne!(STANDARD_VERIFY_FLAGS & VERIFY_WITNESS, 0);
        assert_ne!(STANDARD_VERIFY_FLAGS & VERIFY_CLEANSTACK, 0);
        assert_eq!(MANDATORY_VERIFY_FLAGS & VERIFY_CLEANSTACK, 0);
    }

    #[test]
    fn sequence_flag_bits_disjoint() {
        assert_eq!(SEQUENCE_DISABLE_FLAG & SEQUENCE_TYPE_FLAG, 0);
        assert_eq!(SEQUENCE_DISABLE_FLAG & SEQUENCE_MASK, 0);
        assert_eq!(SEQUENCE_TYPE_FLAG & SEQUENCE_MASK, 0);
    }

    #[test]
    fn rbf_threshold_below_final() {
        assert_eq!(SEQUENCE_RBF_THRESHOLD, SEQUENCE_FINAL - 1);
    }
}
