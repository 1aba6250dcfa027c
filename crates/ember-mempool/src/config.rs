//! User-configurable mempool parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ember_core::constants::MIN_RELAY_FEE;

/// Mempool configuration section.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Total byte budget for the pool, measured in entry memory usage.
    /// Eviction targets 90% of this on overflow.
    pub max_size: u64,

    /// Hard cap on buffered orphan transactions. Random eviction above it.
    pub max_orphans: usize,

    /// Hard cap on in-pool ancestor count for any admitted transaction.
    pub max_ancestors: usize,

    /// Seconds after which a dependency-free entry is purged during
    /// eviction.
    pub expiry_time: u64,

    /// Minimum relay fee in motes per 1000 bytes.
    pub min_relay_fee: u64,

    /// Allow high-priority transactions to relay below the minimum fee.
    pub relay_priority: bool,

    /// Free-relay budget in kilobytes per minute.
    pub limit_free_relay: u64,

    /// Apply standardness policy on top of consensus checks.
    pub require_standard: bool,

    /// Reject fees above 10,000x the minimum for the transaction's size.
    pub reject_absurd_fees: bool,

    /// Accept transactions whose inputs signal replace-by-fee.
    pub replace_by_fee: bool,

    /// Maintain the address → transactions/coins secondary indices.
    pub index_address: bool,

    /// Persist the pool to disk at this path. `None` keeps it in memory
    /// only.
    pub persistent: Option<PathBuf>,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100 * 1024 * 1024,
            max_orphans: 100,
            max_ancestors: 25,
            expiry_time: 72 * 60 * 60,
            min_relay_fee: MIN_RELAY_FEE,
            relay_priority: true,
            limit_free_relay: 15,
            require_standard: true,
            reject_absurd_fees: true,
            replace_by_fee: false,
            index_address: false,
            persistent: None,
        }
    }
}

impl MempoolConfig {
    /// Eviction target once the pool overflows: 90% of `max_size`.
    pub fn threshold(&self) -> u64 {
        self.max_size - self.max_size / 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = MempoolConfig::default();
        assert_eq!(cfg.max_ancestors, 25);
        assert_eq!(cfg.max_orphans, 100);
        assert_eq!(cfg.min_relay_fee, MIN_RELAY_FEE);
        assert!(cfg.require_standard);
        assert!(!cfg.replace_by_fee);
        assert!(cfg.persistent.is_none());
    }

    #[test]
    fn threshold_is_ninety_percent() {
        let cfg = MempoolConfig { max_size: 1000, ..Default::default() };
        assert_eq!(cfg.threshold(), 900);
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: MempoolConfig =
            serde_json::from_str(r#"{"max_orphans": 7}"#).unwrap();
        assert_eq!(cfg.max_orphans, 7);
        assert_eq!(cfg.max_ancestors, 25);
    }
}
