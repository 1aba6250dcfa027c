//! RocksDB-backed mempool persistence.
//!
//! Key/value layouts:
//!
//! - `V` → 4-byte little-endian layout version, currently [`VERSION`]
//! - `R` → 32-byte tip hash the stored pool is valid against
//! - `F` → opaque fee-estimator state blob
//! - `e` ++ txid → serialized [`MempoolEntry`]
//!
//! On open the stored version and tip are checked against the chain; any
//! mismatch wipes the database and re-initializes it. Entry writes buffer
//! into a rolling [`WriteBatch`] flushed when at least
//! [`FLUSH_INTERVAL`] seconds have passed since the last flush, and
//! unconditionally at block boundaries.

use std::path::Path;

use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info, warn};

use ember_core::error::CacheError;
use ember_core::types::Hash256;

use crate::entry::MempoolEntry;
use crate::unix_time;

/// On-disk layout version.
pub const VERSION: u32 = 2;

/// Minimum seconds between throttled flushes.
pub const FLUSH_INTERVAL: u64 = 10;

const KEY_VERSION: &[u8] = b"V";
const KEY_TIP: &[u8] = b"R";
const KEY_ESTIMATOR: &[u8] = b"F";
const ENTRY_PREFIX: u8 = b'e';

fn entry_key(hash: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = ENTRY_PREFIX;
    key[1..].copy_from_slice(hash.as_bytes());
    key
}

fn storage(e: rocksdb::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

/// On-disk mempool cache.
pub struct MempoolCache {
    db: DB,
    batch: WriteBatch,
    last_flush: u64,
}

impl MempoolCache {
    /// Open or create the cache at `path` and return it together with the
    /// entries it holds.
    ///
    /// The stored layout version must equal [`VERSION`] and the stored tip
    /// must equal `tip`; otherwise the database is wiped, re-initialized
    /// against `tip`, and no entries are returned.
    pub fn open(
        path: impl AsRef<Path>,
        tip: Hash256,
    ) -> Result<(Self, Vec<MempoolEntry>), CacheError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref()).map_err(storage)?;

        let mut cache = Self { db, batch: WriteBatch::default(), last_flush: unix_time() };

        if !cache.consistent(tip)? {
            warn!("mempool cache version or tip mismatch, wiping");
            cache.wipe(tip)?;
            return Ok((cache, Vec::new()));
        }

        let entries = cache.load()?;
        info!(count = entries.len(), "loaded mempool cache");
        Ok((cache, entries))
    }

    /// Stored fee-estimator state, if any.
    pub fn load_estimator(&self) -> Result<Option<Vec<u8>>, CacheError> {
        self.db.get(KEY_ESTIMATOR).map_err(storage)
    }

    /// Buffer an entry write.
    pub fn save_entry(&mut self, entry: &MempoolEntry) -> Result<(), CacheError> {
        let blob = entry.encode()?;
        self.batch.put(entry_key(&entry.hash), blob);
        Ok(())
    }

    /// Buffer an entry delete.
    pub fn delete_entry(&mut self, hash: &Hash256) {
        self.batch.delete(entry_key(hash));
    }

    /// Buffer the tip pointer.
    pub fn save_tip(&mut self, tip: Hash256) {
        self.batch.put(KEY_TIP, tip.as_bytes());
    }

    /// Buffer the fee-estimator state blob.
    pub fn save_estimator(&mut self, blob: &[u8]) {
        self.batch.put(KEY_ESTIMATOR, blob);
    }

    /// Flush the rolling batch if the throttle interval has elapsed.
    pub fn maybe_flush(&mut self) -> Result<(), CacheError> {
        if unix_time().saturating_sub(self.last_flush) >= FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the rolling batch unconditionally.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        let batch = std::mem::take(&mut self.batch);
        if !batch.is_empty() {
            debug!(ops = batch.len(), "flushing mempool cache batch");
            self.db.write(batch).map_err(storage)?;
        }
        self.last_flush = unix_time();
        Ok(())
    }

    /// Delete everything and re-initialize the version and tip records.
    pub fn wipe(&mut self, tip: Hash256) -> Result<(), CacheError> {
        self.batch = WriteBatch::default();

        let mut batch = WriteBatch::default();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(storage)?;
            batch.delete(key);
        }
        batch.put(KEY_VERSION, VERSION.to_le_bytes());
        batch.put(KEY_TIP, tip.as_bytes());
        self.db.write(batch).map_err(storage)?;
        self.last_flush = unix_time();
        Ok(())
    }

    /// Whether the stored version and tip match what the chain expects.
    fn consistent(&self, tip: Hash256) -> Result<bool, CacheError> {
        let version = match self.db.get(KEY_VERSION).map_err(storage)? {
            Some(bytes) if bytes.len() == 4 => {
                u32::from_le_bytes(bytes.as_slice().try_into().expect("length checked"))
            }
            _ => return Ok(false),
        };
        if version != VERSION {
            return Ok(false);
        }

        match self.db.get(KEY_TIP).map_err(storage)? {
            Some(bytes) if bytes.len() == 32 => {
                let stored =
                    Hash256::from_bytes(bytes.as_slice().try_into().expect("length checked"));
                Ok(stored == tip)
            }
            _ => Ok(false),
        }
    }

    /// Decode every stored entry.
    fn load(&self) -> Result<Vec<MempoolEntry>, CacheError> {
        let mut entries = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item.map_err(storage)?;
            if key.first() != Some(&ENTRY_PREFIX) || key.len() != 33 {
                continue;
            }
            entries.push(MempoolEntry::decode(&value)?);
        }
        Ok(entries)
    }
}
