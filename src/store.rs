// src/store.rs
//! Seen-item store: durable signature → last-known state mapping.
//!
//! The store is the single source of truth for "have we already told the user
//! about this item". It lives in memory for the whole process and is written to
//! disk at cycle boundaries with a temp-file + rename, so `load()` never sees a
//! half-written snapshot.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::listing::Signature;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("writing seen-items snapshot {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serializing seen-items snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Last-known state of one distinct item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    pub last_price: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// On-disk record, current layout or the `{price, timestamp}` layout older
/// installs wrote.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(SeenRecord),
    Legacy { price: u64, timestamp: String },
}

impl StoredRecord {
    fn into_record(self) -> Option<SeenRecord> {
        match self {
            StoredRecord::Current(r) => Some(r),
            StoredRecord::Legacy { price, timestamp } => {
                let naive =
                    NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
                let ts = Utc.from_utc_datetime(&naive);
                Some(SeenRecord {
                    last_price: price,
                    first_seen_at: ts,
                    last_seen_at: ts,
                })
            }
        }
    }
}

#[derive(Debug)]
pub struct SeenStore {
    path: PathBuf,
    records: BTreeMap<Signature, SeenRecord>,
}

impl SeenStore {
    /// Empty in-memory store bound to `path`; nothing is read.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    /// Reconstruct state from `path`. Absent or corrupt storage yields an empty
    /// store: re-notifying a bounded number of items beats refusing to start.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no seen-items file, starting fresh");
                return Self::empty(path);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "reading seen-items failed, starting empty");
                return Self::empty(path);
            }
        };

        let parsed: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                error!(path = %path.display(), error = %e, "seen-items file is corrupt, starting empty");
                return Self::empty(path);
            }
        };

        let mut records = BTreeMap::new();
        let mut skipped = 0usize;
        for (sig, value) in parsed {
            let record = serde_json::from_value::<StoredRecord>(value)
                .ok()
                .and_then(StoredRecord::into_record);
            match record {
                Some(r) => {
                    records.insert(Signature::from(sig), r);
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "dropped unreadable seen-items records");
        }
        info!(path = %path.display(), count = records.len(), "loaded seen items");
        Self { path, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, sig: &Signature) -> Option<&SeenRecord> {
        self.records.get(sig)
    }

    /// Create or refresh a record. `first_seen_at` is only set on creation.
    pub fn upsert(&mut self, sig: Signature, price: u64, ts: DateTime<Utc>) {
        self.records
            .entry(sig)
            .and_modify(|r| {
                r.last_price = price;
                r.last_seen_at = ts;
            })
            .or_insert(SeenRecord {
                last_price: price,
                first_seen_at: ts,
                last_seen_at: ts,
            });
    }

    /// Refresh `last_seen_at` of a known record without touching its price.
    /// Returns false if the signature is unknown.
    pub fn touch(&mut self, sig: &Signature, ts: DateTime<Utc>) -> bool {
        match self.records.get_mut(sig) {
            Some(r) => {
                r.last_seen_at = ts;
                true
            }
            None => false,
        }
    }

    /// Evict least-recently-seen records until at most `max_size` remain.
    /// Returns the number of evicted records.
    pub fn trim(&mut self, max_size: usize) -> usize {
        if self.records.len() <= max_size {
            return 0;
        }
        let excess = self.records.len() - max_size;

        let mut by_age: Vec<(DateTime<Utc>, DateTime<Utc>, Signature)> = self
            .records
            .iter()
            .map(|(sig, r)| (r.last_seen_at, r.first_seen_at, sig.clone()))
            .collect();
        by_age.sort();

        for (_, _, sig) in by_age.into_iter().take(excess) {
            self.records.remove(&sig);
        }
        excess
    }

    /// Durably persist the current state: write `<path>.tmp`, fsync, rename.
    pub fn flush(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.records)?;
        let tmp = tmp_path(&self.path);
        let persist = |source| StoreError::Persist {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persist)?;
        }
        let write_tmp = || -> io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp);
            return Err(persist(e));
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(persist(e));
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
