//! Persistent store for generated annotation indexes.
//!
//! Uses LMDB (via heed). Each entry is keyed by coordinate and carries the
//! fingerprint of the artifact it was generated from; a stale fingerprint reads
//! back as a miss.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::index::AnnotationIndex;

pub const INDEXES_DB: &str = "annotation_indexes";

const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

pub trait IndexStore: Send + Sync {
    fn load(&self, coordinate: &str, fingerprint: &str) -> Result<Option<AnnotationIndex>>;

    fn store(&self, coordinate: &str, fingerprint: &str, index: &AnnotationIndex) -> Result<()>;
}

/// sha256 over path, size and modification time.
pub fn fingerprint(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat artifact: {}", path.display()))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(meta.len().to_le_bytes());
    hasher.update(mtime.to_le_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    fingerprint: String,
    index: String,
}

#[derive(Debug)]
pub struct LmdbIndexStore {
    env: Env,
    db_path: PathBuf,
    indexes: Database<Str, Str>,
}

impl LmdbIndexStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let env = open_env(&db_path)?;
        let mut wtxn = env.write_txn()?;
        let indexes = env.create_database::<Str, Str>(&mut wtxn, Some(INDEXES_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            indexes,
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let mut stored_indexes = 0u64;
        let mut indexed_classes = 0u64;
        for item in self.indexes.iter(&rtxn)? {
            let (_, raw) = item?;
            stored_indexes += 1;
            let Ok(entry) = serde_json::from_str::<StoredEntry>(raw) else {
                continue;
            };
            if let Ok(index) = AnnotationIndex::from_json(&entry.index) {
                indexed_classes += index.len() as u64;
            }
        }
        Ok(StoreStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            stored_indexes,
            indexed_classes,
        })
    }
}

impl IndexStore for LmdbIndexStore {
    fn load(&self, coordinate: &str, fingerprint: &str) -> Result<Option<AnnotationIndex>> {
        let rtxn = self.env.read_txn()?;
        let Some(raw) = self.indexes.get(&rtxn, coordinate)? else {
            return Ok(None);
        };
        let entry: StoredEntry = serde_json::from_str(raw)
            .with_context(|| format!("Corrupt store entry for {coordinate}"))?;
        if entry.fingerprint != fingerprint {
            tracing::debug!(coordinate, "Stored index is stale");
            return Ok(None);
        }
        Ok(Some(AnnotationIndex::from_json(&entry.index)?))
    }

    fn store(&self, coordinate: &str, fingerprint: &str, index: &AnnotationIndex) -> Result<()> {
        let entry = StoredEntry {
            fingerprint: fingerprint.to_string(),
            index: index.to_json()?,
        };
        let raw = serde_json::to_string(&entry)?;
        let mut wtxn = self.env.write_txn()?;
        self.indexes.put(&mut wtxn, coordinate, raw.as_str())?;
        wtxn.commit()?;
        Ok(())
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: default LMDB locking is kept; NO_SUB_DIR makes --db a single file path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub db_path: String,
    pub stored_indexes: u64,
    pub indexed_classes: u64,
}

#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    entries: Mutex<HashMap<String, (String, AnnotationIndex)>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self, coordinate: &str, fingerprint: &str) -> Result<Option<AnnotationIndex>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("index store lock poisoned"))?;
        Ok(entries
            .get(coordinate)
            .filter(|(fp, _)| fp == fingerprint)
            .map(|(_, index)| index.clone()))
    }

    fn store(&self, coordinate: &str, fingerprint: &str, index: &AnnotationIndex) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("index store lock poisoned"))?;
        entries.insert(
            coordinate.to_string(),
            (fingerprint.to_string(), index.clone()),
        );
        Ok(())
    }
}

/// Never remembers anything; used with `--no-cache`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndexStore;

impl IndexStore for NoIndexStore {
    fn load(&self, _coordinate: &str, _fingerprint: &str) -> Result<Option<AnnotationIndex>> {
        Ok(None)
    }

    fn store(&self, _coordinate: &str, _fingerprint: &str, _index: &AnnotationIndex) -> Result<()> {
        Ok(())
    }
}
