//! # Persistence Layer — Snapshot/restore for engine state
//!
//! JSON snapshots, lz4-compressed, written to the data directory with a
//! metadata file alongside. The store opts in by implementing [`Persistable`];
//! snapshots run periodically and at shutdown, restore runs at startup.

use crate::error::{WardenError, WardenResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Components that can snapshot and restore their state.
pub trait Persistable: Send + Sync {
    /// Unique name, used for the snapshot filename.
    fn persist_name(&self) -> &str;
    /// Serialize current state to JSON bytes.
    fn snapshot(&self) -> WardenResult<Vec<u8>>;
    /// Replace current state from JSON bytes.
    fn restore(&self, data: &[u8]) -> WardenResult<()>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMeta {
    pub component: String,
    pub timestamp: i64,
    pub size_bytes: usize,
    pub compressed: bool,
    pub version: u32,
}

pub struct PersistenceManager {
    base_dir: PathBuf,
    components: RwLock<HashMap<String, Arc<dyn Persistable>>>,
    total_snapshots: AtomicU64,
    total_restores: AtomicU64,
    total_failures: AtomicU64,
}

impl PersistenceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            components: RwLock::new(HashMap::new()),
            total_snapshots: AtomicU64::new(0),
            total_restores: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn register(&self, component: Arc<dyn Persistable>) {
        let name = component.persist_name().to_string();
        info!(component = %name, "Registered for persistence");
        self.components.write().insert(name, component);
    }

    /// Ensure the snapshot directory exists.
    pub fn init(&self) -> WardenResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        info!(dir = %self.base_dir.display(), "Persistence directory initialized");
        Ok(())
    }

    /// Startup init with up to `attempts` retries, exponential backoff capped
    /// at 30 s. Exhausting the retries is fatal to the caller.
    pub async fn init_with_retries(&self, attempts: u32) -> WardenResult<()> {
        let mut backoff_secs = 1u64;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.init() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Persistence init failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(30);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| WardenError::StoreUnavailable("init failed".into())))
    }

    /// Snapshot a single component.
    pub fn snapshot_component(&self, name: &str) -> WardenResult<SnapshotMeta> {
        let component = {
            let components = self.components.read();
            components
                .get(name)
                .cloned()
                .ok_or_else(|| WardenError::Internal(format!("component '{}' not registered", name)))?
        };

        let data = component.snapshot()?;
        let compressed = lz4_flex::compress_prepend_size(&data);
        std::fs::write(self.snapshot_path(name), &compressed)?;

        let meta = SnapshotMeta {
            component: name.into(),
            timestamp: chrono::Utc::now().timestamp(),
            size_bytes: compressed.len(),
            compressed: true,
            version: 1,
        };
        std::fs::write(self.meta_path(name), serde_json::to_vec(&meta)?)?;

        self.total_snapshots.fetch_add(1, Ordering::Relaxed);
        info!(component = %name, size = compressed.len(), "Snapshot saved");
        Ok(meta)
    }

    pub fn snapshot_all(&self) -> Vec<WardenResult<SnapshotMeta>> {
        let names: Vec<String> = self.components.read().keys().cloned().collect();
        names
            .iter()
            .map(|name| {
                let result = self.snapshot_component(name);
                if result.is_err() {
                    self.total_failures.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
            .collect()
    }

    /// Restore a component from its latest snapshot. Missing snapshot is not
    /// an error — there is simply nothing to restore yet.
    pub fn restore_component(&self, name: &str) -> WardenResult<bool> {
        let component = {
            let components = self.components.read();
            components
                .get(name)
                .cloned()
                .ok_or_else(|| WardenError::Internal(format!("component '{}' not registered", name)))?
        };

        let path = self.snapshot_path(name);
        if !path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read(&path)?;
        let data = lz4_flex::decompress_size_prepended(&raw)
            .map_err(|e| WardenError::StoreUnavailable(format!("snapshot corrupt: {}", e)))?;
        component.restore(&data)?;
        self.total_restores.fetch_add(1, Ordering::Relaxed);
        info!(component = %name, "Snapshot restored");
        Ok(true)
    }

    pub fn restore_all(&self) -> Vec<(String, WardenResult<bool>)> {
        let names: Vec<String> = self.components.read().keys().cloned().collect();
        names.into_iter().map(|name| {
            let result = self.restore_component(&name);
            (name, result)
        }).collect()
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.snapshot", name))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.meta.json", name))
    }

    pub fn total_snapshots(&self) -> u64 {
        self.total_snapshots.load(Ordering::Relaxed)
    }

    pub fn total_restores(&self) -> u64 {
        self.total_restores.load(Ordering::Relaxed)
    }
}
