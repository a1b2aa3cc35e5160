//! Ownership persistence backends.
//!
//! The store is saved as one JSON blob under a fixed identifier. Writes are
//! synchronous; callers persist after every mutation.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use tracing::{debug, warn};

use crate::ownership::StoredOwnership;

/// Identifier the ownership blob is stored under.
pub const DATA_IDENTIFIER: &str = "TrainBase";

/// Durable storage for the ownership store.
pub trait OwnershipBackend: Send {
    /// `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> anyhow::Result<Option<StoredOwnership>>;

    fn write(&mut self, data: &StoredOwnership) -> anyhow::Result<()>;
}

/// `<data_dir>/<identifier>.json` on disk.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::with_identifier(data_dir, DATA_IDENTIFIER)
    }

    pub fn with_identifier(data_dir: impl AsRef<Path>, identifier: &str) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{identifier}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OwnershipBackend for JsonFileBackend {
    fn read(&self) -> anyhow::Result<Option<StoredOwnership>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        match StoredOwnership::from_json_str(&text) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ownership data is corrupt, starting empty"
                );
                Ok(None)
            }
        }
    }

    fn write(&mut self, data: &StoredOwnership) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let json = data.to_json_string().context("serialize ownership data")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;
        debug!(path = %self.path.display(), trains = data.trains.len(), "Ownership data saved");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySlot {
    blob: Option<String>,
    writes: u64,
}

/// In-memory blob. Clones share the same slot, so a clone kept by a test
/// survives the service that wrote through another clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: Arc<Mutex<MemorySlot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the blob with raw JSON (for corrupt-data scenarios).
    pub fn with_blob(json: impl Into<String>) -> Self {
        let backend = Self::default();
        if let Ok(mut slot) = backend.slot.lock() {
            slot.blob = Some(json.into());
        }
        backend
    }

    pub fn blob(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|s| s.blob.clone())
    }

    /// Number of completed writes.
    pub fn write_count(&self) -> u64 {
        self.slot.lock().map_or(0, |s| s.writes)
    }
}

impl OwnershipBackend for MemoryBackend {
    fn read(&self) -> anyhow::Result<Option<StoredOwnership>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        match &slot.blob {
            Some(json) => Ok(Some(
                StoredOwnership::from_json_str(json).context("parse stored ownership")?,
            )),
            None => Ok(None),
        }
    }

    fn write(&mut self, data: &StoredOwnership) -> anyhow::Result<()> {
        let json = data.to_json_string().context("serialize ownership data")?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        slot.blob = Some(json);
        slot.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::TrainRecord;
    use trainbase_shared::host::EntityKey;

    fn sample() -> StoredOwnership {
        StoredOwnership {
            trains: vec![TrainRecord {
                train_key: EntityKey(3),
                anchor_keys: vec![EntityKey(4), EntityKey(5)],
            }],
            saved_at: None,
        }
    }

    #[test]
    fn file_backend_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut backend = JsonFileBackend::new(dir.path().join("data"));
        assert_eq!(backend.read()?, None);

        backend.write(&sample())?;
        assert!(backend.path().ends_with("TrainBase.json"));
        assert_eq!(backend.read()?, Some(sample()));
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = JsonFileBackend::new(dir.path());
        fs::write(backend.path(), "{ not json")?;
        assert_eq!(backend.read()?, None);
        Ok(())
    }

    #[test]
    fn memory_backend_clones_share_state() -> anyhow::Result<()> {
        let observer = MemoryBackend::new();
        let mut writer = observer.clone();
        writer.write(&sample())?;
        writer.write(&sample())?;

        assert_eq!(observer.write_count(), 2);
        assert_eq!(observer.read()?, Some(sample()));
        Ok(())
    }
}
