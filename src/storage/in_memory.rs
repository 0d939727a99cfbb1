use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use super::{snapshot, StorageError, Tables};

/// In-memory storage with optional JSON snapshot persistence.
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Purely in-memory store; nothing survives the process.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
        }
    }

    /// Store backed by a snapshot file, loading existing content when present.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let tables = snapshot::load(path)?;
        info!(
            "Opened snapshot {} ({} users, {} pickups)",
            path.display(),
            tables.users.len(),
            tables.pickups.len()
        );
        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path.to_path_buf()),
        })
    }

    /// Run `f` against a consistent view of the tables.
    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables)
    }

    /// Run `f` with exclusive access to the tables.
    ///
    /// `f` works on a staged copy that replaces the live tables only once it
    /// returns `Ok` and the snapshot (if any) has been saved, so any error
    /// leaves the store as it was.
    pub fn write<R, E>(&self, f: impl FnOnce(&mut Tables) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StorageError>,
    {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut staged = tables.clone();
        let result = f(&mut staged)?;
        if let Some(path) = &self.snapshot_path {
            snapshot::save(path, &staged)?;
            debug!("Snapshot written to {}", path.display());
        }
        *tables = staged;
        Ok(result)
    }
}
