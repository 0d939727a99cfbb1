use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use super::{StorageError, Tables};

/// Load tables from a snapshot file; a missing file is an empty store.
pub(super) fn load(path: &Path) -> Result<Tables, StorageError> {
    if !path.exists() {
        debug!("No snapshot at {}, starting empty", path.display());
        return Ok(Tables::default());
    }
    let bytes = fs::read(path)?;
    let tables = serde_json::from_slice(&bytes)?;
    Ok(tables)
}

/// Write tables next to the target and rename over it, so readers never see
/// a half-written snapshot.
pub(super) fn save(path: &Path, tables: &Tables) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, tables)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
