//! Atomic whole-file replacement
//!
//! Readers of a replaced file see either the old contents or the new ones,
//! never a truncated mix: the data goes to a temp file in the same directory,
//! is fsynced, then renamed over the target.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
}

/// Replace `path` with `contents`, creating parent directories as needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    let wrap = |source: io::Error| PersistError::Write {
        path: path.display().to_string(),
        source,
    };

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(wrap)?;
            parent
        }
        None => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(wrap)?;

    // Keep the mode of the file being replaced; wg configs carry private keys
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(file.path(), meta.permissions()).map_err(wrap)?;
    }

    file.write_all(contents).map_err(wrap)?;
    file.as_file().sync_all().map_err(wrap)?;
    file.persist(path).map_err(|e| wrap(e.error))?;

    trace!(path = %path.display(), bytes = contents.len(), "File replaced");
    Ok(())
}
