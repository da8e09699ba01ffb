//! File-backed state store.
//!
//! One JSON value per key, stored as a file under the state directory.
//! Writes go to a temp file in the same directory and are renamed into
//! place, so a crash mid-write leaves either the old complete value or
//! the new complete value, never a torn one.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use vaultops_core::store::{StateStore, StoreError};

/// [`StateStore`] keeping each key in its own file.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Opens the store, creating the directory if needed. On Unix the
    /// directory is restricted to the owning user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { dir })
    }

    /// The directory backing the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(value)?;
        file.flush()?;
        file.persist(self.path_for(key))
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Maps a storage key onto a safe file name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
