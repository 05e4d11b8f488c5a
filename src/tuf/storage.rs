// src/tuf/storage.rs
// Durable trust state for one repository: a directory of metadata files.

use crate::error::TufError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Binds to `root`, creating it (and parents) if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TufError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| TufError::Storage { path: root.clone(), source })?;
        Ok(FileStorage { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TufError> {
        let path = self.root.join(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TufError::Storage { path, source }),
        }
    }

    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<(), TufError> {
        let path = self.root.join(key);
        fs::write(&path, bytes).map_err(|source| TufError::Storage { path, source })
    }

    pub fn delete(&self, key: &str) -> Result<(), TufError> {
        let path = self.root.join(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TufError::Storage { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory_and_round_trips_keys() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("a/b")).unwrap();
        assert!(storage.path().is_dir());

        assert_eq!(storage.read("root.json").unwrap(), None);
        storage.write("root.json", b"{}").unwrap();
        assert_eq!(storage.read("root.json").unwrap().as_deref(), Some(&b"{}"[..]));
        storage.delete("root.json").unwrap();
        storage.delete("root.json").unwrap();
        assert_eq!(storage.read("root.json").unwrap(), None);
    }

    #[test]
    fn existing_directory_is_fine() {
        let dir = tempdir().unwrap();
        FileStorage::new(dir.path()).unwrap();
        FileStorage::new(dir.path()).unwrap();
    }
}
