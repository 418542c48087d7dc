//! Storage operations
//!
//! Listing, download lookup and upload preparation inside the served
//! directory.

use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::storage::validation::{TEMP_SUFFIX, validate_filename};

/// Flat directory of shared files
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens the served directory, creating it when missing.
    ///
    /// Temp files left by uploads that never finished are removed, so their
    /// names can be uploaded again.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self { root };
        store.remove_stale_uploads()?;
        info!("Serving files from {}", store.root.display());
        Ok(store)
    }

    fn remove_stale_uploads(&self) -> Result<(), StorageError> {
        for entry in fs::read_dir(&self.root)?.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => warn!("Removed unfinished upload {}", entry.path().display()),
                Err(e) => warn!(
                    "Failed to remove unfinished upload {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the regular files of the directory, sorted by name.
    ///
    /// The directory is read afresh on every call. Subdirectories and
    /// unfinished uploads are left out.
    pub fn list_files(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            error!("Failed to list directory {}: {}", self.root.display(), e);
            StorageError::from(e)
        })?;

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(TEMP_SUFFIX))
            .collect();
        names.sort();

        debug!("Listed {} file(s) in {}", names.len(), self.root.display());
        Ok(names)
    }

    /// Resolves a file a client wants to download.
    pub fn prepare_retrieval(&self, filename: &str) -> Result<PathBuf, StorageError> {
        let filename = validate_filename(filename)?;
        let path = self.root.join(filename);

        if !path.is_file() {
            return Err(StorageError::FileNotFound(filename.to_string()));
        }

        info!("Prepared retrieval of {} ({})", filename, path.display());
        Ok(path)
    }

    /// Resolves the final and temporary paths for an upload.
    ///
    /// An existing file of the same name is replaced once the upload
    /// completes; a second upload of a name still in flight is refused.
    pub fn prepare_storage(
        &self,
        filename: &str,
        size: u64,
        max_size: u64,
    ) -> Result<(PathBuf, PathBuf), StorageError> {
        let filename = validate_filename(filename)?;

        if size > max_size {
            return Err(StorageError::FileTooLarge {
                size,
                max: max_size,
            });
        }

        let file_path = self.root.join(filename);
        let temp_path = self.root.join(format!("{filename}{TEMP_SUFFIX}"));

        if file_path.is_dir() {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        if temp_path.exists() {
            return Err(StorageError::UploadInProgress(filename.to_string()));
        }

        info!(
            "Prepared storage of {} ({} bytes, temp {})",
            filename,
            size,
            temp_path.display()
        );
        Ok((file_path, temp_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_directory_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_listing_is_sorted_and_flat() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("c.bin.part"), b"").unwrap();
        assert_eq!(store.list_files().unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_open_clears_unfinished_uploads() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("crashed.bin.part"), b"half").unwrap();
        fs::write(dir.path().join("kept.txt"), b"x").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert!(!dir.path().join("crashed.bin.part").exists());
        assert!(dir.path().join("kept.txt").exists());
        assert!(store.prepare_storage("crashed.bin", 4, 100).is_ok());
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("shared");
        let store = FileStore::open(&root).unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_retrieval_of_missing_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.prepare_retrieval("ghost.txt"),
            Err(StorageError::FileNotFound(_))
        ));
        assert!(!dir.path().join("ghost.txt").exists());
    }

    #[test]
    fn test_retrieval_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("root")).unwrap();
        fs::write(dir.path().join("secret.txt"), b"x").unwrap();
        assert!(matches!(
            store.prepare_retrieval("../secret.txt"),
            Err(StorageError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_storage_limits() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let (file_path, temp_path) = store.prepare_storage("a.bin", 10, 100).unwrap();
        assert_eq!(file_path, dir.path().join("a.bin"));
        assert_eq!(temp_path, dir.path().join("a.bin.part"));

        assert!(matches!(
            store.prepare_storage("a.bin", 101, 100),
            Err(StorageError::FileTooLarge { size: 101, max: 100 })
        ));

        fs::write(&temp_path, b"").unwrap();
        assert!(matches!(
            store.prepare_storage("a.bin", 10, 100),
            Err(StorageError::UploadInProgress(_))
        ));
    }
}
