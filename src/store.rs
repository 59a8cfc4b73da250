//! The storage backend seam.
//!
//! Persistence is a key/blob store with optional optimistic versioning, so
//! the rest of the app never depends on a particular hosted backend. The
//! version token is a content hash: callers that pass their last-seen token
//! to [BlobStore::put] get a conflict instead of silently overwriting a
//! concurrent change, while callers that pass `None` keep last-writer-wins
//! semantics.

use std::{
    collections::HashMap,
    fmt,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use sha2::{Digest, Sha256};

use crate::Error;

/// An opaque token identifying one version of a blob's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    fn of(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key/blob store holding all persisted application data.
pub trait BlobStore: Send + Sync {
    /// Read a blob, or `None` if no blob exists at `path`.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Write a blob, creating or replacing it.
    ///
    /// When `expected` is given, the write only succeeds if the stored
    /// content still matches that version; otherwise it returns
    /// [Error::StorageConflict].
    fn put(
        &self,
        path: &str,
        content: &[u8],
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, Error>;

    /// Delete a blob, returning whether it existed.
    fn delete(&self, path: &str) -> Result<bool, Error>;
}

/// An in-memory blob store for tests and guest sessions.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::StorageError("blob store lock poisoned".to_owned()))?;

        Ok(blobs.get(path).cloned())
    }

    fn put(
        &self,
        path: &str,
        content: &[u8],
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, Error> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::StorageError("blob store lock poisoned".to_owned()))?;

        if let Some(expected) = expected {
            let current = blobs.get(path).map(|content| VersionToken::of(content));

            if current.as_ref() != Some(expected) {
                return Err(Error::StorageConflict(path.to_owned()));
            }
        }

        blobs.insert(path.to_owned(), content.to_vec());

        Ok(VersionToken::of(content))
    }

    fn delete(&self, path: &str) -> Result<bool, Error> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::StorageError("blob store lock poisoned".to_owned()))?;

        Ok(blobs.remove(path).is_some())
    }
}

/// A blob store backed by a directory on the local filesystem.
///
/// Blob paths map to file paths under the root directory. Writes go through
/// a temporary file and a rename so a crash mid-write never leaves a
/// half-written blob behind.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    /// Create a store rooted at `root`. The directory does not need to
    /// exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a blob path to a file path, rejecting anything that would
    /// escape the root directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(path);

        let valid = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !valid {
            return Err(Error::StorageError(format!("invalid blob path \"{path}\"")));
        }

        Ok(self.root.join(relative))
    }
}

impl BlobStore for DirectoryBlobStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let file_path = self.resolve(path)?;

        match std::fs::read(&file_path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(Error::StorageError(format!(
                "could not read \"{path}\": {error}"
            ))),
        }
    }

    fn put(
        &self,
        path: &str,
        content: &[u8],
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, Error> {
        let file_path = self.resolve(path)?;

        if let Some(expected) = expected {
            let current = self.get(path)?.map(|content| VersionToken::of(&content));

            if current.as_ref() != Some(expected) {
                return Err(Error::StorageConflict(path.to_owned()));
            }
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                Error::StorageError(format!("could not create \"{}\": {error}", parent.display()))
            })?;
        }

        let temp_path = file_path.with_extension("tmp");
        std::fs::write(&temp_path, content)
            .and_then(|()| std::fs::rename(&temp_path, &file_path))
            .map_err(|error| Error::StorageError(format!("could not write \"{path}\": {error}")))?;

        Ok(VersionToken::of(content))
    }

    fn delete(&self, path: &str) -> Result<bool, Error> {
        let file_path = self.resolve(path)?;

        match std::fs::remove_file(&file_path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(Error::StorageError(format!(
                "could not delete \"{path}\": {error}"
            ))),
        }
    }
}

#[cfg(test)]
mod memory_blob_store_tests {
    use super::{BlobStore, MemoryBlobStore};
    use crate::Error;

    #[test]
    fn get_returns_what_was_put() {
        let store = MemoryBlobStore::new();

        store.put("data/users.json", b"{}", None).unwrap();

        assert_eq!(store.get("data/users.json").unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn get_of_missing_blob_is_none() {
        let store = MemoryBlobStore::new();

        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn delete_reports_whether_the_blob_existed() {
        let store = MemoryBlobStore::new();
        store.put("blob", b"content", None).unwrap();

        assert!(store.delete("blob").unwrap());
        assert!(!store.delete("blob").unwrap());
        assert_eq!(store.get("blob").unwrap(), None);
    }

    #[test]
    fn conditional_put_succeeds_on_matching_version() {
        let store = MemoryBlobStore::new();
        let version = store.put("blob", b"first", None).unwrap();

        let result = store.put("blob", b"second", Some(&version));

        assert!(result.is_ok());
        assert_eq!(store.get("blob").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn conditional_put_conflicts_on_stale_version() {
        let store = MemoryBlobStore::new();
        let stale = store.put("blob", b"first", None).unwrap();
        store.put("blob", b"second", None).unwrap();

        let result = store.put("blob", b"third", Some(&stale));

        assert_eq!(result, Err(Error::StorageConflict("blob".to_owned())));
        assert_eq!(store.get("blob").unwrap(), Some(b"second".to_vec()));
    }
}
