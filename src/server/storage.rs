//! On-disk storage for uploaded files and server state.
//!
//! Layout:
//! ```text
//! <DATA_DIR>/
//!   state.json          users and documents
//!   uploads/
//!     <uuid>.pdf        uploaded content, one file per document
//! ```
//!
//! Writes go to a temp file which is then renamed into place.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::registry::DocumentRegistry;
use super::users::{UserRecord, UserStore};
use crate::models::{Document, StorageLocator};

const STATE_FILE: &str = "state.json";
const UPLOADS_DIR: &str = "uploads";

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error for {path}: {1}", path = .0.display())]
    Io(PathBuf, #[source] io::Error),
    #[error("JSON error for {path}: {1}", path = .0.display())]
    Json(PathBuf, #[source] serde_json::Error),
    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),
    #[error("Background write failed: {0}")]
    Task(String),
}

/// Everything persisted in `state.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

/// File storage rooted at the data directory.
#[derive(Debug)]
pub struct ServerStorage {
    data_dir: PathBuf,
    /// Serializes state flushes. Held only while snapshotting and writing
    /// `state.json`, never together with the registry or credential locks.
    flush_lock: Mutex<()>,
}

impl ServerStorage {
    /// Creates a new storage instance.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            flush_lock: Mutex::new(()),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    /// Creates the data and uploads directories.
    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        let uploads = self.data_dir.join(UPLOADS_DIR);
        fs::create_dir_all(&uploads).map_err(|e| StorageError::Io(uploads, e))
    }

    /// Loads `state.json`.
    ///
    /// Returns `Ok(None)` if no state has been written yet.
    pub fn load_state(&self) -> Result<Option<PersistedState>, StorageError> {
        let path = self.state_path();

        match fs::read(&path) {
            Ok(bytes) => {
                let state =
                    serde_json::from_slice(&bytes).map_err(|e| StorageError::Json(path, e))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(path, e)),
        }
    }

    /// Writes `state.json` synchronously.
    pub fn save_state(&self, state: &PersistedState) -> Result<(), StorageError> {
        let path = self.state_path();
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| StorageError::Json(path.clone(), e))?;
        write_atomic(&path, &bytes)
    }

    /// Persists the current users and documents.
    ///
    /// The snapshot is taken after the flush lock is acquired, so a flush that
    /// finishes later never writes older state than one that finished earlier.
    pub async fn flush(
        &self,
        users: &UserStore,
        registry: &DocumentRegistry,
    ) -> Result<(), StorageError> {
        let _guard = self.flush_lock.lock().await;

        // Documents first: every user a document references already exists
        // in the later users snapshot.
        let documents = registry.snapshot();
        let state = PersistedState {
            users: users.snapshot(),
            documents,
        };
        let path = self.state_path();
        let bytes = serde_json::to_vec_pretty(&state)
            .map_err(|e| StorageError::Json(path.clone(), e))?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        tracing::debug!(
            "Flushed {} user(s) and {} document(s)",
            state.users.len(),
            state.documents.len()
        );
        Ok(())
    }

    /// Stores uploaded content and returns its locator.
    ///
    /// The file gets a fresh UUID name; only the extension of
    /// `original_name` is kept.
    pub async fn store_upload(
        &self,
        original_name: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<StorageLocator, StorageError> {
        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), extension_of(original_name));
        let relative = format!("{}/{}", UPLOADS_DIR, file_name);
        let path = self.data_dir.join(UPLOADS_DIR).join(&file_name);

        let size = bytes.len();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        tracing::info!("Stored upload {} ({} bytes)", relative, size);
        Ok(StorageLocator::new(relative))
    }

    /// Reads stored content back.
    pub async fn read_upload(&self, locator: &StorageLocator) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::Io(path, e))
    }

    /// Deletes stored content. Missing files are not an error.
    pub async fn remove_upload(&self, locator: &StorageLocator) -> Result<(), StorageError> {
        let path = self.resolve(locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(path, e)),
        }
    }

    /// Maps a locator to a path, refusing anything outside `uploads/`.
    fn resolve(&self, locator: &StorageLocator) -> Result<PathBuf, StorageError> {
        let name = locator
            .as_str()
            .strip_prefix(UPLOADS_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| {
                !name.is_empty()
                    && !name.contains('/')
                    && !name.contains('\\')
                    && !name.starts_with('.')
            })
            .ok_or_else(|| StorageError::InvalidLocator(locator.to_string()))?;

        Ok(self.data_dir.join(UPLOADS_DIR).join(name))
    }
}

/// Lowercased alphanumeric extension of `name`, defaulting to `pdf`.
fn extension_of(name: Option<&str>) -> String {
    name.and_then(|n| Path::new(n).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.chars()
                .filter(char::is_ascii_alphanumeric)
                .take(8)
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "pdf".to_string())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::Io(parent.to_path_buf(), e))?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::Io(temp_path.clone(), e))?;
    file.write_all(bytes)
        .map_err(|e| StorageError::Io(temp_path.clone(), e))?;
    file.sync_all()
        .map_err(|e| StorageError::Io(temp_path.clone(), e))?;

    // Rename to final path (atomic on most filesystems)
    fs::rename(&temp_path, path).map_err(|e| StorageError::Io(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_load_state_missing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp_dir.path());

        assert!(storage.load_state().unwrap().is_none());
    }

    #[test]
    fn test_load_state_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(STATE_FILE), b"{not json").unwrap();
        let storage = ServerStorage::new(temp_dir.path());

        assert!(matches!(
            storage.load_state(),
            Err(StorageError::Json(_, _))
        ));
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp_dir.path());
        let users = Arc::new(UserStore::new());
        let registry = DocumentRegistry::new(Arc::clone(&users));

        let publisher = users.register("p", "pw", Role::Publisher).unwrap();
        let subscriber = users.register("s", "pw", Role::Subscriber).unwrap();
        let doc = registry
            .create(publisher.id, "Spec.pdf", StorageLocator::new("uploads/a.pdf"))
            .unwrap();
        registry.assign(doc.id, subscriber.id).unwrap();

        storage.flush(&users, &registry).await.unwrap();

        let state = storage.load_state().unwrap().unwrap();
        assert_eq!(state.users.len(), 2);
        assert_eq!(state.documents.len(), 1);
        assert!(state.documents[0].is_assigned_to(subscriber.id));
        assert!(!temp_dir.path().join("state.json.tmp").exists());

        let users = Arc::new(UserStore::restore(state.users));
        let registry = DocumentRegistry::restore(Arc::clone(&users), state.documents);
        assert!(users.authenticate("s", "pw").is_ok());
        assert_eq!(
            registry.list_visible(subscriber.id, Role::Subscriber)[0].id,
            doc.id
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flushed_documents_reference_flushed_users() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(ServerStorage::new(temp_dir.path()));
        let users = Arc::new(UserStore::new());
        let registry = Arc::new(DocumentRegistry::new(Arc::clone(&users)));

        let writer = {
            let users = Arc::clone(&users);
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..40 {
                    let publisher = users
                        .register(&format!("p{}", i), "pw", Role::Publisher)
                        .unwrap();
                    let subscriber = users
                        .register(&format!("s{}", i), "pw", Role::Subscriber)
                        .unwrap();
                    let doc = registry
                        .create(publisher.id, "doc", StorageLocator::new("uploads/a.pdf"))
                        .unwrap();
                    registry.assign(doc.id, subscriber.id).unwrap();
                }
            })
        };

        loop {
            let finished = writer.is_finished();
            storage.flush(&users, &registry).await.unwrap();

            let state = storage.load_state().unwrap().unwrap();
            let known: std::collections::BTreeSet<_> =
                state.users.iter().map(|record| record.user.id).collect();
            for doc in &state.documents {
                assert!(known.contains(&doc.owner_id), "owner of {} missing", doc.id);
                for user in &doc.assigned_to {
                    assert!(known.contains(user), "assignee {} of {} missing", user, doc.id);
                }
            }

            if finished {
                assert_eq!(state.documents.len(), 40);
                break;
            }
        }
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_store_read_remove_upload() {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp_dir.path());
        storage.ensure_dirs().unwrap();

        let locator = storage
            .store_upload(Some("Report.PDF"), b"%PDF-1.4 body".to_vec())
            .await
            .unwrap();

        assert!(locator.as_str().starts_with("uploads/"));
        assert!(locator.as_str().ends_with(".pdf"));
        assert_eq!(storage.read_upload(&locator).await.unwrap(), b"%PDF-1.4 body");

        storage.remove_upload(&locator).await.unwrap();
        assert!(storage.read_upload(&locator).await.is_err());
        // Removing twice is fine.
        storage.remove_upload(&locator).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp_dir.path());

        for locator in [
            "uploads/../state.json",
            "../etc/passwd",
            "state.json",
            "uploads/",
            "uploads/.hidden",
            "uploads/a/b.pdf",
        ] {
            assert!(
                matches!(
                    storage.read_upload(&StorageLocator::new(locator)).await,
                    Err(StorageError::InvalidLocator(_))
                ),
                "locator {} was accepted",
                locator
            );
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Some("a.PDF")), "pdf");
        assert_eq!(extension_of(Some("notes.tar.gz")), "gz");
        assert_eq!(extension_of(Some("weird.p$d/f")), "pdf");
        assert_eq!(extension_of(Some("noext")), "pdf");
        assert_eq!(extension_of(None), "pdf");
    }
}
