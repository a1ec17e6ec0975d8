//! Flat backend: the whole collection as one JSON blob.
//!
//! # Overview
//!
//! The flat store keeps every record in a single JSON array under the key
//! [`TODOS_KEY`] of a [`KeyValueStorage`]. Every mutation reads the blob,
//! changes it, and writes it back in full:
//!
//! ```text
//! key "todos" → [{"id":1,"text":"Buy milk","completed":false,"createdAt":…,"updatedAt":…}, …]
//! ```
//!
//! New ids are one more than the highest id in the blob. Records written by
//! older versions may lack ids or timestamps; they are backfilled on read.
//!
//! Besides serving as a backend of its own, the flat store is the mirror the
//! repository writes to when the active backend fails, and the source the
//! migration drains into the indexed store.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tickoff_core::environment::Clock;
use tickoff_core::record::{ImportedTodo, NewTodo, StoredRecord, TodoId, TodoRecord};
use tickoff_core::storage::{BackendFuture, BackendKind, StorageError, TodoBackend};

/// Key under which the blob is stored
pub const TODOS_KEY: &str = "todos";

/// Minimal string key-value storage.
///
/// Implementations must make `set_item` atomic per key: a reader sees either
/// the previous value or the new one, never a torn write.
pub trait KeyValueStorage: Send + Sync {
    /// Check that the storage can be used at all.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the storage is missing.
    fn probe(&self) -> BackendFuture<'_, ()>;

    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails.
    fn get_item<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>>;

    /// Replace the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BackendFuture<'a, ()>;

    /// Delete the value under `key`; absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails.
    fn remove_item<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()>;
}

/// Key-value storage with one file per key inside a directory.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// target, so a crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileKeyValue {
    dir: PathBuf,
}

impl FileKeyValue {
    /// Use `dir` as the storage directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::Unavailable(
                BackendKind::Flat,
                format!("cannot create {}: {e}", dir.display()),
            )
        })?;
        Ok(Self { dir })
    }

    /// The storage directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStorage for FileKeyValue {
    fn probe(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let metadata = tokio::fs::metadata(&self.dir).await.map_err(|e| {
                StorageError::Unavailable(BackendKind::Flat, format!("{}: {e}", self.dir.display()))
            })?;
            if metadata.permissions().readonly() {
                return Err(StorageError::Unavailable(
                    BackendKind::Flat,
                    format!("{} is read-only", self.dir.display()),
                ));
            }
            Ok(())
        })
    }

    fn get_item<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                Ok(value) => Ok(Some(value)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::operation("get_item", e)),
            }
        })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let target = self.path_for(key);
            let staging = self.dir.join(format!(".{key}.json.tmp"));
            tokio::fs::write(&staging, value)
                .await
                .map_err(|e| StorageError::operation("set_item", e))?;
            tokio::fs::rename(&staging, &target)
                .await
                .map_err(|e| StorageError::operation("set_item", e))
        })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::operation("remove_item", e)),
            }
        })
    }
}

/// Process-local key-value storage.
///
/// Clones share the same map. A storage created with
/// [`MemoryKeyValue::unavailable`] fails its probe, standing in for an
/// environment without any key-value capability.
#[derive(Debug, Clone)]
pub struct MemoryKeyValue {
    items: Arc<Mutex<HashMap<String, String>>>,
    available: bool,
}

impl MemoryKeyValue {
    /// Create an empty, usable storage
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Arc::default(),
            available: true,
        }
    }

    /// Create a storage whose probe always fails
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            items: Arc::default(),
            available: false,
        }
    }

    fn with_items<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T, StorageError> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| StorageError::operation("memory_kv", "lock poisoned"))?;
        Ok(f(&mut items))
    }
}

impl Default for MemoryKeyValue {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryKeyValue {
    fn probe(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if self.available {
                Ok(())
            } else {
                Err(StorageError::Unavailable(
                    BackendKind::Flat,
                    "no key-value storage in this environment".into(),
                ))
            }
        })
    }

    fn get_item<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>> {
        Box::pin(async move { self.with_items(|items| items.get(key).cloned()) })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_items(|items| {
                items.insert(key.to_owned(), value);
            })
        })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_items(|items| {
                items.remove(key);
            })
        })
    }
}

/// Contents of the blob as found in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyBlob {
    /// No blob under the key
    Absent,
    /// The blob parsed as an array of records
    Records(Vec<ImportedTodo>),
    /// The blob exists but is not a JSON array of records
    Unparseable(String),
}

/// The blob as read at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSnapshot {
    raw: Option<String>,
    /// Parsed view of `raw`
    pub contents: LegacyBlob,
}

/// `TodoBackend` over a single JSON blob in a [`KeyValueStorage`].
///
/// Read-modify-write cycles are serialized by an async lock so concurrent
/// mutations within the process cannot lose each other's writes.
pub struct FlatBackend {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FlatBackend {
    /// Open the flat backend over `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the storage probe fails.
    pub async fn open(
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        storage.probe().await?;
        Ok(Self {
            storage,
            clock,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Read the blob verbatim along with its parsed contents.
    ///
    /// Malformed content is not an error here: the migration must leave an
    /// unparseable blob alone instead of failing on it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] only if the storage read itself fails.
    pub async fn snapshot(&self) -> Result<BlobSnapshot, StorageError> {
        let raw = self.storage.get_item(TODOS_KEY).await?;
        let contents = match raw.as_deref() {
            None => LegacyBlob::Absent,
            Some(raw) => match serde_json::from_str::<Vec<StoredRecord>>(raw) {
                Ok(stored) => {
                    let now = self.clock.now();
                    LegacyBlob::Records(stored.into_iter().map(|r| r.backfill(now)).collect())
                }
                Err(e) => LegacyBlob::Unparseable(e.to_string()),
            },
        };
        Ok(BlobSnapshot { raw, contents })
    }

    /// Read the blob without failing on malformed content.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] only if the storage read itself fails.
    pub async fn read_legacy(&self) -> Result<LegacyBlob, StorageError> {
        Ok(self.snapshot().await?.contents)
    }

    /// Overwrite the blob with exactly `records`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    pub async fn replace_all(&self, records: &[TodoRecord]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.write(records).await
    }

    /// Delete the blob if it still holds exactly what `snapshot` read.
    ///
    /// Returns `false` and leaves the blob in place when it was rewritten in
    /// the meantime. The comparison and the delete happen under the write
    /// lock, so no write through this backend can slip in between.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read or the delete fails.
    pub async fn remove_if_unchanged(&self, snapshot: &BlobSnapshot) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        if self.storage.get_item(TODOS_KEY).await? != snapshot.raw {
            return Ok(false);
        }
        self.storage.remove_item(TODOS_KEY).await?;
        Ok(true)
    }

    async fn read(&self) -> Result<Vec<TodoRecord>, StorageError> {
        match self.read_legacy().await? {
            LegacyBlob::Absent => Ok(Vec::new()),
            LegacyBlob::Records(imported) => Ok(assign_missing_ids(imported)),
            LegacyBlob::Unparseable(message) => Err(StorageError::Serialization(message)),
        }
    }

    async fn write(&self, records: &[TodoRecord]) -> Result<(), StorageError> {
        let blob = serde_json::to_string(records)?;
        self.storage.set_item(TODOS_KEY, blob).await
    }
}

/// Give id-less records the next free ids, keeping blob order
fn assign_missing_ids(imported: Vec<ImportedTodo>) -> Vec<TodoRecord> {
    let mut next = imported
        .iter()
        .filter_map(|t| t.id)
        .map(TodoId::get)
        .max()
        .unwrap_or(0);
    let mut records: Vec<TodoRecord> = imported
        .into_iter()
        .map(|todo| {
            let id = todo.id.unwrap_or_else(|| {
                next += 1;
                TodoId::new(next)
            });
            todo.with_id(id)
        })
        .collect();
    records.sort_by_key(|r| r.id);
    records
}

fn next_id(records: &[TodoRecord]) -> TodoId {
    TodoId::new(records.iter().map(|r| r.id.get()).max().unwrap_or(0) + 1)
}

impl TodoBackend for FlatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn insert(&self, todo: NewTodo) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut records = self.read().await?;
            let record = TodoRecord::new(next_id(&records), todo, self.clock.now());
            records.push(record.clone());
            self.write(&records).await?;
            Ok(record)
        })
    }

    fn import(&self, todo: ImportedTodo) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut records = self.read().await?;
            let id = match todo.id {
                Some(id) if records.iter().any(|r| r.id == id) => {
                    return Err(StorageError::operation("import", format!("id {id} is taken")));
                }
                Some(id) => id,
                None => next_id(&records),
            };
            let record = todo.with_id(id);
            records.push(record.clone());
            records.sort_by_key(|r| r.id);
            self.write(&records).await?;
            Ok(record)
        })
    }

    fn list_all(&self) -> BackendFuture<'_, Vec<TodoRecord>> {
        Box::pin(self.read())
    }

    fn get(&self, id: TodoId) -> BackendFuture<'_, Option<TodoRecord>> {
        Box::pin(async move { Ok(self.read().await?.into_iter().find(|r| r.id == id)) })
    }

    fn update(&self, record: TodoRecord) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut records = self.read().await?;
            let Some(existing) = records.iter_mut().find(|r| r.id == record.id) else {
                return Err(StorageError::operation(
                    "update",
                    format!("no record with id {}", record.id),
                ));
            };
            existing.completed = record.completed;
            existing.updated_at = record.updated_at;
            let updated = existing.clone();
            self.write(&records).await?;
            Ok(updated)
        })
    }

    fn remove(&self, id: TodoId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut records = self.read().await?;
            let before = records.len();
            records.retain(|r| r.id != id);
            if records.len() != before {
                self.write(&records).await?;
            }
            Ok(())
        })
    }

    fn clear(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.write(&[]).await
        })
    }
}
