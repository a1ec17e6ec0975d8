//! Storage contract for todo records.
//!
//! The [`TodoBackend`] trait is the seam between the repository and the two
//! durable backends:
//!
//! - **Flat** (`FlatBackend` in `tickoff-storage`): the whole collection as one
//!   JSON blob under a fixed key. Every mutation rewrites the blob.
//! - **Indexed** (`IndexedBackend` in `tickoff-storage`): one row per record,
//!   auto-incrementing ids, secondary indexes on text, completion and
//!   creation time.
//!
//! Test doubles live in `tickoff-testing`.
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! repository can hold the active backend as `Arc<dyn TodoBackend>` and the
//! reducer's effects can capture it.

use crate::record::{ImportedTodo, NewTodo, TodoId, TodoRecord};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`TodoBackend`] methods
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors that can occur while opening or using a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend's capability is missing in this environment.
    #[error("{0} storage is unavailable: {1}")]
    Unavailable(BackendKind, String),

    /// The backend exists but could not be opened.
    #[error("failed to open {0} storage: {1}")]
    OpenFailed(BackendKind, String),

    /// A single call against an open backend failed.
    #[error("{operation} failed: {message}")]
    OperationFailed {
        /// Name of the failed operation (`insert`, `list_all`, ...)
        operation: &'static str,
        /// Backend-specific detail
        message: String,
    },

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Shorthand for [`StorageError::OperationFailed`]
    #[must_use]
    pub fn operation(operation: &'static str, message: impl fmt::Display) -> Self {
        Self::OperationFailed {
            operation,
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Which storage strategy is serving the session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Per-record indexed database
    Indexed,
    /// Whole-collection blob in a key-value store
    Flat,
    /// Nothing durable opened; records live only in memory
    Memory,
}

impl BackendKind {
    /// Human-readable label used in the status line
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Indexed => "Indexed store",
            Self::Flat => "Flat store",
            Self::Memory => "Memory only",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed => write!(f, "indexed"),
            Self::Flat => write!(f, "flat"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Durable storage for todo records.
///
/// # Contract
///
/// - `insert` assigns the id and both timestamps.
/// - `import` keeps the id of the incoming record when it is free and fails
///   with [`StorageError::OperationFailed`] when it is taken.
/// - `list_all` returns records in ascending id order.
/// - `update` replaces `completed` and `updated_at` of an existing record.
/// - `remove` of an unknown id succeeds.
pub trait TodoBackend: Send + Sync {
    /// Which strategy this backend implements
    fn kind(&self) -> BackendKind;

    /// Create a record from validated input.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the record cannot be written.
    fn insert(&self, todo: NewTodo) -> BackendFuture<'_, TodoRecord>;

    /// Write a record carried over from another backend.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OperationFailed`] if the id is already taken
    /// or the record cannot be written.
    fn import(&self, todo: ImportedTodo) -> BackendFuture<'_, TodoRecord>;

    /// Read every record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the records cannot be read.
    fn list_all(&self) -> BackendFuture<'_, Vec<TodoRecord>>;

    /// Read one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the lookup fails.
    fn get(&self, id: TodoId) -> BackendFuture<'_, Option<TodoRecord>>;

    /// Persist a mutated record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the record does not exist or cannot be written.
    fn update(&self, record: TodoRecord) -> BackendFuture<'_, TodoRecord>;

    /// Delete a record; unknown ids are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails.
    fn remove(&self, id: TodoId) -> BackendFuture<'_, ()>;

    /// Delete every record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails.
    fn clear(&self) -> BackendFuture<'_, ()>;
}
