//! # Tickoff Storage
//!
//! Durable storage for todos, with graceful degradation.
//!
//! - [`flat`]: the whole collection as one JSON blob in key-value storage
//! - [`indexed`]: one row per record in `SQLite`, with secondary indexes
//! - [`migration`]: moves the flat blob into the indexed store once
//! - [`selection`]: picks the best backend that opens, in a fixed order
//! - [`repository`]: [`TodoRepository`], the only storage API the UI uses
//!
//! ## Example
//!
//! ```ignore
//! use tickoff_storage::{DatabaseLocation, FileKeyValue, StorageOptions, open_session};
//!
//! let options = StorageOptions {
//!     database: Some(DatabaseLocation::File(data_dir.join("todos.db"))),
//!     flat: Some(Arc::new(FileKeyValue::open(&data_dir).await?)),
//! };
//! let session = open_session(options, Arc::new(SystemClock)).await;
//! let todos = session.repository.all().await;
//! ```

pub mod flat;
pub mod indexed;
pub mod migration;
pub mod repository;
pub mod selection;

pub use flat::{FileKeyValue, FlatBackend, KeyValueStorage, MemoryKeyValue};
pub use indexed::{DatabaseLocation, IndexedBackend};
pub use migration::MigrationReport;
pub use repository::{TodoError, TodoRepository};
pub use selection::{StorageOptions, StorageSession, Strategy, open_session};
