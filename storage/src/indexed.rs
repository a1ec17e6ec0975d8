//! Indexed backend: one row per record in `SQLite`.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE todos (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     text TEXT NOT NULL,
//!     completed INTEGER NOT NULL DEFAULT 0,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! CREATE INDEX idx_todos_text ON todos(text);
//! CREATE INDEX idx_todos_completed ON todos(completed);
//! CREATE INDEX idx_todos_created_at ON todos(created_at);
//! ```
//!
//! The schema version lives in `PRAGMA user_version`. Opening applies every
//! upgrade step above the stored version inside one transaction; a database
//! written by a newer build is refused with [`StorageError::OpenFailed`].
//!
//! # Example
//!
//! ```ignore
//! use tickoff_storage::indexed::{DatabaseLocation, IndexedBackend};
//!
//! let location = DatabaseLocation::File("todos.db".into());
//! let backend = IndexedBackend::open(&location, Arc::new(SystemClock)).await?;
//! let open_items = backend.find_by_completed(false).await?;
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tickoff_core::environment::Clock;
use tickoff_core::record::{ImportedTodo, NewTodo, TodoId, TodoRecord};
use tickoff_core::storage::{BackendFuture, BackendKind, StorageError, TodoBackend};

/// Schema version this build reads and writes
pub const SCHEMA_VERSION: i64 = 1;

/// Upgrade steps keyed by the version they produce.
///
/// Adding a table or index means appending a step with the next version.
const UPGRADES: &[(i64, &[&str])] = &[(
    1,
    &[
        "CREATE TABLE IF NOT EXISTS todos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_todos_text ON todos(text)",
        "CREATE INDEX IF NOT EXISTS idx_todos_completed ON todos(completed)",
        "CREATE INDEX IF NOT EXISTS idx_todos_created_at ON todos(created_at)",
    ],
)];

const SELECT_COLUMNS: &str = "SELECT id, text, completed, created_at, updated_at FROM todos";

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// A database file, created if missing
    File(PathBuf),
    /// A private in-memory database that disappears with the backend
    InMemory,
}

#[derive(sqlx::FromRow)]
struct TodoRow {
    id: i64,
    text: String,
    completed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TodoRow> for TodoRecord {
    fn from(row: TodoRow) -> Self {
        Self {
            id: TodoId::new(row.id),
            text: row.text,
            completed: row.completed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn open_failed(error: impl std::fmt::Display) -> StorageError {
    StorageError::OpenFailed(BackendKind::Indexed, error.to_string())
}

/// `TodoBackend` over a `SQLite` database.
///
/// The pool holds a single connection, which serializes writers inside the
/// process; WAL mode and a busy timeout cover other processes.
#[derive(Clone)]
pub struct IndexedBackend {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl IndexedBackend {
    /// Open (or create) the database and bring its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpenFailed`] if the database cannot be opened,
    /// an upgrade step fails, or the stored schema is newer than
    /// [`SCHEMA_VERSION`].
    pub async fn open(
        location: &DatabaseLocation,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let (options, pool_options) = match location {
            DatabaseLocation::File(path) => (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(Duration::from_secs(5)),
                SqlitePoolOptions::new().max_connections(1),
            ),
            DatabaseLocation::InMemory => (
                SqliteConnectOptions::from_str("sqlite::memory:").map_err(open_failed)?,
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            ),
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(open_failed)?;

        let backend = Self { pool, clock };
        backend.upgrade_schema().await?;

        tracing::debug!(?location, "Indexed store opened");
        Ok(backend)
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection in the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Read the schema version stored in the database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the pragma cannot be read.
    pub async fn schema_version(&self) -> Result<i64, StorageError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::operation("schema_version", e))?;
        Ok(version)
    }

    async fn upgrade_schema(&self) -> Result<(), StorageError> {
        let current = self.schema_version().await.map_err(open_failed)?;
        if current > SCHEMA_VERSION {
            return Err(open_failed(format!(
                "schema version {current} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        let pending: Vec<_> = UPGRADES.iter().filter(|(v, _)| *v > current).collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(open_failed)?;
        for (version, statements) in pending {
            for statement in *statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(open_failed)?;
            }
            // PRAGMA values cannot be bound
            sqlx::query(&format!("PRAGMA user_version = {version}"))
                .execute(&mut *tx)
                .await
                .map_err(open_failed)?;
            tracing::info!(from = current, to = version, "Upgraded indexed store schema");
        }
        tx.commit().await.map_err(open_failed)
    }

    /// Records with the given completion state, via `idx_todos_completed`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    pub async fn find_by_completed(&self, completed: bool) -> Result<Vec<TodoRecord>, StorageError> {
        let rows: Vec<TodoRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE completed = ?1 ORDER BY id"))
                .bind(completed)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::operation("find_by_completed", e))?;
        Ok(rows.into_iter().map(TodoRecord::from).collect())
    }

    /// Records created in `[from, to)`, oldest first, via `idx_todos_created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails.
    pub async fn find_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TodoRecord>, StorageError> {
        let rows: Vec<TodoRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at, id"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::operation("find_created_between", e))?;
        Ok(rows.into_iter().map(TodoRecord::from).collect())
    }

    async fn fetch(&self, operation: &'static str, id: TodoId) -> Result<Option<TodoRecord>, StorageError> {
        let row: Option<TodoRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::operation(operation, e))?;
        Ok(row.map(TodoRecord::from))
    }
}

impl TodoBackend for IndexedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Indexed
    }

    fn insert(&self, todo: NewTodo) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let now = self.clock.now();
            let result = sqlx::query(
                "INSERT INTO todos (text, completed, created_at, updated_at) VALUES (?1, 0, ?2, ?2)",
            )
            .bind(todo.text())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::operation("insert", e))?;

            Ok(TodoRecord::new(TodoId::new(result.last_insert_rowid()), todo, now))
        })
    }

    fn import(&self, todo: ImportedTodo) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO todos (id, text, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(todo.id.map(TodoId::get))
            .bind(&todo.text)
            .bind(todo.completed)
            .bind(todo.created_at)
            .bind(todo.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::operation("import", e))?;

            Ok(todo.with_id(TodoId::new(result.last_insert_rowid())))
        })
    }

    fn list_all(&self) -> BackendFuture<'_, Vec<TodoRecord>> {
        Box::pin(async move {
            let rows: Vec<TodoRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY id"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::operation("list_all", e))?;
            Ok(rows.into_iter().map(TodoRecord::from).collect())
        })
    }

    fn get(&self, id: TodoId) -> BackendFuture<'_, Option<TodoRecord>> {
        Box::pin(self.fetch("get", id))
    }

    fn update(&self, record: TodoRecord) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE todos SET completed = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(record.completed)
                .bind(record.updated_at)
                .bind(record.id.get())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::operation("update", e))?;

            if result.rows_affected() == 0 {
                return Err(StorageError::operation(
                    "update",
                    format!("no record with id {}", record.id),
                ));
            }
            self.fetch("update", record.id).await?.ok_or_else(|| {
                StorageError::operation("update", format!("record {} vanished", record.id))
            })
        })
    }

    fn remove(&self, id: TodoId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM todos WHERE id = ?1")
                .bind(id.get())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::operation("remove", e))?;
            Ok(())
        })
    }

    fn clear(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM todos")
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::operation("clear", e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tickoff_testing::test_clock;

    async fn memory() -> IndexedBackend {
        IndexedBackend::open(&DatabaseLocation::InMemory, Arc::new(test_clock()))
            .await
            .unwrap()
    }

    fn todo(text: &str) -> NewTodo {
        NewTodo::parse(text).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn fresh_database_is_at_current_schema() {
        let backend = memory().await;
        assert_eq!(backend.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let backend = memory().await;
        let a = backend.insert(todo("a")).await.unwrap();
        let b = backend.insert(todo("b")).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(backend.list_all().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn update_persists_completion() {
        let backend = memory().await;
        let record = backend.insert(todo("Buy milk")).await.unwrap();
        let toggled = record.toggled(at(1_800_000_000));

        let stored = backend.update(toggled.clone()).await.unwrap();
        assert!(stored.completed);
        assert_eq!(backend.get(record.id).await.unwrap(), Some(toggled));
    }

    #[tokio::test]
    async fn update_of_unknown_id_fails() {
        let backend = memory().await;
        let ghost = TodoRecord::new(TodoId::new(7), todo("ghost"), at(0));
        assert!(matches!(
            backend.update(ghost).await,
            Err(StorageError::OperationFailed { operation: "update", .. })
        ));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let backend = memory().await;
        let a = backend.insert(todo("a")).await.unwrap();
        backend.insert(todo("b")).await.unwrap();

        backend.remove(a.id).await.unwrap();
        backend.remove(TodoId::new(999)).await.unwrap();
        assert_eq!(backend.list_all().await.unwrap().len(), 1);

        backend.clear().await.unwrap();
        assert!(backend.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_keeps_ids_and_timestamps() {
        let backend = memory().await;
        let imported = ImportedTodo {
            id: Some(TodoId::new(42)),
            text: "old".into(),
            completed: true,
            created_at: at(100),
            updated_at: at(200),
        };

        let record = backend.import(imported.clone()).await.unwrap();
        assert_eq!(record.id, TodoId::new(42));
        assert_eq!(backend.get(record.id).await.unwrap(), Some(record));

        assert!(backend.import(imported).await.is_err());

        let next = backend.insert(todo("new")).await.unwrap();
        assert_eq!(next.id, TodoId::new(43));
    }

    #[tokio::test]
    async fn lookups_use_completion_and_creation_time() {
        let backend = memory().await;
        for (id, secs, completed) in [(1, 10, false), (2, 20, true), (3, 30, false)] {
            backend
                .import(ImportedTodo {
                    id: Some(TodoId::new(id)),
                    text: format!("item {id}"),
                    completed,
                    created_at: at(secs),
                    updated_at: at(secs),
                })
                .await
                .unwrap();
        }

        let done = backend.find_by_completed(true).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, TodoId::new(2));

        let window = backend.find_created_between(at(15), at(30)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, TodoId::new(2));
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let location = DatabaseLocation::File(dir.path().join("todos.db"));

        let backend = IndexedBackend::open(&location, Arc::new(test_clock()))
            .await
            .unwrap();
        backend.insert(todo("persisted")).await.unwrap();
        backend.close().await;

        let reopened = IndexedBackend::open(&location, Arc::new(test_clock()))
            .await
            .unwrap();
        let records = reopened.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "persisted");
    }
}
