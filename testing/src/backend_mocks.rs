//! In-memory backend for repository and migration tests
//!
//! [`InMemoryBackend`] implements `TodoBackend` over a `BTreeMap` with
//! auto-incrementing ids. It can impersonate any [`BackendKind`] and fail
//! chosen operations on demand, which is how the degradation paths of the
//! repository are exercised without a real database.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Mutex poison is the only panic source

use crate::mocks::test_clock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tickoff_core::environment::Clock;
use tickoff_core::record::{ImportedTodo, NewTodo, TodoId, TodoRecord};
use tickoff_core::storage::{BackendFuture, BackendKind, StorageError, TodoBackend};

#[derive(Default)]
struct Inner {
    records: BTreeMap<TodoId, TodoRecord>,
    last_id: i64,
    failing: HashSet<&'static str>,
    fail_once: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
}

impl Inner {
    fn check(&mut self, operation: &'static str) -> Result<(), StorageError> {
        *self.calls.entry(operation).or_default() += 1;
        if self.failing.contains(operation) || self.fail_once.remove(operation) {
            return Err(StorageError::operation(operation, "injected failure"));
        }
        Ok(())
    }
}

/// In-memory `TodoBackend` with failure injection.
///
/// Cloning shares the underlying records, so a clone kept by the test can
/// inspect what the code under test wrote.
///
/// # Example
///
/// ```
/// use tickoff_testing::InMemoryBackend;
/// use tickoff_core::storage::{BackendKind, TodoBackend};
/// use tickoff_core::record::NewTodo;
///
/// # async fn example() {
/// let backend = InMemoryBackend::new(BackendKind::Indexed);
/// backend.fail_operation("insert");
///
/// let result = backend.insert(NewTodo::parse("Buy milk").unwrap()).await;
/// assert!(result.is_err());
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    kind: BackendKind,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    /// Create an empty backend reporting the given kind
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self::with_clock(kind, Arc::new(test_clock()))
    }

    /// Create an empty backend stamping records with `clock`
    #[must_use]
    pub fn with_clock(kind: BackendKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            clock,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Seed records directly, bypassing failure injection
    #[must_use]
    pub fn with_records(self, records: impl IntoIterator<Item = TodoRecord>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for record in records {
                inner.last_id = inner.last_id.max(record.id.get());
                inner.records.insert(record.id, record);
            }
        }
        self
    }

    /// Make every future call of `operation` fail
    pub fn fail_operation(&self, operation: &'static str) {
        self.inner.lock().unwrap().failing.insert(operation);
    }

    /// Make only the next call of `operation` fail
    pub fn fail_next(&self, operation: &'static str) {
        self.inner.lock().unwrap().fail_once.insert(operation);
    }

    /// Stop failing `operation`
    pub fn recover(&self, operation: &'static str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing.remove(operation);
        inner.fail_once.remove(operation);
    }

    /// Snapshot of the stored records in id order
    #[must_use]
    pub fn records(&self) -> Vec<TodoRecord> {
        self.inner.lock().unwrap().records.values().cloned().collect()
    }

    /// How often `operation` was called, failures included
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }
}

impl TodoBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn insert(&self, todo: NewTodo) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("insert")?;
            inner.last_id += 1;
            let record = TodoRecord::new(TodoId::new(inner.last_id), todo, self.clock.now());
            inner.records.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn import(&self, todo: ImportedTodo) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("import")?;
            let id = match todo.id {
                Some(id) if inner.records.contains_key(&id) => {
                    return Err(StorageError::operation("import", format!("id {id} is taken")));
                }
                Some(id) => id,
                None => TodoId::new(inner.last_id + 1),
            };
            inner.last_id = inner.last_id.max(id.get());
            let record = todo.with_id(id);
            inner.records.insert(id, record.clone());
            Ok(record)
        })
    }

    fn list_all(&self) -> BackendFuture<'_, Vec<TodoRecord>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("list_all")?;
            Ok(inner.records.values().cloned().collect())
        })
    }

    fn get(&self, id: TodoId) -> BackendFuture<'_, Option<TodoRecord>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("get")?;
            Ok(inner.records.get(&id).cloned())
        })
    }

    fn update(&self, record: TodoRecord) -> BackendFuture<'_, TodoRecord> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("update")?;
            match inner.records.get_mut(&record.id) {
                Some(existing) => {
                    existing.completed = record.completed;
                    existing.updated_at = record.updated_at;
                    Ok(existing.clone())
                }
                None => Err(StorageError::operation(
                    "update",
                    format!("no record with id {}", record.id),
                )),
            }
        })
    }

    fn remove(&self, id: TodoId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("remove")?;
            inner.records.remove(&id);
            Ok(())
        })
    }

    fn clear(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.check("clear")?;
            inner.records.clear();
            Ok(())
        })
    }
}
