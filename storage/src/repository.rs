//! The todo repository: one entry point over whichever backend was selected.
//!
//! # Degradation
//!
//! Every operation first goes to the active backend. When that call fails,
//! the repository applies the operation to its in-memory list instead, writes
//! the list to the flat mirror, and reports success. The caller never sees a
//! storage error.
//!
//! Records changed this way are kept in an overlay for the rest of the
//! session, so a later successful read from the backend does not hide them:
//!
//! ```text
//! backend.list_all()  ──►  drop tombstoned ids  ──►  replace/append overlay records  ──►  cache
//! ```
//!
//! The mirrored blob is picked up by the next session's migration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tickoff_core::environment::Clock;
use tickoff_core::record::{NewTodo, TodoId, TodoRecord};
use tickoff_core::storage::{BackendKind, StorageError, TodoBackend};
use tickoff_core::{DateTime, Utc};

use crate::flat::FlatBackend;

/// Errors surfaced by [`TodoRepository`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TodoError {
    /// The text was empty after trimming
    #[error("todo text must not be empty")]
    ValidationRejected,
}

/// Local changes the backend has not accepted
#[derive(Debug, Default)]
struct Overlay {
    upserts: BTreeMap<TodoId, TodoRecord>,
    deleted: BTreeSet<TodoId>,
}

impl Overlay {
    fn apply(&self, records: Vec<TodoRecord>) -> Vec<TodoRecord> {
        let mut merged: BTreeMap<TodoId, TodoRecord> = records
            .into_iter()
            .filter(|r| !self.deleted.contains(&r.id))
            .map(|r| (r.id, r))
            .collect();
        merged.extend(self.upserts.iter().map(|(id, r)| (*id, r.clone())));
        merged.into_values().collect()
    }
}

#[derive(Debug, Default)]
struct RepoState {
    cache: Vec<TodoRecord>,
    overlay: Overlay,
}

impl RepoState {
    fn put(&mut self, record: TodoRecord) {
        match self.cache.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => {
                self.cache.push(record);
                self.cache.sort_by_key(|r| r.id);
            }
        }
    }
}

/// Id for a record created while the backend is failing.
///
/// Millisecond timestamps keep these ids clear of the small sequential ids
/// backends hand out.
fn fallback_id(cache: &[TodoRecord], now: DateTime<Utc>) -> TodoId {
    let next = cache.iter().map(|r| r.id.get()).max().unwrap_or(0) + 1;
    TodoId::new(next.max(now.timestamp_millis()))
}

/// Facade over the active backend with per-operation fallback.
///
/// Operations are serialized: each holds the repository lock until the
/// backend call and the cache update are both done.
pub struct TodoRepository {
    kind: BackendKind,
    backend: Option<Arc<dyn TodoBackend>>,
    mirror: Option<Arc<FlatBackend>>,
    clock: Arc<dyn Clock>,
    state: tokio::sync::Mutex<RepoState>,
}

impl TodoRepository {
    /// Build a repository over `backend`, mirroring fallbacks into `mirror`.
    ///
    /// Without a backend the repository runs in memory-only mode.
    #[must_use]
    pub fn new(
        backend: Option<Arc<dyn TodoBackend>>,
        mirror: Option<Arc<FlatBackend>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let kind = backend.as_ref().map_or(BackendKind::Memory, |b| b.kind());
        Self {
            kind,
            backend,
            mirror,
            clock,
            state: tokio::sync::Mutex::default(),
        }
    }

    /// Repository that never touches durable storage
    #[must_use]
    pub fn memory_only(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, None, clock)
    }

    /// Which backend serves this session
    #[must_use]
    pub const fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Every record in id order.
    ///
    /// Falls back to the last known list if the backend cannot be read.
    pub async fn all(&self) -> Vec<TodoRecord> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await
    }

    /// Create a todo from raw input and return the refreshed list.
    ///
    /// # Errors
    ///
    /// Returns [`TodoError::ValidationRejected`] if `text` is blank.
    pub async fn add(&self, text: &str) -> Result<Vec<TodoRecord>, TodoError> {
        let todo = NewTodo::parse(text).ok_or(TodoError::ValidationRejected)?;
        let mut state = self.state.lock().await;

        if let Some(backend) = &self.backend {
            match backend.insert(todo.clone()).await {
                Ok(record) => {
                    tracing::debug!(id = %record.id, "Todo added");
                    state.put(record);
                    return Ok(self.refresh(&mut state).await);
                }
                Err(error) => self.note_fallback("insert", &error),
            }
        }

        let now = self.clock.now();
        let record = TodoRecord::new(fallback_id(&state.cache, now), todo, now);
        if self.backend.is_some() {
            state.overlay.upserts.insert(record.id, record.clone());
        }
        state.put(record);
        self.mirror(&state.cache).await;
        Ok(state.cache.clone())
    }

    /// Flip a todo's completion and return the refreshed list.
    ///
    /// A record the backend holds is always written through, even after an
    /// earlier toggle of it fell back; the first successful write supersedes
    /// the overlay copy. Only records the backend has never seen stay local.
    ///
    /// Unknown ids are ignored.
    pub async fn toggle(&self, id: TodoId) -> Vec<TodoRecord> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        if state.overlay.deleted.contains(&id) {
            tracing::debug!(%id, "Ignoring toggle of deleted todo");
            return state.cache.clone();
        }

        if let Some(backend) = &self.backend {
            match backend.get(id).await {
                Ok(Some(stored)) => {
                    let current = state.overlay.upserts.get(&id).cloned().unwrap_or(stored);
                    match backend.update(current.toggled(now)).await {
                        Ok(updated) => {
                            tracing::debug!(%id, completed = updated.completed, "Todo toggled");
                            state.overlay.upserts.remove(&id);
                            state.put(updated);
                            return self.refresh(&mut state).await;
                        }
                        Err(error) => self.note_fallback("update", &error),
                    }
                }
                Ok(None) if !state.overlay.upserts.contains_key(&id) => {
                    tracing::debug!(%id, "Ignoring toggle of unknown todo");
                    return self.refresh(&mut state).await;
                }
                // Created during a fallback, the backend never saw it
                Ok(None) => {}
                Err(error) => self.note_fallback("get", &error),
            }
        }

        let Some(current) = state.cache.iter().find(|r| r.id == id).cloned() else {
            tracing::debug!(%id, "Ignoring toggle of unknown todo");
            return state.cache.clone();
        };
        let toggled = current.toggled(now);
        if self.backend.is_some() {
            state.overlay.upserts.insert(id, toggled.clone());
        }
        state.put(toggled);
        self.mirror(&state.cache).await;
        state.cache.clone()
    }

    /// Delete a todo and return the refreshed list.
    ///
    /// Unknown ids are ignored.
    pub async fn delete(&self, id: TodoId) -> Vec<TodoRecord> {
        let mut state = self.state.lock().await;

        if let Some(backend) = &self.backend {
            match backend.remove(id).await {
                Ok(()) => {
                    tracing::debug!(%id, "Todo deleted");
                    state.overlay.upserts.remove(&id);
                    state.cache.retain(|r| r.id != id);
                    return self.refresh(&mut state).await;
                }
                Err(error) => self.note_fallback("remove", &error),
            }
        }

        let before = state.cache.len();
        state.cache.retain(|r| r.id != id);
        if self.backend.is_some() {
            state.overlay.upserts.remove(&id);
            state.overlay.deleted.insert(id);
        }
        if state.cache.len() != before {
            self.mirror(&state.cache).await;
        }
        state.cache.clone()
    }

    /// Delete every todo and return the (empty) list.
    pub async fn clear(&self) -> Vec<TodoRecord> {
        let mut state = self.state.lock().await;

        if let Some(backend) = &self.backend {
            match backend.clear().await {
                Ok(()) => {
                    tracing::debug!("All todos cleared");
                    state.overlay = Overlay::default();
                    state.cache.clear();
                    return self.refresh(&mut state).await;
                }
                Err(error) => self.note_fallback("clear", &error),
            }
        }

        if self.backend.is_some() {
            let ids: Vec<TodoId> = state.cache.iter().map(|r| r.id).collect();
            state.overlay.upserts.clear();
            state.overlay.deleted.extend(ids);
        }
        state.cache.clear();
        self.mirror(&state.cache).await;
        state.cache.clone()
    }

    async fn refresh(&self, state: &mut RepoState) -> Vec<TodoRecord> {
        if let Some(backend) = &self.backend {
            match backend.list_all().await {
                Ok(records) => state.cache = state.overlay.apply(records),
                Err(error) => self.note_fallback("list_all", &error),
            }
        }
        state.cache.clone()
    }

    async fn mirror(&self, records: &[TodoRecord]) {
        if let Some(flat) = &self.mirror {
            if let Err(error) = flat.replace_all(records).await {
                tracing::warn!(%error, "Could not mirror todos into the flat store");
            }
        }
    }

    fn note_fallback(&self, operation: &'static str, error: &StorageError) {
        tracing::warn!(
            operation,
            backend = %self.kind,
            %error,
            "Storage operation failed, using the in-memory list"
        );
        metrics::counter!("storage.fallback.total", "operation" => operation).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flat::{KeyValueStorage, MemoryKeyValue, TODOS_KEY};
    use tickoff_testing::{InMemoryBackend, SteppingClock, test_clock};

    fn repo_over(backend: &InMemoryBackend, mirror: Option<Arc<FlatBackend>>) -> TodoRepository {
        TodoRepository::new(
            Some(Arc::new(backend.clone())),
            mirror,
            Arc::new(test_clock()),
        )
    }

    async fn mirror_over(kv: &MemoryKeyValue) -> Arc<FlatBackend> {
        Arc::new(
            FlatBackend::open(Arc::new(kv.clone()), Arc::new(test_clock()))
                .await
                .unwrap(),
        )
    }

    fn texts(records: &[TodoRecord]) -> Vec<&str> {
        records.iter().map(|r| r.text.as_str()).collect()
    }

    #[tokio::test]
    async fn add_trims_and_rejects_blank_text() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);

        assert_eq!(repo.add("   ").await, Err(TodoError::ValidationRejected));
        assert_eq!(backend.calls("insert"), 0);

        let records = repo.add("  Buy milk ").await.unwrap();
        assert_eq!(texts(&records), vec!["Buy milk"]);
        assert!(!records[0].completed);
    }

    #[tokio::test]
    async fn toggle_twice_restores_completion() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        let id = repo.add("a").await.unwrap()[0].id;

        assert!(repo.toggle(id).await[0].completed);
        assert!(!repo.toggle(id).await[0].completed);
    }

    #[tokio::test]
    async fn unknown_ids_are_ignored() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        repo.add("a").await.unwrap();

        assert_eq!(repo.toggle(TodoId::new(99)).await.len(), 1);
        assert_eq!(repo.delete(TodoId::new(99)).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_insert_falls_back_and_mirrors() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        backend.fail_operation("insert");
        let kv = MemoryKeyValue::new();
        let repo = repo_over(&backend, Some(mirror_over(&kv).await));

        let records = repo.add("Buy milk").await.unwrap();

        assert_eq!(texts(&records), vec!["Buy milk"]);
        assert!(backend.records().is_empty());
        let blob = kv.get_item(TODOS_KEY).await.unwrap().unwrap();
        assert!(blob.contains("Buy milk"));
    }

    #[tokio::test]
    async fn fallback_records_survive_later_reads() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        repo.add("stored").await.unwrap();

        backend.fail_next("insert");
        repo.add("stranded").await.unwrap();

        let records = repo.all().await;
        assert_eq!(texts(&records), vec!["stored", "stranded"]);
    }

    #[tokio::test]
    async fn fallback_ids_are_unique_and_above_cached_ids() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        backend.fail_operation("insert");
        let repo = repo_over(&backend, None);

        let first = repo.add("a").await.unwrap();
        let both = repo.add("b").await.unwrap();

        assert_eq!(both.len(), 2);
        assert!(both[1].id > first[0].id);
        assert!(first[0].id.get() >= test_clock().now().timestamp_millis());
    }

    #[tokio::test]
    async fn failed_toggle_applies_locally() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        let id = repo.add("a").await.unwrap()[0].id;

        backend.fail_operation("update");
        assert!(repo.toggle(id).await[0].completed);
        assert!(repo.all().await[0].completed);
        assert!(!backend.records()[0].completed);
    }

    #[tokio::test]
    async fn toggle_after_a_failed_update_writes_through() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        let id = repo.add("a").await.unwrap()[0].id;

        backend.fail_next("update");
        assert!(repo.toggle(id).await[0].completed);
        assert!(!repo.toggle(id).await[0].completed);
        assert_eq!(backend.calls("update"), 2);
        assert!(!backend.records()[0].completed);

        assert!(repo.toggle(id).await[0].completed);
        assert_eq!(backend.calls("update"), 3);
        assert!(backend.records()[0].completed);
    }

    #[tokio::test]
    async fn records_created_during_a_fallback_toggle_locally() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);

        backend.fail_next("insert");
        let id = repo.add("stranded").await.unwrap()[0].id;

        assert!(repo.toggle(id).await[0].completed);
        assert!(!repo.toggle(id).await[0].completed);
        assert_eq!(backend.calls("update"), 0);
        assert!(backend.records().is_empty());
    }

    #[tokio::test]
    async fn backend_recovery_resumes_write_through() {
        let now = test_clock().now();
        let seeded = TodoRecord::new(TodoId::new(7), NewTodo::parse("seeded").unwrap(), now);
        let backend = InMemoryBackend::new(BackendKind::Indexed).with_records([seeded]);
        let repo = repo_over(&backend, None);
        assert_eq!(texts(&repo.all().await), vec!["seeded"]);

        backend.fail_operation("update");
        backend.fail_operation("list_all");
        assert!(repo.toggle(TodoId::new(7)).await[0].completed);
        assert!(!repo.toggle(TodoId::new(7)).await[0].completed);
        assert!(repo.toggle(TodoId::new(7)).await[0].completed);
        assert!(!backend.records()[0].completed);

        backend.recover("update");
        backend.recover("list_all");
        assert!(!repo.toggle(TodoId::new(7)).await[0].completed);
        assert!(repo.toggle(TodoId::new(7)).await[0].completed);
        assert_eq!(repo.all().await, backend.records());
        assert!(backend.records()[0].completed);

        let id = repo.add("after recovery").await.unwrap()[1].id;
        assert_eq!(id, TodoId::new(8));
    }

    #[tokio::test]
    async fn updated_at_advances_across_toggles() {
        let clock: Arc<dyn Clock> = Arc::new(SteppingClock::new(
            test_clock().now(),
            chrono::Duration::seconds(1),
        ));
        let backend = InMemoryBackend::with_clock(BackendKind::Indexed, Arc::clone(&clock));
        let repo = TodoRepository::new(Some(Arc::new(backend.clone())), None, clock);
        let created = repo.add("a").await.unwrap()[0].clone();

        let mut stamps = vec![created.updated_at];
        for round in 0..4 {
            if round == 2 {
                backend.fail_next("update");
            }
            let record = repo.toggle(created.id).await[0].clone();
            assert_eq!(record.created_at, created.created_at);
            stamps.push(record.updated_at);
        }

        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]), "{stamps:?}");
        assert_eq!(backend.records()[0].updated_at, stamps[4]);
    }

    proptest::proptest! {
        #[test]
        fn add_grows_the_list_by_exactly_one(
            texts in proptest::collection::vec("[a-z ]{0,8}", 1..8),
            failures in proptest::collection::vec(proptest::bool::ANY, 8),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let backend = InMemoryBackend::new(BackendKind::Indexed);
                let repo = repo_over(&backend, None);

                for (text, fail) in texts.iter().zip(&failures) {
                    if *fail {
                        backend.fail_next("insert");
                    }
                    let before = repo.all().await.len();
                    match repo.add(text).await {
                        Ok(records) => {
                            proptest::prop_assert_eq!(records.len(), before + 1);
                            proptest::prop_assert_eq!(repo.all().await.len(), before + 1);
                        }
                        Err(TodoError::ValidationRejected) => {
                            proptest::prop_assert!(text.trim().is_empty());
                            proptest::prop_assert_eq!(repo.all().await.len(), before);
                        }
                    }
                }
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn failed_delete_hides_the_record_for_the_session() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        let id = repo.add("a").await.unwrap()[0].id;

        backend.fail_operation("remove");
        assert!(repo.delete(id).await.is_empty());
        assert!(repo.all().await.is_empty());
        assert_eq!(backend.records().len(), 1);
    }

    #[tokio::test]
    async fn failed_list_serves_the_cache() {
        let backend = InMemoryBackend::new(BackendKind::Indexed);
        let repo = repo_over(&backend, None);
        repo.add("a").await.unwrap();

        backend.fail_operation("list_all");
        assert_eq!(texts(&repo.all().await), vec!["a"]);
    }

    #[tokio::test]
    async fn memory_only_mode_keeps_everything_in_the_cache() {
        let repo = TodoRepository::memory_only(Arc::new(test_clock()));
        assert_eq!(repo.backend_kind(), BackendKind::Memory);

        let id = repo.add("a").await.unwrap()[0].id;
        repo.add("b").await.unwrap();
        repo.toggle(id).await;
        let records = repo.delete(id).await;

        assert_eq!(texts(&records), vec!["b"]);
        assert!(repo.clear().await.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_backend() {
        let backend = InMemoryBackend::new(BackendKind::Flat);
        let repo = repo_over(&backend, None);
        repo.add("a").await.unwrap();
        repo.add("b").await.unwrap();

        assert!(repo.clear().await.is_empty());
        assert!(backend.records().is_empty());
    }
}
