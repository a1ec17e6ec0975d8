//! One-time move of the flat blob into the indexed store.
//!
//! Runs in the background after the indexed store opens. Every record in the
//! blob is reconciled concurrently against the indexed store:
//!
//! | blob record                                   | outcome    |
//! |-----------------------------------------------|------------|
//! | id free (or no id)                            | `migrated` |
//! | same id and text, newer `updatedAt`           | `updated`  |
//! | same id and text, not newer                   | `skipped`  |
//! | import rejected (e.g. id held by another todo)| `failed`   |
//!
//! Blob ids name the same records as the indexed store because the blob is
//! either the store the indexed one replaced or the mirror written while it
//! was failing. Failed records are logged and counted, never retried.
//!
//! Once every record has settled, the blob is deleted, but only if nothing
//! rewrote it while the imports ran. A blob that is absent, empty or cannot
//! be parsed is left alone.

use futures::future::join_all;
use std::sync::Arc;
use tickoff_core::record::ImportedTodo;
use tickoff_core::storage::{StorageError, TodoBackend};
use tokio::task::JoinHandle;

use crate::flat::{FlatBackend, LegacyBlob};

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records found in the blob
    pub total: usize,
    /// Records written to the indexed store under a free id
    pub migrated: usize,
    /// Existing records overwritten by a newer blob copy
    pub updated: usize,
    /// Records the indexed store already held in the same or a newer state
    pub skipped: usize,
    /// Records the indexed store rejected
    pub failed: usize,
    /// Whether the blob was deleted afterwards
    pub source_removed: bool,
}

impl MigrationReport {
    /// True when there was nothing to migrate
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.total == 0 && !self.source_removed
    }

    /// Records whose state now lives in the indexed store
    #[must_use]
    pub const fn changed(&self) -> usize {
        self.migrated + self.updated
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Migrated,
    Updated,
    Skipped,
}

impl Outcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }
}

async fn reconcile(target: &dyn TodoBackend, todo: ImportedTodo) -> Result<Outcome, StorageError> {
    if let Some(id) = todo.id {
        if let Some(existing) = target.get(id).await? {
            if existing.text == todo.text {
                if todo.updated_at <= existing.updated_at {
                    return Ok(Outcome::Skipped);
                }
                target.update(todo.with_id(id)).await?;
                return Ok(Outcome::Updated);
            }
        }
    }
    target.import(todo).await?;
    Ok(Outcome::Migrated)
}

/// Drain the flat blob into `target`.
///
/// Never fails: read errors and per-record errors are logged and reflected
/// in the report.
pub async fn migrate(flat: &FlatBackend, target: &dyn TodoBackend) -> MigrationReport {
    let snapshot = match flat.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::warn!(%error, "Could not read flat blob, skipping migration");
            return MigrationReport::default();
        }
    };

    let imported = match &snapshot.contents {
        LegacyBlob::Absent => {
            tracing::debug!("No flat blob to migrate");
            return MigrationReport::default();
        }
        LegacyBlob::Unparseable(reason) => {
            tracing::warn!(%reason, "Flat blob is not a record array, leaving it in place");
            return MigrationReport::default();
        }
        LegacyBlob::Records(imported) if imported.is_empty() => {
            tracing::debug!("Flat blob is empty, nothing to migrate");
            return MigrationReport::default();
        }
        LegacyBlob::Records(imported) => imported.clone(),
    };

    let total = imported.len();
    tracing::info!(total, "Migrating flat records into the indexed store");

    let results = join_all(imported.into_iter().map(|todo| {
        let original_id = todo.id;
        async move { (original_id, reconcile(target, todo).await) }
    }))
    .await;

    let mut report = MigrationReport {
        total,
        ..MigrationReport::default()
    };
    for (original_id, result) in results {
        match result {
            Ok(outcome) => {
                match outcome {
                    Outcome::Migrated => report.migrated += 1,
                    Outcome::Updated => report.updated += 1,
                    Outcome::Skipped => report.skipped += 1,
                }
                tracing::debug!(?original_id, outcome = outcome.label(), "Record reconciled");
                metrics::counter!("storage.migration.records", "outcome" => outcome.label())
                    .increment(1);
            }
            Err(error) => {
                report.failed += 1;
                tracing::warn!(?original_id, %error, "Record could not be migrated, skipping");
                metrics::counter!("storage.migration.records", "outcome" => "failed").increment(1);
            }
        }
    }

    report.source_removed = match flat.remove_if_unchanged(&snapshot).await {
        Ok(true) => true,
        Ok(false) => {
            tracing::info!("Flat blob changed during migration, keeping it for the next session");
            false
        }
        Err(error) => {
            tracing::warn!(%error, "Could not remove flat blob after migration");
            false
        }
    };

    tracing::info!(
        total,
        migrated = report.migrated,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        source_removed = report.source_removed,
        "Flat migration finished"
    );
    report
}

/// Run [`migrate`] on its own task so it never delays the first render
#[must_use]
pub fn spawn_migration(
    flat: Arc<FlatBackend>,
    target: Arc<dyn TodoBackend>,
) -> JoinHandle<MigrationReport> {
    tokio::spawn(async move { migrate(&flat, target.as_ref()).await })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flat::{KeyValueStorage, MemoryKeyValue, TODOS_KEY};
    use std::sync::Mutex;
    use tickoff_core::environment::Clock;
    use tickoff_core::record::{NewTodo, TodoId, TodoRecord};
    use tickoff_core::storage::{BackendFuture, BackendKind};
    use tickoff_testing::{InMemoryBackend, test_clock};

    async fn seeded(blob: &str) -> (MemoryKeyValue, FlatBackend) {
        let kv = MemoryKeyValue::new();
        kv.set_item(TODOS_KEY, blob.to_owned()).await.unwrap();
        let flat = FlatBackend::open(Arc::new(kv.clone()), Arc::new(test_clock()))
            .await
            .unwrap();
        (kv, flat)
    }

    fn stored(id: i64, text: &str, completed: bool, updated_at: &str) -> TodoRecord {
        let updated_at = updated_at.parse().unwrap();
        TodoRecord {
            id: TodoId::new(id),
            text: text.into(),
            completed,
            created_at: test_clock().now(),
            updated_at,
        }
    }

    #[tokio::test]
    async fn moves_every_record_and_removes_the_blob() {
        let (kv, flat) = seeded(r#"[{"id":1,"text":"a"},{"id":2,"text":"b"}]"#).await;
        let target = InMemoryBackend::new(BackendKind::Indexed);

        let report = migrate(&flat, &target).await;

        assert_eq!(
            report,
            MigrationReport {
                total: 2,
                migrated: 2,
                source_removed: true,
                ..MigrationReport::default()
            }
        );
        let texts: Vec<_> = target.records().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(kv.get_item(TODOS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn absent_blob_is_a_noop() {
        let kv = MemoryKeyValue::new();
        let flat = FlatBackend::open(Arc::new(kv), Arc::new(test_clock()))
            .await
            .unwrap();
        let target = InMemoryBackend::new(BackendKind::Indexed);

        let report = migrate(&flat, &target).await;
        assert!(report.is_noop());
        assert_eq!(target.calls("import"), 0);
    }

    #[tokio::test]
    async fn empty_blob_stays_in_place() {
        let (kv, flat) = seeded("[]").await;
        let target = InMemoryBackend::new(BackendKind::Indexed);

        let report = migrate(&flat, &target).await;

        assert!(report.is_noop());
        assert_eq!(target.calls("import"), 0);
        assert_eq!(kv.get_item(TODOS_KEY).await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn unparseable_blob_stays_in_place() {
        let (kv, flat) = seeded("not json at all").await;
        let target = InMemoryBackend::new(BackendKind::Indexed);

        let report = migrate(&flat, &target).await;
        assert!(report.is_noop());
        assert_eq!(
            kv.get_item(TODOS_KEY).await.unwrap().as_deref(),
            Some("not json at all")
        );
    }

    #[tokio::test]
    async fn conflicting_ids_fail_and_blob_is_still_removed() {
        let (kv, flat) = seeded(r#"[{"id":1,"text":"taken"},{"id":2,"text":"free"}]"#).await;
        let target = InMemoryBackend::new(BackendKind::Indexed);
        target.insert(NewTodo::parse("already here").unwrap()).await.unwrap();

        let report = migrate(&flat, &target).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 1);
        assert!(report.source_removed);
        assert_eq!(target.records()[0].text, "already here");
        assert!(target.records().iter().any(|r| r.id == TodoId::new(2)));
        assert!(kv.get_item(TODOS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newer_mirrored_state_wins_over_the_indexed_copy() {
        let (_kv, flat) = seeded(
            r#"[{"id":1,"text":"a","completed":true,"updatedAt":"2025-01-02T00:00:00Z"},
                {"id":2,"text":"b","completed":false,"updatedAt":"2025-01-01T00:00:00Z"}]"#,
        )
        .await;
        let target = InMemoryBackend::new(BackendKind::Indexed).with_records([
            stored(1, "a", false, "2025-01-01T00:00:00Z"),
            stored(2, "b", true, "2025-01-03T00:00:00Z"),
        ]);

        let report = migrate(&flat, &target).await;

        assert_eq!((report.updated, report.skipped, report.failed), (1, 1, 0));
        assert_eq!(report.changed(), 1);
        let completed: Vec<_> = target.records().iter().map(|r| r.completed).collect();
        assert_eq!(completed, vec![true, true]);
        assert_eq!(target.calls("update"), 1);
    }

    /// Target whose imports rewrite the flat blob, as a repository fallback
    /// mirroring mid-migration would.
    struct MirroringTarget {
        inner: InMemoryBackend,
        flat: Arc<FlatBackend>,
        fired: Mutex<bool>,
    }

    impl TodoBackend for MirroringTarget {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        fn insert(&self, todo: NewTodo) -> BackendFuture<'_, TodoRecord> {
            self.inner.insert(todo)
        }

        fn import(&self, todo: ImportedTodo) -> BackendFuture<'_, TodoRecord> {
            Box::pin(async move {
                let record = self.inner.import(todo).await?;
                let already_fired = std::mem::replace(&mut *self.fired.lock().unwrap(), true);
                if !already_fired {
                    let stranded = TodoRecord::new(
                        TodoId::new(1_735_689_600_000),
                        NewTodo::parse("stranded").unwrap(),
                        test_clock().now(),
                    );
                    self.flat.replace_all(&[record.clone(), stranded]).await?;
                }
                Ok(record)
            })
        }

        fn list_all(&self) -> BackendFuture<'_, Vec<TodoRecord>> {
            self.inner.list_all()
        }

        fn get(&self, id: TodoId) -> BackendFuture<'_, Option<TodoRecord>> {
            self.inner.get(id)
        }

        fn update(&self, record: TodoRecord) -> BackendFuture<'_, TodoRecord> {
            self.inner.update(record)
        }

        fn remove(&self, id: TodoId) -> BackendFuture<'_, ()> {
            self.inner.remove(id)
        }

        fn clear(&self) -> BackendFuture<'_, ()> {
            self.inner.clear()
        }
    }

    #[tokio::test]
    async fn blob_rewritten_during_migration_is_kept() {
        let (kv, flat) = seeded(r#"[{"id":1,"text":"a"}]"#).await;
        let flat = Arc::new(flat);
        let target = MirroringTarget {
            inner: InMemoryBackend::new(BackendKind::Indexed),
            flat: Arc::clone(&flat),
            fired: Mutex::new(false),
        };

        let report = migrate(&flat, &target).await;

        assert_eq!(report.migrated, 1);
        assert!(!report.source_removed);
        let blob = kv.get_item(TODOS_KEY).await.unwrap().unwrap();
        assert!(blob.contains("stranded"));

        // The next run picks the stranded record up and clears the blob
        let again = migrate(&flat, &target.inner).await;
        assert_eq!((again.migrated, again.skipped), (1, 1));
        assert!(again.source_removed);
        assert_eq!(target.inner.records().len(), 2);
    }

    #[tokio::test]
    async fn spawned_migration_reports_through_the_handle() {
        let (_kv, flat) = seeded(r#"[{"text":"no id"}]"#).await;
        let target = InMemoryBackend::new(BackendKind::Indexed);

        let report = spawn_migration(Arc::new(flat), Arc::new(target.clone()))
            .await
            .unwrap();

        assert_eq!(report.migrated, 1);
        assert_eq!(target.records()[0].text, "no id");
    }
}
