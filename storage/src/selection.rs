//! Backend selection at session start.
//!
//! Strategies are tried in a fixed order and the first that opens serves the
//! whole session:
//!
//! 1. [`Strategy::Indexed`], when a database location is configured
//! 2. [`Strategy::Flat`], when a key-value storage is configured and usable
//! 3. [`Strategy::Memory`], which always succeeds
//!
//! The flat store is opened up front whatever wins, because it doubles as the
//! migration source and the fallback mirror when the indexed store is active.

use std::fmt;
use std::sync::Arc;
use tickoff_core::environment::Clock;
use tickoff_core::storage::{BackendKind, StorageError, TodoBackend};
use tokio::task::JoinHandle;

use crate::flat::{FlatBackend, KeyValueStorage};
use crate::indexed::{DatabaseLocation, IndexedBackend};
use crate::migration::{MigrationReport, spawn_migration};
use crate::repository::TodoRepository;

/// A way of storing todos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `SQLite` database, one row per record
    Indexed,
    /// JSON blob in key-value storage
    Flat,
    /// Nothing durable
    Memory,
}

impl Strategy {
    /// Strategies in preference order
    pub const PREFERENCE: [Self; 3] = [Self::Indexed, Self::Flat, Self::Memory];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Indexed => BackendKind::Indexed,
            Self::Flat => BackendKind::Flat,
            Self::Memory => BackendKind::Memory,
        };
        write!(f, "{kind}")
    }
}

/// What storage is available to the session
#[derive(Clone, Default)]
pub struct StorageOptions {
    /// Database for the indexed strategy; `None` disables it
    pub database: Option<DatabaseLocation>,
    /// Key-value storage for the flat strategy; `None` disables it
    pub flat: Option<Arc<dyn KeyValueStorage>>,
}

/// Result of opening storage for a session
pub struct StorageSession {
    /// Repository over the selected backend
    pub repository: Arc<TodoRepository>,
    /// Background flat-to-indexed migration, when one was started
    pub migration: Option<JoinHandle<MigrationReport>>,
}

impl StorageSession {
    /// Which backend serves the session
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.repository.backend_kind()
    }
}

async fn open_strategy(
    strategy: Strategy,
    options: &StorageOptions,
    flat: &Result<Arc<FlatBackend>, StorageError>,
    clock: &Arc<dyn Clock>,
) -> Result<Option<Arc<dyn TodoBackend>>, StorageError> {
    match strategy {
        Strategy::Indexed => {
            let location = options.database.as_ref().ok_or_else(|| {
                StorageError::Unavailable(BackendKind::Indexed, "no database configured".into())
            })?;
            let backend = IndexedBackend::open(location, Arc::clone(clock)).await?;
            Ok(Some(Arc::new(backend)))
        }
        Strategy::Flat => match flat {
            Ok(flat) => Ok(Some(Arc::clone(flat) as Arc<dyn TodoBackend>)),
            Err(error) => Err(error.clone()),
        },
        Strategy::Memory => Ok(None),
    }
}

/// Open storage, pick a backend, and start the migration if it applies.
///
/// Never fails: when nothing durable opens the session runs memory-only.
pub async fn open_session(options: StorageOptions, clock: Arc<dyn Clock>) -> StorageSession {
    let flat = match &options.flat {
        Some(storage) => FlatBackend::open(Arc::clone(storage), Arc::clone(&clock))
            .await
            .map(Arc::new),
        None => Err(StorageError::Unavailable(
            BackendKind::Flat,
            "no key-value storage configured".into(),
        )),
    };

    let mut selected = None;
    for strategy in Strategy::PREFERENCE {
        match open_strategy(strategy, &options, &flat, &clock).await {
            Ok(backend) => {
                selected = backend;
                break;
            }
            Err(error) => {
                tracing::warn!(%strategy, %error, "Storage strategy unavailable, trying the next one");
            }
        }
    }

    let kind = selected.as_ref().map_or(BackendKind::Memory, |b| b.kind());
    tracing::info!(backend = %kind, "Storage backend selected");
    metrics::counter!("storage.backend.selected", "kind" => kind.to_string()).increment(1);

    let (mirror, migration) = match (&selected, flat) {
        (Some(backend), Ok(flat)) if kind == BackendKind::Indexed => {
            let handle = spawn_migration(Arc::clone(&flat), Arc::clone(backend));
            (Some(flat), Some(handle))
        }
        _ => (None, None),
    };

    StorageSession {
        repository: Arc::new(TodoRepository::new(selected, mirror, clock)),
        migration,
    }
}
