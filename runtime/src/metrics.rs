//! Metric descriptions for the runtime and the storage layer.
//!
//! Metrics are recorded through the `metrics` facade. Nothing is exported
//! unless the host process installs a recorder; call [`register_metrics`]
//! once after installing one so the descriptions are attached.
//!
//! # Recorded metrics
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `store.actions.total` | counter | |
//! | `store.reducer.duration_seconds` | histogram | |
//! | `store.effects.executed` | counter | `type` |
//! | `store.shutdown.rejected_actions` | counter | |
//! | `storage.fallback.total` | counter | `operation` |
//! | `storage.migration.records` | counter | `outcome` |
//! | `storage.backend.selected` | counter | `kind` |

use metrics::{describe_counter, describe_histogram};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Register all metric descriptions with the installed recorder.
pub fn register_metrics() {
    // Store
    describe_counter!(
        "store.actions.total",
        "Total number of actions processed by the store"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent inside the reducer per action"
    );
    describe_counter!(
        "store.effects.executed",
        "Effects executed, labelled by effect type"
    );
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );

    // Storage
    describe_counter!(
        "storage.fallback.total",
        "Operations that fell back to the in-memory cache and flat mirror"
    );
    describe_counter!(
        "storage.migration.records",
        "Records processed by the flat-to-indexed migration, labelled by outcome"
    );
    describe_counter!(
        "storage.backend.selected",
        "Backend chosen at startup, labelled by kind"
    );
}
