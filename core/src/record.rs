//! The todo record model.
//!
//! A [`TodoRecord`] is a single todo item as stored durably. Records are
//! serialized with camelCase field names and RFC 3339 timestamps, which is the
//! layout of the flat blob written by earlier versions of the app.
//!
//! Records read back from the flat blob may predate some fields. They are
//! decoded leniently through [`StoredRecord`] and turned into an
//! [`ImportedTodo`] with the missing timestamps backfilled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a todo record, assigned by the backend on creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoId(i64);

impl TodoId {
    /// Creates a `TodoId` from its raw value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single todo item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoRecord {
    /// Unique identifier, immutable once assigned
    pub id: TodoId,
    /// Trimmed, non-empty text
    pub text: String,
    /// Whether the todo is completed
    pub completed: bool,
    /// When the todo was created
    pub created_at: DateTime<Utc>,
    /// When the todo was last mutated
    pub updated_at: DateTime<Utc>,
}

impl TodoRecord {
    /// Creates a fresh, uncompleted record
    #[must_use]
    pub fn new(id: TodoId, todo: NewTodo, now: DateTime<Utc>) -> Self {
        Self {
            id,
            text: todo.text,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy with `completed` flipped and `updated_at` advanced
    ///
    /// `updated_at` never moves backwards, even if `now` is older than the
    /// last recorded mutation.
    #[must_use]
    pub fn toggled(&self, now: DateTime<Utc>) -> Self {
        Self {
            completed: !self.completed,
            updated_at: self.updated_at.max(now),
            ..self.clone()
        }
    }
}

/// Validated input for creating a todo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTodo {
    text: String,
}

impl NewTodo {
    /// Trims the raw input; returns `None` when nothing is left
    ///
    /// ```
    /// use tickoff_core::record::NewTodo;
    ///
    /// assert_eq!(NewTodo::parse("  Buy milk ").map(|t| t.text().to_owned()), Some("Buy milk".into()));
    /// assert!(NewTodo::parse("   ").is_none());
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            None
        } else {
            Some(Self {
                text: text.to_owned(),
            })
        }
    }

    /// The trimmed text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A record as found in the flat blob, before backfilling
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Identifier, absent for records that never got one
    #[serde(default)]
    pub id: Option<TodoId>,
    /// Item text
    pub text: String,
    /// Completion flag, `false` when absent
    #[serde(default)]
    pub completed: bool,
    /// Creation time, absent in blobs written by the earliest versions
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last mutation time, absent in blobs written by the earliest versions
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    /// Backfills missing timestamps with `now`
    #[must_use]
    pub fn backfill(self, now: DateTime<Utc>) -> ImportedTodo {
        let created_at = self.created_at.unwrap_or(now);
        ImportedTodo {
            id: self.id,
            text: self.text.trim().to_owned(),
            completed: self.completed,
            created_at,
            updated_at: self.updated_at.unwrap_or(now).max(created_at),
        }
    }
}

/// A complete record carried over from another backend
///
/// Unlike [`NewTodo`], it keeps its timestamps and, when it has one, its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedTodo {
    /// Identifier to keep if the target backend has it free
    pub id: Option<TodoId>,
    /// Item text
    pub text: String,
    /// Completion flag
    pub completed: bool,
    /// Original creation time
    pub created_at: DateTime<Utc>,
    /// Original last mutation time
    pub updated_at: DateTime<Utc>,
}

impl ImportedTodo {
    /// Materializes the record under the given id
    #[must_use]
    pub fn with_id(self, id: TodoId) -> TodoRecord {
        TodoRecord {
            id,
            text: self.text,
            completed: self.completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<TodoRecord> for ImportedTodo {
    fn from(record: TodoRecord) -> Self {
        Self {
            id: Some(record.id),
            text: record.text,
            completed: record.completed,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn parse_rejects_blank_input() {
        assert!(NewTodo::parse("").is_none());
        assert!(NewTodo::parse(" \t\n ").is_none());
        assert_eq!(NewTodo::parse(" a ").unwrap().text(), "a");
    }

    #[test]
    fn new_record_is_uncompleted() {
        let record = TodoRecord::new(TodoId::new(7), NewTodo::parse("Buy milk").unwrap(), at(10));
        assert!(!record.completed);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn toggled_is_an_involution_on_completed() {
        let record = TodoRecord::new(TodoId::new(1), NewTodo::parse("x").unwrap(), at(10));
        let twice = record.toggled(at(20)).toggled(at(30));
        assert_eq!(twice.completed, record.completed);
        assert_eq!(twice.updated_at, at(30));
    }

    #[test]
    fn toggled_never_moves_updated_at_backwards() {
        let record = TodoRecord::new(TodoId::new(1), NewTodo::parse("x").unwrap(), at(50));
        assert_eq!(record.toggled(at(5)).updated_at, at(50));
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = TodoRecord::new(TodoId::new(3), NewTodo::parse("a").unwrap(), at(0));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 3);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn stored_record_backfills_missing_fields() {
        let stored: StoredRecord = serde_json::from_str(r#"{"id":1,"text":"a"}"#).unwrap();
        let imported = stored.backfill(at(99));
        assert_eq!(imported.id, Some(TodoId::new(1)));
        assert!(!imported.completed);
        assert_eq!(imported.created_at, at(99));
        assert_eq!(imported.updated_at, at(99));
    }

    #[test]
    fn stored_record_keeps_existing_timestamps() {
        let stored: StoredRecord = serde_json::from_str(
            r#"{"text":"b","completed":true,"createdAt":"2024-03-01T10:00:00Z","updatedAt":"2024-03-02T10:00:00Z"}"#,
        )
        .unwrap();
        let imported = stored.backfill(at(0));
        assert_eq!(imported.id, None);
        assert!(imported.completed);
        assert_eq!(imported.created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(imported.updated_at.to_rfc3339(), "2024-03-02T10:00:00+00:00");
    }

    proptest::proptest! {
        #[test]
        fn parsed_text_is_trimmed_and_non_empty(raw in ".{0,40}") {
            if let Some(todo) = NewTodo::parse(&raw) {
                proptest::prop_assert!(!todo.text().is_empty());
                proptest::prop_assert_eq!(todo.text(), todo.text().trim());
            } else {
                proptest::prop_assert!(raw.trim().is_empty());
            }
        }
    }
}
