//! State and actions for the todo list.
//!
//! The state is a read-through cache of the repository: the reducer never
//! edits `todos` itself, it replaces the list with whatever snapshot the
//! repository returned after an operation settled.

use crate::filter::filter_refs;
use std::collections::HashSet;
use tickoff_core::record::{TodoId, TodoRecord};
use tickoff_core::storage::BackendKind;

/// State of the todo list screen
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TodoState {
    /// Every record, in id order, as last reported by the repository
    pub todos: Vec<TodoRecord>,
    /// The search query currently applied to the list
    pub query: String,
    /// The latest search input, applied once typing pauses
    pub pending_query: String,
    /// Bumped on every search input; only the newest settles
    pub search_generation: u64,
    /// Records with a toggle or delete in flight
    pub in_flight: HashSet<TodoId>,
    /// Backend serving the session
    pub backend: BackendKind,
    /// Whether the first load has settled
    pub loaded: bool,
}

impl TodoState {
    /// Empty state for a session served by `backend`
    #[must_use]
    pub fn new(backend: BackendKind) -> Self {
        Self {
            todos: Vec::new(),
            query: String::new(),
            pending_query: String::new(),
            search_generation: 0,
            in_flight: HashSet::new(),
            backend,
            loaded: false,
        }
    }

    /// Records matching the applied query
    #[must_use]
    pub fn visible(&self) -> Vec<&TodoRecord> {
        filter_refs(&self.query, &self.todos)
    }

    /// Returns the number of todos
    #[must_use]
    pub fn count(&self) -> usize {
        self.todos.len()
    }

    /// Returns the number of completed todos
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.todos.iter().filter(|t| t.completed).count()
    }

    /// Returns a todo by id
    #[must_use]
    pub fn get(&self, id: TodoId) -> Option<&TodoRecord> {
        self.todos.iter().find(|t| t.id == id)
    }
}

/// Everything the todo reducer reacts to
///
/// Intents come from the user; the last two variants are fed back by
/// effects once async work settles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TodoAction {
    // ========== Intents ==========
    /// Read every record from the repository
    Load,

    /// Create a todo from raw input
    AddTodo {
        /// Text as typed, trimmed before storing
        text: String,
    },

    /// Flip a todo's completion
    ToggleTodo {
        /// Todo to toggle
        id: TodoId,
    },

    /// Remove a todo
    DeleteTodo {
        /// Todo to delete
        id: TodoId,
    },

    /// A keystroke in the search box
    SearchInput {
        /// Full contents of the search box
        query: String,
    },

    /// Empty the search box and show everything at once
    ClearSearch,

    // ========== Settled ==========
    /// The repository finished an operation
    TodosRefreshed {
        /// Snapshot of every record after the operation
        todos: Vec<TodoRecord>,
        /// Record whose toggle or delete just finished
        settled: Option<TodoId>,
    },

    /// The search quiet period elapsed
    SearchSettled {
        /// Generation the timer was started for
        generation: u64,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tickoff_core::environment::Clock;
    use tickoff_core::record::NewTodo;
    use tickoff_testing::test_clock;

    fn state_with(texts: &[&str]) -> TodoState {
        let now = test_clock().now();
        let mut state = TodoState::new(BackendKind::Indexed);
        state.todos = texts
            .iter()
            .zip(1..)
            .map(|(text, id)| TodoRecord::new(TodoId::new(id), NewTodo::parse(text).unwrap(), now))
            .collect();
        state
    }

    #[test]
    fn visible_applies_the_settled_query_only() {
        let mut state = state_with(&["Buy milk", "Walk dog"]);
        state.pending_query = "dog".into();
        assert_eq!(state.visible().len(), 2);

        state.query = "dog".into();
        assert_eq!(state.visible()[0].text, "Walk dog");
    }

    #[test]
    fn counts() {
        let mut state = state_with(&["a", "b", "c"]);
        state.todos[1].completed = true;
        assert_eq!(state.count(), 3);
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.get(TodoId::new(2)).unwrap().text, "b");
        assert!(state.get(TodoId::new(9)).is_none());
    }
}
