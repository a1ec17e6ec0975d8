//! View model and renderers.
//!
//! [`project`] turns the state into a [`ViewModel`]; a [`TodoView`] draws it.
//! Every draw replaces the whole list, there is no incremental patching.

use crate::types::TodoState;
use std::io::{self, Write};
use tickoff_core::record::TodoId;

/// Version shown in the status line
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One displayed todo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TodoRow {
    /// 1-based position in the displayed list
    pub position: usize,
    /// Record id, for dispatching intents
    pub id: TodoId,
    /// Item text
    pub text: String,
    /// Whether the item is completed
    pub completed: bool,
}

/// What to show instead of an empty list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmptyState {
    /// There are no todos at all
    NoTodos,
    /// Todos exist but none match the query
    NoMatches {
        /// The applied query
        query: String,
    },
}

impl EmptyState {
    /// Message shown to the user
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NoTodos => "No todos yet. Add one above!".to_owned(),
            Self::NoMatches { query } => format!("No todos matching \"{query}\""),
        }
    }
}

/// Everything a view needs to draw the list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewModel {
    /// Displayed rows, filtered by the applied query
    pub rows: Vec<TodoRow>,
    /// Set when `rows` is empty
    pub empty: Option<EmptyState>,
    /// The applied query, empty when not searching
    pub query: String,
    /// Completed todos out of all todos, ignoring the query
    pub completed: usize,
    /// All todos, ignoring the query
    pub total: usize,
    /// Footer naming the version and active backend
    pub status: String,
}

impl ViewModel {
    /// Id of the row at a 1-based position
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<TodoId> {
        self.rows
            .iter()
            .find(|row| row.position == position)
            .map(|row| row.id)
    }
}

/// Project the state into a view model
#[must_use]
pub fn project(state: &TodoState) -> ViewModel {
    let rows: Vec<TodoRow> = state
        .visible()
        .into_iter()
        .enumerate()
        .map(|(index, record)| TodoRow {
            position: index + 1,
            id: record.id,
            text: record.text.clone(),
            completed: record.completed,
        })
        .collect();

    let empty = if state.todos.is_empty() {
        Some(EmptyState::NoTodos)
    } else if rows.is_empty() {
        Some(EmptyState::NoMatches {
            query: state.query.clone(),
        })
    } else {
        None
    };

    ViewModel {
        rows,
        empty,
        query: state.query.clone(),
        completed: state.completed_count(),
        total: state.count(),
        status: format!("Version {APP_VERSION} ({})", state.backend.label()),
    }
}

/// Something that can draw the todo list
pub trait TodoView: Send {
    /// Replace whatever is displayed with `model`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if drawing fails.
    fn render(&mut self, model: &ViewModel) -> io::Result<()>;
}

/// Line-oriented view writing to any `io::Write`
pub struct TerminalView<W> {
    out: W,
}

impl<W: Write + Send> TerminalView<W> {
    /// Draw into `out`
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TodoView for TerminalView<W> {
    fn render(&mut self, model: &ViewModel) -> io::Result<()> {
        writeln!(self.out)?;
        if !model.query.is_empty() {
            writeln!(self.out, "Search: {}", model.query)?;
        }
        for row in &model.rows {
            let mark = if row.completed { "x" } else { " " };
            writeln!(self.out, "{:>3}. [{mark}] {}", row.position, row.text)?;
        }
        if let Some(empty) = &model.empty {
            writeln!(self.out, "{}", empty.message())?;
        }
        writeln!(
            self.out,
            "-- {}/{} done | {}",
            model.completed, model.total, model.status
        )?;
        self.out.flush()
    }
}
