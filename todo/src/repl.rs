//! Line commands for the terminal front end.
//!
//! Rows are addressed by the 1-based position shown next to them, which
//! depends on the applied search; [`Command::into_action`] resolves the
//! position against the view model the user is looking at.

use crate::types::TodoAction;
use crate::view::ViewModel;
use thiserror::Error;

/// Help text printed by `help`
pub const HELP: &str = "\
Commands:
  add <text>      add a todo (a line without a command also adds)
  toggle <n>      flip todo n between done and open
  delete <n>      remove todo n
  search <query>  show only todos containing the query
  clear           stop searching
  list            redraw the list
  help            show this help
  quit            leave";

/// Errors from parsing or resolving a command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A command that needs an argument got none
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    /// The row argument is not a positive number
    #[error("`{0}` is not a row number")]
    InvalidPosition(String),

    /// No row is displayed at that position
    #[error("no todo at row {0}")]
    NoSuchRow(usize),
}

/// A parsed command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create a todo
    Add(String),
    /// Toggle the row at a position
    Toggle(usize),
    /// Delete the row at a position
    Delete(usize),
    /// Set the search query
    Search(String),
    /// Clear the search query
    Clear,
    /// Redraw
    List,
    /// Print [`HELP`]
    Help,
    /// Exit the session
    Quit,
}

impl Command {
    /// Parse one input line.
    ///
    /// Returns `Ok(None)` for a blank line. Unknown leading words are
    /// treated as todo text.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when an argument is missing or malformed.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_lowercase().as_str() {
            "add" | "a" => Self::Add(required("add", rest)?.to_owned()),
            "toggle" | "t" | "done" => Self::Toggle(position(required("toggle", rest)?)?),
            "delete" | "del" | "rm" => Self::Delete(position(required("delete", rest)?)?),
            "search" | "s" | "/" => Self::Search(rest.to_owned()),
            "clear" => Self::Clear,
            "list" | "ls" => Self::List,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Add(line.to_owned()),
        };
        Ok(Some(command))
    }

    /// The store action for this command, if any.
    ///
    /// `Search` with an empty query clears the search immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NoSuchRow`] if a position is not on screen.
    pub fn into_action(self, model: &ViewModel) -> Result<Option<TodoAction>, CommandError> {
        let action = match self {
            Self::Add(text) => Some(TodoAction::AddTodo { text }),
            Self::Toggle(n) => Some(TodoAction::ToggleTodo {
                id: model.id_at(n).ok_or(CommandError::NoSuchRow(n))?,
            }),
            Self::Delete(n) => Some(TodoAction::DeleteTodo {
                id: model.id_at(n).ok_or(CommandError::NoSuchRow(n))?,
            }),
            Self::Search(query) if query.trim().is_empty() => Some(TodoAction::ClearSearch),
            Self::Search(query) => Some(TodoAction::SearchInput { query }),
            Self::Clear => Some(TodoAction::ClearSearch),
            Self::List | Self::Help | Self::Quit => None,
        };
        Ok(action)
    }
}

fn required<'a>(command: &'static str, rest: &'a str) -> Result<&'a str, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgument(command))
    } else {
        Ok(rest)
    }
}

fn position(arg: &str) -> Result<usize, CommandError> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CommandError::InvalidPosition(arg.to_owned())),
    }
}
