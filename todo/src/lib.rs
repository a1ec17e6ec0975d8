//! Local todo list built on the tickoff store.
//!
//! The list lives in whichever backend [`tickoff_storage::open_session`]
//! selects. This crate holds everything above storage:
//!
//! - [`types`]: state and actions
//! - [`reducer`]: intents to repository effects, debounced search
//! - [`filter`]: case-insensitive text search
//! - [`view`]: view model projection and the terminal renderer
//! - [`controller`]: store ownership and the render loop
//! - [`repl`]: line commands for the `tickoff` binary
//! - [`config`]: session configuration
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tickoff_core::environment::SystemClock;
//! use tickoff_storage::{StorageOptions, open_session};
//! use tickoff_todo::{Controller, DEFAULT_DEBOUNCE, TodoAction};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = open_session(StorageOptions::default(), Arc::new(SystemClock)).await;
//! let controller = Controller::new(session.repository, DEFAULT_DEBOUNCE);
//! controller.load().await?;
//!
//! controller
//!     .dispatch(TodoAction::AddTodo { text: "Buy milk".to_string() })
//!     .await?;
//!
//! let model = controller.view_model().await;
//! println!("{} todos, {}", model.total, model.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod filter;
pub mod reducer;
pub mod repl;
pub mod types;
pub mod view;

pub use config::{ConfigError, TodoConfig};
pub use controller::{Controller, TodoStore};
pub use filter::filter;
pub use reducer::{DEFAULT_DEBOUNCE, TodoEnvironment, TodoReducer};
pub use repl::{Command, CommandError};
pub use types::{TodoAction, TodoState};
pub use view::{EmptyState, TerminalView, TodoView, ViewModel, project};
