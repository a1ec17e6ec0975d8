//! Reducer logic for the todo list.
//!
//! Intents are validated here and turned into effects that call the
//! repository; the repository's snapshot comes back as
//! [`TodoAction::TodosRefreshed`]. Search input is debounced with a
//! generation counter: every keystroke schedules a delayed
//! [`TodoAction::SearchSettled`], and only the one carrying the current
//! generation applies its query.

use crate::types::{TodoAction, TodoState};
use std::sync::Arc;
use std::time::Duration;
use tickoff_core::record::{NewTodo, TodoId};
use tickoff_core::{SmallVec, async_effect, delay, effect::Effect, reducer::Reducer, smallvec};
use tickoff_storage::TodoRepository;

/// Quiet period before a search query applies
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Environment dependencies for the todo reducer
#[derive(Clone)]
pub struct TodoEnvironment {
    /// Storage for every todo operation
    pub repository: Arc<TodoRepository>,
    /// Search quiet period
    pub debounce: Duration,
}

impl TodoEnvironment {
    /// Creates a new `TodoEnvironment` with the default debounce
    #[must_use]
    pub fn new(repository: Arc<TodoRepository>) -> Self {
        Self {
            repository,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Override the search quiet period
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Reducer for the todo list
#[derive(Clone, Debug, Default)]
pub struct TodoReducer;

impl TodoReducer {
    /// Creates a new `TodoReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Claim `id` for a toggle or delete; false if one is already running
    fn claim(state: &mut TodoState, action: &'static str, id: TodoId) -> bool {
        if state.get(id).is_none() {
            tracing::debug!(%id, action, "Ignoring intent for unknown todo");
            return false;
        }
        if !state.in_flight.insert(id) {
            tracing::debug!(%id, action, "Dropping intent, previous change still in flight");
            return false;
        }
        true
    }
}

impl Reducer for TodoReducer {
    type State = TodoState;
    type Action = TodoAction;
    type Environment = TodoEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Intents ==========
            TodoAction::Load => {
                let repository = Arc::clone(&env.repository);
                smallvec![async_effect! {
                    let todos = repository.all().await;
                    Some(TodoAction::TodosRefreshed { todos, settled: None })
                }]
            }

            TodoAction::AddTodo { text } => {
                if NewTodo::parse(&text).is_none() {
                    tracing::debug!("Ignoring blank todo");
                    return SmallVec::new();
                }

                let repository = Arc::clone(&env.repository);
                smallvec![async_effect! {
                    match repository.add(&text).await {
                        Ok(todos) => Some(TodoAction::TodosRefreshed { todos, settled: None }),
                        Err(error) => {
                            tracing::debug!(%error, "Todo rejected");
                            None
                        }
                    }
                }]
            }

            TodoAction::ToggleTodo { id } => {
                if !Self::claim(state, "toggle", id) {
                    return SmallVec::new();
                }

                let repository = Arc::clone(&env.repository);
                smallvec![async_effect! {
                    let todos = repository.toggle(id).await;
                    Some(TodoAction::TodosRefreshed { todos, settled: Some(id) })
                }]
            }

            TodoAction::DeleteTodo { id } => {
                if !Self::claim(state, "delete", id) {
                    return SmallVec::new();
                }

                let repository = Arc::clone(&env.repository);
                smallvec![async_effect! {
                    let todos = repository.delete(id).await;
                    Some(TodoAction::TodosRefreshed { todos, settled: Some(id) })
                }]
            }

            TodoAction::SearchInput { query } => {
                state.pending_query = query;
                state.search_generation += 1;

                smallvec![delay! {
                    duration: env.debounce,
                    action: TodoAction::SearchSettled { generation: state.search_generation }
                }]
            }

            TodoAction::ClearSearch => {
                // Outstanding timers become stale
                state.search_generation += 1;
                state.pending_query.clear();
                state.query.clear();
                SmallVec::new()
            }

            // ========== Settled ==========
            TodoAction::TodosRefreshed { todos, settled } => {
                state.todos = todos;
                state.loaded = true;
                if let Some(id) = settled {
                    state.in_flight.remove(&id);
                }
                SmallVec::new()
            }

            TodoAction::SearchSettled { generation } => {
                if generation == state.search_generation {
                    state.query = state.pending_query.trim().to_owned();
                    tracing::debug!(query = %state.query, "Search applied");
                } else {
                    tracing::trace!(generation, current = state.search_generation, "Stale search timer");
                }
                SmallVec::new()
            }
        }
    }
}
