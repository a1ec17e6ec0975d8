//! Wiring between user intents, the store, and the view.
//!
//! The [`Controller`] owns the runtime store. Attaching a view spawns a
//! render loop that redraws after every state revision the store publishes;
//! bursts of revisions coalesce into one redraw.

use crate::reducer::{TodoEnvironment, TodoReducer};
use crate::types::{TodoAction, TodoState};
use crate::view::{TodoView, ViewModel, project};
use std::sync::Arc;
use std::time::Duration;
use tickoff_runtime::Store;
use tickoff_runtime::error::StoreError;
use tickoff_storage::TodoRepository;
use tokio::task::JoinHandle;

/// The store type driving the todo list
pub type TodoStore = Store<TodoState, TodoAction, TodoEnvironment, TodoReducer>;

/// Owns the store and the render loop
pub struct Controller {
    store: TodoStore,
    render_loop: Option<JoinHandle<()>>,
}

impl Controller {
    /// Build a controller over `repository` with the given search quiet period
    #[must_use]
    pub fn new(repository: Arc<TodoRepository>, debounce: Duration) -> Self {
        let state = TodoState::new(repository.backend_kind());
        let env = TodoEnvironment::new(repository).with_debounce(debounce);
        Self {
            store: Store::new(state, TodoReducer::new(), env),
            render_loop: None,
        }
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &TodoStore {
        &self.store
    }

    /// Draw into `view` now and after every state change.
    ///
    /// Replaces any previously attached view.
    pub fn attach<V: TodoView + 'static>(&mut self, mut view: V) {
        let store = self.store.clone();
        let mut revisions = store.subscribe_revisions();

        if let Some(previous) = self.render_loop.take() {
            previous.abort();
        }
        self.render_loop = Some(tokio::spawn(async move {
            loop {
                revisions.borrow_and_update();
                let model = store.state(project).await;
                if let Err(error) = view.render(&model) {
                    tracing::warn!(%error, "Render failed");
                }
                if revisions.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Send `action` and wait until the work it started has settled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`Controller::shutdown`].
    pub async fn dispatch(&self, action: TodoAction) -> Result<(), StoreError> {
        let mut handle = self.store.send(action).await?;
        handle.wait().await;
        Ok(())
    }

    /// Load the list from storage
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`Controller::shutdown`].
    pub async fn load(&self) -> Result<(), StoreError> {
        self.dispatch(TodoAction::Load).await
    }

    /// Current view model
    pub async fn view_model(&self) -> ViewModel {
        self.store.state(project).await
    }

    /// Stop accepting intents and wait for running effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects outlive the store's
    /// shutdown timeout.
    pub async fn shutdown(mut self) -> Result<(), StoreError> {
        let result = self.store.shutdown_default().await;
        if let Some(render_loop) = self.render_loop.take() {
            render_loop.abort();
        }
        result
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(render_loop) = self.render_loop.take() {
            render_loop.abort();
        }
    }
}
