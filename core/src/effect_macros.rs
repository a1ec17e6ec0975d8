//! Declarative macros for ergonomic effect construction.

/// Create an `Effect::Future` from an async block body
///
/// The body must evaluate to `Option<Action>`; `Some` is fed back into the
/// reducer once the future completes.
///
/// # Example
///
/// ```rust,ignore
/// use tickoff_core::async_effect;
///
/// async_effect! {
///     let todos = repository.all().await;
///     Some(TodoAction::TodosLoaded { todos })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use tickoff_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_millis(300),
///     action: TodoAction::SearchSettled { generation: 4 }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
