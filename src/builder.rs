//! The contract between a task runner and the code that plans its steps.

use thiserror::Error;

use crate::notification::Dispatcher;
use crate::step::BoxedStep;

/// Error returned when a builder cannot produce its steps.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct BuildError(#[from] anyhow::Error);

impl BuildError {
    /// Wrap any error.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(err.into())
    }

    /// Create an error from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self(anyhow::Error::msg(message))
    }
}

/// Produces the ordered steps of a task from its invocation arguments.
///
/// The dispatcher is the same sink the runner reports to. Builders may move
/// it into their steps to dispatch their own notifications (single fetches,
/// progress) alongside the runner's LOADING and terminal notifications.
///
/// Returning an empty list is legal: the task succeeds immediately.
pub trait TaskBuilder<A, T: Send + Sync>: Send + Sync {
    fn build(&self, args: A, dispatch: Dispatcher) -> Result<Vec<BoxedStep<T>>, BuildError>;
}

impl<A, T, F> TaskBuilder<A, T> for F
where
    T: Send + Sync,
    F: Fn(A, Dispatcher) -> Result<Vec<BoxedStep<T>>, BuildError> + Send + Sync,
{
    fn build(&self, args: A, dispatch: Dispatcher) -> Result<Vec<BoxedStep<T>>, BuildError> {
        self(args, dispatch)
    }
}
