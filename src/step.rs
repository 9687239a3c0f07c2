//! Step trait and error types.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::request::RequestError;

/// Error returned by a step execution.
#[derive(Error, Debug)]
pub enum StepError {
    /// Arbitrary failure raised by the step.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// A single fetch made by the step failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The step did not finish before its deadline.
    #[error("step '{step}' timed out after {after:?}")]
    TimedOut { step: String, after: Duration },
}

impl StepError {
    /// Wrap any error.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self::Failed(err.into())
    }

    /// Create an error from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::msg(message))
    }
}

/// One unit of work within a task.
///
/// A step receives the results of every previously executed step of the
/// same task, in execution order, and produces its own result.
#[async_trait]
pub trait Step<T: Send + Sync>: Send + Sync {
    /// The name of this step for logging.
    fn name(&self) -> &str;

    /// Execute the step against the results accumulated so far.
    async fn execute(&self, previous: &[T]) -> Result<T, StepError>;
}

/// A type-erased step, as returned by task builders.
pub type BoxedStep<T> = Box<dyn Step<T>>;

/// Step backed by an async closure over an owned copy of prior results.
pub struct FnStep<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<T, F, Fut> Step<T> for FnStep<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, StepError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, previous: &[T]) -> Result<T, StepError> {
        (self.f)(previous.to_vec()).await
    }
}

/// Step backed by a synchronous closure.
pub struct SyncFnStep<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<T, F> Step<T> for SyncFnStep<F>
where
    T: Send + Sync,
    F: Fn(&[T]) -> Result<T, StepError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, previous: &[T]) -> Result<T, StepError> {
        (self.f)(previous)
    }
}

/// Box an async closure as a step.
pub fn step_fn<T, F, Fut>(name: impl Into<String>, f: F) -> BoxedStep<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StepError>> + Send + 'static,
{
    Box::new(FnStep {
        name: name.into(),
        f,
    })
}

/// Box a synchronous closure as a step.
pub fn sync_step_fn<T, F>(name: impl Into<String>, f: F) -> BoxedStep<T>
where
    T: Send + Sync + 'static,
    F: Fn(&[T]) -> Result<T, StepError> + Send + Sync + 'static,
{
    Box::new(SyncFnStep {
        name: name.into(),
        f,
    })
}

/// Wraps a step with a deadline.
pub struct Timeout<T: Send + Sync> {
    inner: BoxedStep<T>,
    after: Duration,
}

impl<T: Send + Sync> Timeout<T> {
    pub fn new(inner: BoxedStep<T>, after: Duration) -> Self {
        Self { inner, after }
    }
}

#[async_trait]
impl<T: Send + Sync> Step<T> for Timeout<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(&self, previous: &[T]) -> Result<T, StepError> {
        match tokio::time::timeout(self.after, self.inner.execute(previous)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StepError::TimedOut {
                step: self.inner.name().to_string(),
                after: self.after,
            }),
        }
    }
}

/// Box `step` behind a [`Timeout`].
pub fn with_timeout<T>(step: BoxedStep<T>, after: Duration) -> BoxedStep<T>
where
    T: Send + Sync + 'static,
{
    Box::new(Timeout::new(step, after))
}
