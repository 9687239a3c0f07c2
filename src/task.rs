//! Sequential task runner.
//!
//! A [`TaskRunner`] turns call-time arguments into a [`TaskThunk`]. Dispatching
//! the thunk assigns a fresh [`TaskId`], reports LOADING before returning, and
//! runs the builder's steps one after another on a detached tokio task. Each
//! invocation ends in exactly one SUCCESS or ERROR notification for its id.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::{BuildError, TaskBuilder};
use crate::notification::{Dispatch, Dispatcher, TaskNotification};
use crate::step::{with_timeout, BoxedStep, StepError};

/// Unique, time-ordered identifier for one task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Why a task ended in ERROR. The display text becomes the notification's
/// `error` field; the variant only feeds logging.
#[derive(Error, Debug)]
enum TaskFailure {
    #[error("{0:#}")]
    Build(BuildError),

    #[error("{source:#}")]
    Step {
        index: usize,
        name: String,
        source: StepError,
    },

    #[error("{0:#}")]
    Projection(StepError),

    #[error("no tokio runtime available to run task")]
    NoRuntime,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,
}

impl TaskFailure {
    fn kind(&self) -> &'static str {
        match self {
            Self::Build(_) => "build",
            Self::Step { .. } => "step",
            Self::Projection(_) => "projection",
            Self::NoRuntime => "runtime",
            Self::Panicked(_) => "panic",
            Self::Cancelled => "cancelled",
        }
    }
}

type Projection<T> = Arc<dyn Fn(&[T]) -> Result<Value, StepError> + Send + Sync>;

/// Runs the steps planned by a [`TaskBuilder`] and reports their lifecycle.
pub struct TaskRunner<A, T: Send + Sync> {
    name: &'static str,
    builder: Arc<dyn TaskBuilder<A, T>>,
    projection: Option<Projection<T>>,
    step_timeout: Option<Duration>,
    runtime: Option<Handle>,
}

impl<A, T: Send + Sync> Clone for TaskRunner<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            builder: self.builder.clone(),
            projection: self.projection.clone(),
            step_timeout: self.step_timeout,
            runtime: self.runtime.clone(),
        }
    }
}

impl<A, T> TaskRunner<A, T>
where
    A: 'static,
    T: Send + Sync + 'static,
{
    /// Create a runner around the given builder.
    pub fn new<B>(builder: B) -> Self
    where
        B: TaskBuilder<A, T> + 'static,
    {
        Self {
            name: "task",
            builder: Arc::new(builder),
            projection: None,
            step_timeout: None,
            runtime: None,
        }
    }

    /// Set the name used in logs.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Attach a projection of all step results to the SUCCESS notification.
    ///
    /// Without a projection, SUCCESS carries no `data`. A projection that
    /// fails, or whose output cannot be serialized, turns the task into an
    /// ERROR instead.
    pub fn with_projection<D, F>(mut self, project: F) -> Self
    where
        D: Serialize,
        F: Fn(&[T]) -> Result<D, StepError> + Send + Sync + 'static,
    {
        self.projection = Some(Arc::new(move |results: &[T]| {
            let data = project(results)?;
            serde_json::to_value(data).map_err(|e| {
                StepError::new(anyhow::Error::new(e).context("failed to serialize task result"))
            })
        }));
        self
    }

    /// Fail any step that runs longer than `after`.
    pub fn with_step_timeout(mut self, after: Duration) -> Self {
        self.step_timeout = Some(after);
        self
    }

    /// Spawn step execution on this runtime instead of the ambient one.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Get the runner name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bind call-time arguments, producing a thunk ready to dispatch.
    pub fn call(&self, args: A) -> TaskThunk<A, T> {
        TaskThunk {
            runner: self.clone(),
            args,
        }
    }

    /// Shorthand for `self.call(args).dispatch(dispatch)`.
    pub fn run(&self, args: A, dispatch: Dispatcher) -> TaskId {
        self.call(args).dispatch(dispatch)
    }
}

/// A task bound to its arguments, waiting for a dispatcher.
pub struct TaskThunk<A, T: Send + Sync> {
    runner: TaskRunner<A, T>,
    args: A,
}

impl<A, T> TaskThunk<A, T>
where
    A: 'static,
    T: Send + Sync + 'static,
{
    /// Start the task and return its id without waiting for it to finish.
    ///
    /// LOADING has been dispatched by the time this returns, so a lookup of
    /// the returned id observes at least the loading state.
    pub fn dispatch(self, dispatch: Dispatcher) -> TaskId {
        let Self { runner, args } = self;
        let id = TaskId::new();
        dispatch.dispatch(TaskNotification::loading(id).into());

        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            runner.builder.build(args, dispatch.clone())
        }));
        let steps = match built {
            Ok(Ok(steps)) => steps,
            Ok(Err(err)) => {
                report_failure(dispatch.as_ref(), id, runner.name, TaskFailure::Build(err));
                return id;
            }
            Err(payload) => {
                let failure = TaskFailure::Panicked(panic_message(payload.as_ref()));
                report_failure(dispatch.as_ref(), id, runner.name, failure);
                return id;
            }
        };

        let Some(runtime) = runner.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            report_failure(dispatch.as_ref(), id, runner.name, TaskFailure::NoRuntime);
            return id;
        };

        let steps = match runner.step_timeout {
            Some(after) => steps.into_iter().map(|s| with_timeout(s, after)).collect(),
            None => steps,
        };

        info!(task = %id, runner = runner.name, steps = steps.len(), "task started");

        let execution = Execution {
            id,
            runner: runner.name,
            steps,
            projection: runner.projection,
        };
        // Detached: completion is observed through the store. The supervisor
        // only speaks when the execution dies without reporting.
        let handle = runtime.spawn(execution.run(dispatch.clone()));
        drop(runtime.spawn(supervise(id, runner.name, handle, dispatch)));

        id
    }
}

/// The spawned half of a task.
struct Execution<T: Send + Sync> {
    id: TaskId,
    runner: &'static str,
    steps: Vec<BoxedStep<T>>,
    projection: Option<Projection<T>>,
}

impl<T: Send + Sync + 'static> Execution<T> {
    async fn run(self, dispatch: Dispatcher) {
        match self.execute().await {
            Ok(data) => {
                info!(task = %self.id, runner = self.runner, "task succeeded");
                dispatch.dispatch(TaskNotification::success(self.id, data).into());
            }
            Err(failure) => report_failure(dispatch.as_ref(), self.id, self.runner, failure),
        }
    }

    async fn execute(&self) -> Result<Option<Value>, TaskFailure> {
        let mut results: Vec<T> = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            debug!(task = %self.id, index, step = step.name(), "step started");

            let output = step
                .execute(&results)
                .await
                .map_err(|source| TaskFailure::Step {
                    index,
                    name: step.name().to_string(),
                    source,
                })?;

            debug!(task = %self.id, index, step = step.name(), "step completed");
            results.push(output);
        }

        self.projection
            .as_ref()
            .map(|project| project(&results))
            .transpose()
            .map_err(TaskFailure::Projection)
    }
}

async fn supervise(
    id: TaskId,
    runner: &'static str,
    handle: JoinHandle<()>,
    dispatch: Dispatcher,
) {
    let failure = match handle.await {
        Ok(()) => return,
        Err(err) if err.is_panic() => {
            TaskFailure::Panicked(panic_message(err.into_panic().as_ref()))
        }
        Err(_) => TaskFailure::Cancelled,
    };
    report_failure(dispatch.as_ref(), id, runner, failure);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn report_failure(dispatch: &dyn Dispatch, id: TaskId, runner: &str, failure: TaskFailure) {
    let error = failure.to_string();
    match &failure {
        TaskFailure::Step { index, name, .. } => {
            warn!(
                task = %id,
                runner,
                kind = failure.kind(),
                index,
                step = %name,
                %error,
                "task failed"
            );
        }
        _ => warn!(task = %id, runner, kind = failure.kind(), %error, "task failed"),
    }
    dispatch.dispatch(TaskNotification::error(id, error).into());
}
