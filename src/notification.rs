//! Notifications dispatched to the store, and the sink that receives them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskId;

/// Discriminates which built-in slice a notification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Sequential task lifecycle.
    #[serde(rename = "TASK")]
    Task,
    /// Single fetch lifecycle.
    #[serde(rename = "REQUEST")]
    Request,
}

/// Lifecycle transition carried by a task notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// The task has started.
    Loading,
    /// Every step completed.
    Success {
        /// Projected result, present only if the runner has a projection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// The builder or a step failed.
    Error { error: String },
}

impl TaskState {
    /// Returns true for SUCCESS and ERROR.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Loading)
    }
}

/// A lifecycle notification for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub kind: NotificationKind,
    pub id: TaskId,
    #[serde(flatten)]
    pub state: TaskState,
}

impl TaskNotification {
    pub fn loading(id: TaskId) -> Self {
        Self::new(id, TaskState::Loading)
    }

    pub fn success(id: TaskId, data: Option<Value>) -> Self {
        Self::new(id, TaskState::Success { data })
    }

    pub fn error(id: TaskId, error: impl Into<String>) -> Self {
        Self::new(id, TaskState::Error {
            error: error.into(),
        })
    }

    fn new(id: TaskId, state: TaskState) -> Self {
        Self {
            kind: NotificationKind::Task,
            id,
            state,
        }
    }
}

/// Transformation applied to cached request data by a PATCH.
pub type PatchFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Lifecycle transition carried by a request notification.
#[derive(Clone)]
pub enum RequestState {
    Loading,
    Success { data: Value },
    Error { error: String },
    /// Client-side mutation of the cached data.
    Patch(PatchFn),
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("Loading"),
            Self::Success { data } => f.debug_struct("Success").field("data", data).finish(),
            Self::Error { error } => f.debug_struct("Error").field("error", error).finish(),
            Self::Patch(_) => f.write_str("Patch(..)"),
        }
    }
}

/// A lifecycle notification for one single fetch, keyed by its full URL.
#[derive(Debug, Clone)]
pub struct RequestNotification {
    pub id: String,
    pub state: RequestState,
}

impl RequestNotification {
    pub fn new(id: impl Into<String>, state: RequestState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }

    /// The kind tag, always [`NotificationKind::Request`].
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::Request
    }
}

/// An application-defined action, seen only by user reducers.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAction {
    pub kind: String,
    pub payload: Value,
}

impl CustomAction {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Everything that can be dispatched to a store.
#[derive(Debug, Clone)]
pub enum Action {
    Task(TaskNotification),
    Request(RequestNotification),
    Custom(CustomAction),
}

impl Action {
    /// The task notification inside, if any.
    pub fn as_task(&self) -> Option<&TaskNotification> {
        match self {
            Self::Task(notification) => Some(notification),
            _ => None,
        }
    }
}

impl From<TaskNotification> for Action {
    fn from(notification: TaskNotification) -> Self {
        Self::Task(notification)
    }
}

impl From<RequestNotification> for Action {
    fn from(notification: RequestNotification) -> Self {
        Self::Request(notification)
    }
}

impl From<CustomAction> for Action {
    fn from(action: CustomAction) -> Self {
        Self::Custom(action)
    }
}

/// Receives dispatched actions. Fire-and-forget.
pub trait Dispatch: Send + Sync {
    /// Deliver one action.
    fn dispatch(&self, action: Action);
}

impl<F> Dispatch for F
where
    F: Fn(Action) + Send + Sync,
{
    fn dispatch(&self, action: Action) {
        self(action)
    }
}

/// Shared handle to a sink, cheap to clone into spawned work.
pub type Dispatcher = Arc<dyn Dispatch>;
