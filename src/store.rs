//! In-memory store holding task and request records.
//!
//! Built-in slices are keyed by task id and by request URL. Each dispatch
//! is a read-modify-write of a single key, so concurrent tasks never touch
//! each other's records. Applications may register their own reducers for
//! extra slices; these run after the built-in ones on every action.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::notification::{
    Action, Dispatch, Dispatcher, RequestNotification, RequestState, TaskState,
};
use crate::task::TaskId;

/// Namespace holding the built-in slices. User reducers may not claim it.
pub const RESERVED_NAMESPACE: &str = "_api";

/// Error type for store construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("cannot use the reserved '{0}' namespace for a reducer")]
    ReservedNamespace(String),

    #[error("a reducer named '{0}' is already registered")]
    DuplicateReducer(String),
}

/// Materialized lifecycle of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub is_initialized: bool,
    pub is_loading: bool,
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskRecord {
    /// True once SUCCESS or ERROR has been applied.
    pub fn is_terminal(&self) -> bool {
        self.is_initialized && !self.is_loading
    }
}

impl From<&TaskState> for TaskRecord {
    /// Every task notification replaces the whole record.
    fn from(state: &TaskState) -> Self {
        match state {
            TaskState::Loading => Self {
                is_initialized: true,
                is_loading: true,
                ..Self::default()
            },
            TaskState::Success { data } => Self {
                is_initialized: true,
                success: true,
                data: data.clone(),
                ..Self::default()
            },
            TaskState::Error { error } => Self {
                is_initialized: true,
                error: error.clone(),
                ..Self::default()
            },
        }
    }
}

/// Result of looking up a task id.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Nothing has been dispatched for this id.
    Uninitialized,
    Known(TaskRecord),
}

impl TaskStatus {
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn is_loading(&self) -> bool {
        self.record().is_some_and(|r| r.is_loading)
    }

    pub fn is_success(&self) -> bool {
        self.record().is_some_and(|r| r.success)
    }

    /// The failure description, if the task ended in ERROR.
    pub fn error(&self) -> Option<&str> {
        self.record()
            .map(|r| r.error.as_str())
            .filter(|e| !e.is_empty())
    }

    pub fn data(&self) -> Option<&Value> {
        self.record().and_then(|r| r.data.as_ref())
    }

    pub fn record(&self) -> Option<&TaskRecord> {
        match self {
            Self::Uninitialized => None,
            Self::Known(record) => Some(record),
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Uninitialized => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("isInitialized", &false)?;
                map.end()
            }
            Self::Known(record) => record.serialize(serializer),
        }
    }
}

/// Materialized lifecycle of one single fetch.
///
/// Unlike task records, request records merge: LOADING and ERROR keep the
/// previously fetched data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub is_initialized: bool,
    pub is_loading: bool,
    pub error: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RequestRecord {
    fn apply(&mut self, url: &str, state: &RequestState) {
        match state {
            RequestState::Loading => {
                self.is_initialized = true;
                self.is_loading = true;
                self.error.clear();
            }
            RequestState::Success { data } => {
                *self = Self {
                    is_initialized: true,
                    is_loading: false,
                    error: String::new(),
                    data: Some(data.clone()),
                };
            }
            RequestState::Error { error } => {
                self.is_initialized = true;
                self.is_loading = false;
                self.error = error.clone();
            }
            RequestState::Patch(transform) => match self.data.take() {
                Some(data) => self.data = Some(transform(data)),
                None => warn!(url, "ignoring patch of a request with no data"),
            },
        }
    }
}

/// User reducer: computes the next slice value from the current one.
pub type ReducerFn = Arc<dyn Fn(&Value, &Action) -> Value + Send + Sync>;

struct UserReducer {
    name: String,
    reduce: ReducerFn,
}

struct Inner {
    tasks: DashMap<TaskId, TaskRecord>,
    requests: DashMap<String, RequestRecord>,
    reducers: Vec<UserReducer>,
    slices: DashMap<String, Value>,
    revision: watch::Sender<u64>,
}

/// Shared, cloneable handle to the store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create a store with only the built-in slices.
    pub fn new() -> Self {
        StoreBuilder::new().build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// A dispatcher that feeds this store.
    pub fn dispatcher(&self) -> Dispatcher {
        Arc::new(self.clone())
    }

    /// Look up a task by id.
    pub fn task_status(&self, id: &TaskId) -> TaskStatus {
        self.inner
            .tasks
            .get(id)
            .map_or(TaskStatus::Uninitialized, |record| {
                TaskStatus::Known(record.value().clone())
            })
    }

    /// Look up a request by full URL. Unknown URLs report the default record.
    pub fn request_status(&self, url: &str) -> RequestRecord {
        self.inner
            .requests
            .get(url)
            .map(|record| record.value().clone())
            .unwrap_or_default()
    }

    /// Current value of a user slice.
    pub fn slice(&self, name: &str) -> Option<Value> {
        self.inner.slices.get(name).map(|value| value.value().clone())
    }

    /// Watch the store's revision counter, bumped after every dispatch.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Wait until the task reaches SUCCESS or ERROR.
    ///
    /// Never resolves for an id that is never dispatched.
    pub async fn settled(&self, id: TaskId) -> TaskStatus {
        let mut revisions = self.subscribe();
        loop {
            let status = self.task_status(&id);
            if status.record().is_some_and(TaskRecord::is_terminal) {
                return status;
            }
            if revisions.changed().await.is_err() {
                return self.task_status(&id);
            }
        }
    }

    fn apply_request(&self, notification: &RequestNotification) {
        let url = notification.id.as_str();
        match &notification.state {
            RequestState::Patch(_) => match self.inner.requests.get_mut(url) {
                Some(mut record) => record.apply(url, &notification.state),
                None => warn!(url, "ignoring patch of an unknown request"),
            },
            state => self
                .inner
                .requests
                .entry(notification.id.clone())
                .or_default()
                .apply(url, state),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatch for Store {
    fn dispatch(&self, action: Action) {
        trace!(?action, "dispatch");

        match &action {
            Action::Task(notification) => {
                self.inner
                    .tasks
                    .insert(notification.id, TaskRecord::from(&notification.state));
            }
            Action::Request(notification) => self.apply_request(notification),
            Action::Custom(_) => {}
        }

        for reducer in &self.inner.reducers {
            if let Some(mut slice) = self.inner.slices.get_mut(&reducer.name) {
                let next = (reducer.reduce)(&slice, &action);
                *slice = next;
            }
        }

        self.inner.revision.send_modify(|revision| *revision += 1);
    }
}

/// Builder for a [`Store`] with user reducers.
#[derive(Default)]
pub struct StoreBuilder {
    reducers: Vec<(String, Value, ReducerFn)>,
    names: HashSet<String>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for the slice `name`, starting at `initial`.
    ///
    /// Reducers run while their slice is locked and must not call back into
    /// the store.
    pub fn reducer<F>(
        mut self,
        name: impl Into<String>,
        initial: Value,
        reduce: F,
    ) -> Result<Self, StoreError>
    where
        F: Fn(&Value, &Action) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        if name == RESERVED_NAMESPACE {
            return Err(StoreError::ReservedNamespace(name));
        }
        if !self.names.insert(name.clone()) {
            return Err(StoreError::DuplicateReducer(name));
        }
        self.reducers.push((name, initial, Arc::new(reduce)));
        Ok(self)
    }

    pub fn build(self) -> Store {
        let slices = DashMap::new();
        let reducers = self
            .reducers
            .into_iter()
            .map(|(name, initial, reduce)| {
                slices.insert(name.clone(), initial);
                UserReducer { name, reduce }
            })
            .collect();

        let (revision, _) = watch::channel(0);

        Store {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                requests: DashMap::new(),
                reducers,
                slices,
                revision,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uninitialized_status_serializes_to_flag_only() {
        let value = serde_json::to_value(TaskStatus::Uninitialized).unwrap();
        assert_eq!(value, json!({"isInitialized": false}));
    }

    #[test]
    fn test_task_record_wire_names() {
        let record = TaskRecord::from(&TaskState::Loading);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"isInitialized": true, "isLoading": true, "success": false, "error": ""})
        );
    }

    #[test]
    fn test_success_replaces_error_fields() {
        let mut record = TaskRecord::from(&TaskState::Error {
            error: "boom".to_string(),
        });
        assert!(record.is_terminal());

        record = TaskRecord::from(&TaskState::Success {
            data: Some(json!(1)),
        });
        assert_eq!(record.error, "");
        assert!(record.success);
        assert_eq!(record.data, Some(json!(1)));
    }

    #[test]
    fn test_request_patch_without_data_is_ignored() {
        let mut record = RequestRecord::default();
        record.apply("u", &RequestState::Patch(Arc::new(|v: Value| v)));
        assert_eq!(record, RequestRecord::default());
    }
}
