//! Name-based access to registered tasks and requests for presentation code.
//!
//! Tasks and requests are stored type-erased: arguments arrive as JSON and are
//! deserialized into each endpoint's concrete argument type at call time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::notification::Dispatcher;
use crate::request::{ApiRequest, RequestError};
use crate::store::{RequestRecord, Store, TaskStatus};
use crate::task::{TaskId, TaskRunner};

/// Error type for binding lookups and calls.
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown request: {0}")]
    UnknownRequest(String),

    #[error("invalid arguments for '{name}': {source}")]
    InvalidArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Type-erased task runner that can be stored in a registry.
pub trait ErasedTask: Send + Sync {
    /// Start the task with JSON arguments.
    fn dispatch_erased(
        &self,
        args: Value,
        dispatch: Dispatcher,
    ) -> Result<TaskId, serde_json::Error>;
}

impl<A, T> ErasedTask for TaskRunner<A, T>
where
    A: DeserializeOwned + 'static,
    T: Send + Sync + 'static,
{
    fn dispatch_erased(
        &self,
        args: Value,
        dispatch: Dispatcher,
    ) -> Result<TaskId, serde_json::Error> {
        let typed_args: A = serde_json::from_value(args)?;
        Ok(self.call(typed_args).dispatch(dispatch))
    }
}

/// Type-erased request that can be stored in a registry.
#[async_trait]
pub trait ErasedRequest: Send + Sync {
    /// Resolve the full URL for JSON arguments.
    fn url_erased(&self, args: Value) -> Result<String, serde_json::Error>;

    /// Perform the request against an already resolved URL.
    async fn request_erased(
        &self,
        url: String,
        dispatch: Dispatcher,
    ) -> Result<Value, RequestError>;
}

#[async_trait]
impl<A> ErasedRequest for ApiRequest<A>
where
    A: DeserializeOwned + Send + Sync + 'static,
{
    fn url_erased(&self, args: Value) -> Result<String, serde_json::Error> {
        let typed_args: A = serde_json::from_value(args)?;
        Ok(self.url(&typed_args))
    }

    async fn request_erased(
        &self,
        url: String,
        dispatch: Dispatcher,
    ) -> Result<Value, RequestError> {
        self.request_url(url).dispatch(dispatch.as_ref()).await
    }
}

/// Registry of named tasks and requests.
#[derive(Clone, Default)]
pub struct Api {
    tasks: HashMap<String, Arc<dyn ErasedTask>>,
    requests: HashMap<String, Arc<dyn ErasedRequest>>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task runner under `name`.
    pub fn task(mut self, name: impl Into<String>, runner: impl ErasedTask + 'static) -> Self {
        self.tasks.insert(name.into(), Arc::new(runner));
        self
    }

    /// Register a request under `name`.
    pub fn request(
        mut self,
        name: impl Into<String>,
        request: impl ErasedRequest + 'static,
    ) -> Self {
        self.requests.insert(name.into(), Arc::new(request));
        self
    }

    /// Names of registered tasks.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Names of registered requests.
    pub fn request_names(&self) -> impl Iterator<Item = &str> {
        self.requests.keys().map(String::as_str)
    }
}

/// An [`Api`] wired to a [`Store`]: dispatchers and status lookups by name.
#[derive(Clone)]
pub struct Bindings {
    api: Api,
    store: Store,
}

impl Bindings {
    pub fn new(api: Api, store: Store) -> Self {
        Self { api, store }
    }

    /// The store behind these bindings.
    ///
    /// Application state lives in user reducer slices next to the built-in
    /// ones; read it with [`Store::slice`] and send custom actions with
    /// [`Store::dispatcher`].
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Start the named task. Returns as soon as LOADING is in the store.
    pub fn task(&self, name: &str, args: Value) -> Result<TaskId, BindingError> {
        let task = self
            .api
            .tasks
            .get(name)
            .ok_or_else(|| BindingError::UnknownTask(name.to_string()))?;

        task.dispatch_erased(args, self.store.dispatcher())
            .map_err(|source| BindingError::InvalidArguments {
                name: name.to_string(),
                source,
            })
    }

    /// Perform the named request and wait for its outcome.
    pub async fn request(&self, name: &str, args: Value) -> Result<Value, BindingError> {
        let request = self.lookup_request(name)?;
        let url = Self::resolve(request.as_ref(), name, args)?;
        Ok(request.request_erased(url, self.store.dispatcher()).await?)
    }

    /// Status of a task started through any dispatcher feeding this store.
    pub fn task_status(&self, id: &TaskId) -> TaskStatus {
        self.store.task_status(id)
    }

    /// Status of the named request for these arguments.
    pub fn request_status(
        &self,
        name: &str,
        args: Value,
    ) -> Result<RequestRecord, BindingError> {
        let request = self.lookup_request(name)?;
        let url = Self::resolve(request.as_ref(), name, args)?;
        Ok(self.store.request_status(&url))
    }

    fn lookup_request(&self, name: &str) -> Result<Arc<dyn ErasedRequest>, BindingError> {
        self.api
            .requests
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::UnknownRequest(name.to_string()))
    }

    fn resolve(
        request: &dyn ErasedRequest,
        name: &str,
        args: Value,
    ) -> Result<String, BindingError> {
        request
            .url_erased(args)
            .map_err(|source| BindingError::InvalidArguments {
                name: name.to_string(),
                source,
            })
    }
}
