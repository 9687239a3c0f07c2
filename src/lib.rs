//! # Deltatask
//!
//! Track asynchronous work as loading/success/error records in a
//! reducer-style store.
//!
//! Two conventions are provided:
//!
//! - **Tasks** - an ordered list of async steps run one after another, each
//!   seeing the results of the steps before it. Starting a task returns its
//!   id immediately; the outcome lands in the store under that id.
//! - **Requests** - a single GET whose lifecycle and cached data live in the
//!   store under its URL, with client-side patching of the cached data.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deltatask::{sync_step_fn, BuildError, Dispatcher, Store, TaskRunner};
//!
//! let store = Store::new();
//!
//! let runner = TaskRunner::new(|count: usize, _dispatch: Dispatcher| {
//!     Ok::<_, BuildError>(
//!         (0..count)
//!             .map(|i| sync_step_fn(format!("step-{i}"), |previous: &[usize]| Ok(previous.len())))
//!             .collect(),
//!     )
//! })
//! .with_projection(|results: &[usize]| Ok(results.iter().sum::<usize>()));
//!
//! let id = runner.run(3, store.dispatcher());
//! assert!(store.task_status(&id).is_loading());
//!
//! let status = store.settled(id).await;
//! assert_eq!(status.data(), Some(&serde_json::json!(3)));
//! ```
//!
//! ## Guarantees
//!
//! - LOADING is in the store before `run` returns.
//! - Every task ends in exactly one SUCCESS or ERROR.
//! - A builder, step or projection that panics ends the task in ERROR.
//! - A failing builder or step stops the task; later steps never run.
//! - Steps of one task never overlap; results accumulate in declaration order.

pub mod bindings;
pub mod builder;
pub mod notification;
pub mod request;
pub mod step;
pub mod store;
pub mod task;

pub use bindings::{Api, BindingError, Bindings, ErasedRequest, ErasedTask};
pub use builder::{BuildError, TaskBuilder};
pub use notification::{
    Action, CustomAction, Dispatch, Dispatcher, NotificationKind, PatchFn, RequestNotification,
    RequestState, TaskNotification, TaskState,
};
pub use request::{ApiRequest, RequestError, RequestThunk, Transport, TransportError, UrlSource};
pub use step::{
    step_fn, sync_step_fn, with_timeout, BoxedStep, FnStep, Step, StepError, SyncFnStep, Timeout,
};
pub use store::{
    ReducerFn, RequestRecord, Store, StoreBuilder, StoreError, TaskRecord, TaskStatus,
    RESERVED_NAMESPACE,
};
pub use task::{TaskId, TaskRunner, TaskThunk};
