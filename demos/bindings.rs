//! Name-based access to tasks and requests.
//!
//! This example demonstrates:
//! - Registering a request and a task in an Api
//! - A task step propagating a failed request
//! - Patching cached request data without refetching
//! - A user reducer counting custom actions next to the built-in slices

use async_trait::async_trait;
use deltatask::{
    step_fn, Action, Api, ApiRequest, Bindings, BoxedStep, BuildError, CustomAction, Dispatcher,
    StepError, Store, TaskRunner, Transport, TransportError, UrlSource,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Pretends to be a small REST API.
struct FakeApi;

#[async_trait]
impl Transport for FakeApi {
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        match url.rsplit('/').next() {
            Some("todos") => Ok(json!([{"id": 1, "title": "write docs"}])),
            Some("1") => Ok(json!({"id": 1, "name": "ada"})),
            _ => Err(TransportError::Status(404)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== deltatask - Bindings Example ===\n");

    let transport: Arc<dyn Transport> = Arc::new(FakeApi);
    let todos: ApiRequest<()> = ApiRequest::new("http://fake.test/todos", transport.clone());
    let user: ApiRequest<u32> = ApiRequest::new(
        UrlSource::from_fn(|id: &u32| format!("http://fake.test/users/{id}")),
        transport,
    );

    let profile = {
        let user = user.clone();
        TaskRunner::new(
            move |id: u32, dispatch: Dispatcher| -> Result<Vec<BoxedStep<Value>>, BuildError> {
                let user = user.clone();
                let progress = dispatch.clone();
                Ok(vec![
                    step_fn("load user", move |_: Vec<Value>| {
                        let thunk = user.request(&id);
                        let dispatch = dispatch.clone();
                        async move {
                            Ok::<Value, StepError>(thunk.dispatch(dispatch.as_ref()).await?)
                        }
                    }),
                    step_fn("greet", move |previous: Vec<Value>| {
                        progress.dispatch(CustomAction::new("greeted", Value::Null).into());
                        let name = previous[0]["name"].as_str().unwrap_or("stranger").to_string();
                        async move { Ok::<Value, StepError>(json!(format!("hello, {name}"))) }
                    }),
                ])
            },
        )
        .named("profile")
        .with_projection(|results: &[Value]| Ok(results[1].clone()))
    };

    let store = Store::builder()
        .reducer("greetings", json!(0), |count, action| match action {
            Action::Custom(custom) if custom.kind == "greeted" => {
                json!(count.as_u64().unwrap_or(0) + 1)
            }
            _ => count.clone(),
        })?
        .build();

    let api = Api::new()
        .request("todos", todos.clone())
        .task("profile", profile);
    let bindings = Bindings::new(api, store.clone());

    println!("--- Example 1: Request by name ---");
    let data = bindings.request("todos", Value::Null).await?;
    println!("todos: {data}");

    todos.patch(&(), &store, |data| {
        let mut list = data.as_array().cloned().unwrap_or_default();
        list.push(json!({"id": 2, "title": "patched locally"}));
        Value::Array(list)
    });
    let record = bindings.request_status("todos", Value::Null)?;
    println!("after patch: {}\n", serde_json::to_string(&record)?);

    println!("--- Example 2: Task by name ---");
    let id = bindings.task("profile", json!(1))?;
    let status = store.settled(id).await;
    println!("profile(1): {}", serde_json::to_string(&status)?);

    let id = bindings.task("profile", json!(2))?;
    let status = store.settled(id).await;
    println!("profile(2): {}", status.error().unwrap_or("no error"));
    println!("greetings so far: {}\n", store.slice("greetings").unwrap_or_default());

    println!("=== Examples complete ===");
    Ok(())
}
