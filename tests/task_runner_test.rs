//! Lifecycle tests for the sequential task runner.
//!
//! A spy dispatcher records every action so the exact notification sequence
//! of a task can be asserted, not just its final record.

use async_trait::async_trait;
use deltatask::{
    step_fn, sync_step_fn, Action, BoxedStep, BuildError, CustomAction, Dispatch, Dispatcher,
    Step, StepError, Store, TaskId, TaskNotification, TaskRunner, TaskState,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct Spy {
    actions: Arc<std::sync::Mutex<Vec<Action>>>,
}

impl Spy {
    fn dispatcher(&self) -> Dispatcher {
        let actions = self.actions.clone();
        Arc::new(move |action: Action| actions.lock().unwrap().push(action))
    }

    fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    fn task_notifications(&self, id: TaskId) -> Vec<TaskNotification> {
        self.actions()
            .iter()
            .filter_map(Action::as_task)
            .filter(|n| n.id == id)
            .cloned()
            .collect()
    }

    async fn wait_for_terminal(&self, id: TaskId) -> Vec<TaskNotification> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let seen = self.task_notifications(id);
                if seen.last().is_some_and(|n| n.state.is_terminal()) {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not settle")
    }
}

async fn settle(store: &Store, id: TaskId) -> deltatask::TaskStatus {
    tokio::time::timeout(Duration::from_secs(2), store.settled(id))
        .await
        .expect("task did not settle")
}

/// Records the prior results it was handed and returns how many there were.
struct RecordingStep {
    seen: Arc<Mutex<Vec<Vec<u32>>>>,
}

#[async_trait]
impl Step<u32> for RecordingStep {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, previous: &[u32]) -> Result<u32, StepError> {
        self.seen.lock().await.push(previous.to_vec());
        Ok(previous.len() as u32)
    }
}

struct CountingStep {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Step<u32> for CountingStep {
    fn name(&self) -> &str {
        "counting"
    }

    async fn execute(&self, _previous: &[u32]) -> Result<u32, StepError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

fn two_steps() -> TaskRunner<(), u32> {
    TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
            Ok(vec![
                sync_step_fn("first", |_: &[u32]| Ok(1)),
                sync_step_fn("second", |_: &[u32]| Ok(2)),
            ])
        },
    )
}

#[tokio::test]
async fn test_loading_then_success_without_data() {
    let spy = Spy::default();
    let id = two_steps().run((), spy.dispatcher());

    // LOADING is dispatched before run() returns.
    assert_eq!(spy.task_notifications(id), vec![TaskNotification::loading(id)]);

    let seen = spy.wait_for_terminal(id).await;
    assert_eq!(
        seen,
        vec![
            TaskNotification::loading(id),
            TaskNotification::success(id, None)
        ]
    );
}

#[tokio::test]
async fn test_store_reports_loading_before_first_step_completes() {
    let store = Store::new();
    let id = two_steps().run((), store.dispatcher());

    let status = store.task_status(&id);
    assert!(status.is_initialized());
    assert!(status.is_loading());
    assert!(status.error().is_none());

    let status = settle(&store, id).await;
    assert!(status.is_success());
    assert!(!status.is_loading());
    assert_eq!(status.data(), None);
}

#[tokio::test]
async fn test_projection_sets_success_data() {
    let store = Store::new();
    let runner = TaskRunner::new(
        |word: String, _: Dispatcher| -> Result<Vec<BoxedStep<String>>, BuildError> {
            Ok(vec![step_fn("echo", move |_: Vec<String>| {
                let word = word.clone();
                async move { Ok::<String, StepError>(word) }
            })])
        },
    )
    .with_projection(|results: &[String]| Ok(results[0].to_uppercase()));

    let id = runner.run("foobar".to_string(), store.dispatcher());
    let status = settle(&store, id).await;

    assert!(status.is_success());
    assert_eq!(status.data(), Some(&json!("FOOBAR")));
}

#[tokio::test]
async fn test_steps_see_accumulated_results_in_order() {
    let store = Store::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let runner = {
        let seen = seen.clone();
        TaskRunner::new(
            move |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
                Ok((0..3)
                    .map(|_| Box::new(RecordingStep { seen: seen.clone() }) as BoxedStep<u32>)
                    .collect())
            },
        )
        .with_projection(|results: &[u32]| Ok(results.to_vec()))
    };

    let id = runner.run((), store.dispatcher());
    let status = settle(&store, id).await;

    assert_eq!(status.data(), Some(&json!([0, 1, 2])));
    assert_eq!(*seen.lock().await, vec![vec![], vec![0], vec![0, 1]]);
}

#[tokio::test]
async fn test_failing_step_stops_later_steps() {
    let spy = Spy::default();
    let runs = Arc::new(AtomicUsize::new(0));

    let runner = {
        let runs = runs.clone();
        TaskRunner::new(
            move |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
                Ok(vec![
                    Box::new(CountingStep { runs: runs.clone() }) as BoxedStep<u32>,
                    sync_step_fn("fails", |_: &[u32]| Err(StepError::msg("Failed subtask"))),
                    Box::new(CountingStep { runs: runs.clone() }),
                ])
            },
        )
    };

    let id = runner.run((), spy.dispatcher());
    let seen = spy.wait_for_terminal(id).await;

    assert_eq!(
        seen,
        vec![
            TaskNotification::loading(id),
            TaskNotification::error(id, "Failed subtask")
        ]
    );

    // Give a stray third step time to show up if it were going to run.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_builder_failure_runs_no_steps() {
    let spy = Spy::default();
    let runner: TaskRunner<(), u32> = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
            Err(BuildError::msg("Failed subtask"))
        },
    );

    let id = runner.run((), spy.dispatcher());

    // The failure is reported before run() returns.
    assert_eq!(
        spy.task_notifications(id),
        vec![
            TaskNotification::loading(id),
            TaskNotification::error(id, "Failed subtask")
        ]
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(spy.actions().len(), 2);
}

#[tokio::test]
async fn test_builder_error_context_is_kept() {
    let store = Store::new();
    let runner: TaskRunner<(), u32> = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
            let err = anyhow::anyhow!("missing field").context("invalid task arguments");
            Err(BuildError::new(err))
        },
    );

    let id = runner.run((), store.dispatcher());
    let status = store.task_status(&id);
    assert_eq!(
        status.error(),
        Some("invalid task arguments: missing field")
    );
}

#[tokio::test]
async fn test_empty_step_list_succeeds() {
    let store = Store::new();
    let runner = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> { Ok(Vec::new()) },
    )
    .with_projection(|results: &[u32]| Ok(results.len()));

    let id = runner.run((), store.dispatcher());
    let status = settle(&store, id).await;

    assert!(status.is_success());
    assert_eq!(status.data(), Some(&json!(0)));
}

#[tokio::test]
async fn test_every_notification_carries_returned_id() {
    let spy = Spy::default();
    let runner = two_steps();

    let first = runner.run((), spy.dispatcher());
    let second = runner.run((), spy.dispatcher());
    assert_ne!(first, second);

    spy.wait_for_terminal(first).await;
    spy.wait_for_terminal(second).await;

    let ids: Vec<TaskId> = spy
        .actions()
        .iter()
        .filter_map(Action::as_task)
        .map(|n| n.id)
        .collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.iter().all(|id| *id == first || *id == second));
    assert_eq!(ids.iter().filter(|id| **id == first).count(), 2);
}

#[tokio::test]
async fn test_step_timeout_reports_error() {
    let store = Store::new();
    let runner = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
            Ok(vec![step_fn("slow", |_: Vec<u32>| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<u32, StepError>(1)
            })])
        },
    )
    .with_step_timeout(Duration::from_millis(20));

    let id = runner.run((), store.dispatcher());
    let status = settle(&store, id).await;

    assert!(!status.is_success());
    assert_eq!(status.error(), Some("step 'slow' timed out after 20ms"));
}

#[tokio::test]
async fn test_projection_failure_reports_error() {
    let store = Store::new();
    let runner = two_steps().with_projection(|results: &[u32]| {
        results
            .iter()
            .find(|r| **r > 10)
            .copied()
            .ok_or_else(|| StepError::msg("no result above 10"))
    });

    let id = runner.run((), store.dispatcher());
    let status = settle(&store, id).await;

    assert!(!status.is_success());
    assert_eq!(status.error(), Some("no result above 10"));
    assert_eq!(status.data(), None);
}

#[tokio::test]
async fn test_concurrent_tasks_keep_separate_records() {
    let store = Store::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let runner = {
        let log = log.clone();
        TaskRunner::new(
            move |label: &'static str, _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
                Ok((0..3)
                    .map(|index| {
                        let log = log.clone();
                        step_fn(format!("{label}-{index}"), move |_: Vec<u32>| {
                            let log = log.clone();
                            async move {
                                tokio::time::sleep(Duration::from_millis(5)).await;
                                log.lock().await.push(format!("{label}{index}"));
                                Ok::<u32, StepError>(index)
                            }
                        })
                    })
                    .collect())
            },
        )
        .with_projection(|results: &[u32]| Ok(results.iter().sum::<u32>()))
    };

    let a = runner.run("a", store.dispatcher());
    let b = runner.run("b", store.dispatcher());
    assert!(store.task_status(&a).is_loading());
    assert!(store.task_status(&b).is_loading());

    let (status_a, status_b) = tokio::join!(settle(&store, a), settle(&store, b));
    assert_eq!(status_a.data(), Some(&json!(3)));
    assert_eq!(status_b.data(), Some(&json!(3)));

    let log = log.lock().await;
    let order = |label: char| -> Vec<String> {
        log.iter()
            .filter(|entry| entry.starts_with(label))
            .cloned()
            .collect()
    };
    assert_eq!(order('a'), vec!["a0", "a1", "a2"]);
    assert_eq!(order('b'), vec!["b0", "b1", "b2"]);
}

#[tokio::test]
async fn test_steps_can_dispatch_their_own_actions() {
    let spy = Spy::default();
    let runner = TaskRunner::new(
        |_: (), dispatch: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
            Ok(vec![sync_step_fn("progress", move |_: &[u32]| {
                dispatch.dispatch(CustomAction::new("progress", json!(50)).into());
                Ok(1)
            })])
        },
    );

    let id = runner.run((), spy.dispatcher());
    spy.wait_for_terminal(id).await;

    let actions = spy.actions();
    assert_eq!(actions.len(), 3);
    assert!(matches!(
        &actions[0],
        Action::Task(n) if n.state == TaskState::Loading
    ));
    assert!(matches!(
        &actions[1],
        Action::Custom(custom) if custom.kind == "progress"
    ));
    assert!(matches!(
        &actions[2],
        Action::Task(n) if n.state.is_terminal()
    ));
}

fn error_text(notification: &TaskNotification) -> &str {
    match &notification.state {
        TaskState::Error { error } => error,
        other => panic!("expected ERROR, got {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_step_reports_error() {
    let spy = Spy::default();
    let runner = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<String>>, BuildError> {
            Ok(vec![sync_step_fn("first", |previous: &[String]| {
                Ok(previous[0].clone())
            })])
        },
    );

    let id = runner.run((), spy.dispatcher());
    let seen = spy.wait_for_terminal(id).await;

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], TaskNotification::loading(id));
    assert!(error_text(&seen[1]).starts_with("task panicked: index out of bounds"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(spy.task_notifications(id).len(), 2);
}

#[tokio::test]
async fn test_panicking_projection_reports_error() {
    let store = Store::new();
    let runner = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<String>>, BuildError> { Ok(Vec::new()) },
    )
    .with_projection(|results: &[String]| Ok(results[0].to_uppercase()));

    let id = runner.run((), store.dispatcher());
    let status = settle(&store, id).await;

    assert!(!status.is_success());
    assert!(!status.is_loading());
    assert!(status
        .error()
        .is_some_and(|e| e.starts_with("task panicked: index out of bounds")));
}

#[tokio::test]
async fn test_panicking_builder_reports_error() {
    let spy = Spy::default();
    let runner: TaskRunner<(), u32> = TaskRunner::new(
        |_: (), _: Dispatcher| -> Result<Vec<BoxedStep<u32>>, BuildError> {
            panic!("builder exploded")
        },
    );

    let id = runner.run((), spy.dispatcher());

    // Reported before run() returns, like any other builder failure.
    assert_eq!(
        spy.task_notifications(id),
        vec![
            TaskNotification::loading(id),
            TaskNotification::error(id, "task panicked: builder exploded")
        ]
    );
}

#[test]
fn test_without_runtime_reports_error() {
    let store = Store::new();
    let id = two_steps().run((), store.dispatcher());

    let status = store.task_status(&id);
    assert!(!status.is_loading());
    assert_eq!(status.error(), Some("no tokio runtime available to run task"));
}

#[test]
fn test_explicit_runtime_runs_steps() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Store::new();

    let runner = two_steps()
        .with_runtime(runtime.handle().clone())
        .with_projection(|results: &[u32]| Ok(results.to_vec()));
    let id = runner.run((), store.dispatcher());

    let status = runtime.block_on(async { settle(&store, id).await });
    assert_eq!(status.data(), Some(&json!([1, 2])));
}
