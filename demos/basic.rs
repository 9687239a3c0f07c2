//! Basic usage example for deltatask.
//!
//! This example demonstrates:
//! - Implementing the Step trait for a custom step
//! - Planning steps from call arguments with a builder closure
//! - Projecting step results into the SUCCESS data
//! - Watching the store while a task runs
//! - Failure of a middle step stopping the task

use async_trait::async_trait;
use deltatask::{
    sync_step_fn, BoxedStep, BuildError, Dispatcher, Step, StepError, Store, TaskRunner,
};
use std::time::Duration;

/// Waits a moment, then doubles the most recent result.
struct DoubleStep {
    delay: Duration,
}

#[async_trait]
impl Step<i64> for DoubleStep {
    fn name(&self) -> &str {
        "double"
    }

    async fn execute(&self, previous: &[i64]) -> Result<i64, StepError> {
        tokio::time::sleep(self.delay).await;
        let last = previous
            .last()
            .copied()
            .ok_or_else(|| StepError::msg("nothing to double"))?;
        println!("[{}] {} -> {}", self.name(), last, last * 2);
        Ok(last * 2)
    }
}

/// Parses the input, then doubles it `times` times.
fn doubling_task() -> TaskRunner<(String, usize), i64> {
    TaskRunner::new(
        |(input, times): (String, usize),
         _: Dispatcher|
         -> Result<Vec<BoxedStep<i64>>, BuildError> {
            let mut steps: Vec<BoxedStep<i64>> = vec![sync_step_fn("parse", move |_: &[i64]| {
                input.trim().parse::<i64>().map_err(StepError::new)
            })];
            for _ in 0..times {
                steps.push(Box::new(DoubleStep {
                    delay: Duration::from_millis(50),
                }));
            }
            Ok(steps)
        },
    )
    .named("doubling")
    .with_projection(|results: &[i64]| Ok(results.to_vec()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== deltatask - Basic Example ===\n");

    let store = Store::new();
    let runner = doubling_task();

    println!("--- Example 1: Successful execution ---");
    let id = runner.run(("21".to_string(), 3), store.dispatcher());
    println!("Started task {id}");
    println!("Immediately after run: {}", serde_json::to_string(&store.task_status(&id))?);

    let status = store.settled(id).await;
    println!("Settled: {}\n", serde_json::to_string(&status)?);

    println!("--- Example 2: Invalid input (step failure) ---");
    let id = runner.run(("twenty-one".to_string(), 3), store.dispatcher());
    let status = store.settled(id).await;
    match status.error() {
        Some(error) => eprintln!("Expected failure: {error}\n"),
        None => println!("Unexpected success\n"),
    }

    println!("=== Examples complete ===");
    Ok(())
}
