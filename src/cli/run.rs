// src/cli/run.rs — Run and feedback commands

use std::future::Future;
use std::sync::Arc;

use super::progress::{describe_outcome, terminal_progress};
use crate::core::engine::IterationEngine;
use crate::core::types::{RunOutcome, Task};
use crate::infra::config::Config;
use crate::infra::errors::OptimizerError;
use crate::infra::paths;
use crate::memory::SqliteTaskStore;
use crate::provider::registry::ModelRegistry;

/// Open the task database and build an engine over the configured models.
pub fn open_engine(config: &Config, quiet: bool) -> anyhow::Result<Arc<IterationEngine>> {
    paths::ensure_dirs()?;
    let store = SqliteTaskStore::open(&paths::db_path())?;
    let models = ModelRegistry::from_config(config);
    let mut engine = IterationEngine::new(Arc::new(store), models, config.engine.clone());
    if !quiet {
        engine = engine.with_progress(terminal_progress());
    }
    Ok(Arc::new(engine))
}

/// Start or resume a task in the foreground.
pub async fn run_task(engine: Arc<IterationEngine>, task_id: &str) -> anyhow::Result<()> {
    let outcome = with_ctrl_c(&engine, task_id, engine.start(task_id)).await;
    report(&engine, task_id, outcome)
}

/// Submit feedback for the waiting iteration and continue the run.
pub async fn run_feedback(
    engine: Arc<IterationEngine>,
    task_id: &str,
    iteration_id: Option<&str>,
    text: &str,
) -> anyhow::Result<()> {
    let iteration_id = match iteration_id {
        Some(id) => id.to_string(),
        None => {
            let task = engine.task(task_id)?;
            task.prompt_iterations
                .iter()
                .rev()
                .find(|it| it.waiting_for_feedback)
                .map(|it| it.id.clone())
                .ok_or_else(|| anyhow::anyhow!("Task {task_id} is not waiting for feedback"))?
        }
    };
    let outcome = with_ctrl_c(
        &engine,
        task_id,
        engine.submit_feedback(task_id, &iteration_id, text),
    )
    .await;
    report(&engine, task_id, outcome)
}

/// Drive `run`, turning the first Ctrl-C into a graceful stop.
async fn with_ctrl_c<F>(
    engine: &IterationEngine,
    task_id: &str,
    run: F,
) -> Result<RunOutcome, OptimizerError>
where
    F: Future<Output = Result<RunOutcome, OptimizerError>>,
{
    tokio::pin!(run);
    tokio::select! {
        res = &mut run => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("[stop] finishing in-flight calls, then pausing...");
            engine.stop(task_id);
            run.await
        }
    }
}

fn report(
    engine: &IterationEngine,
    task_id: &str,
    outcome: Result<RunOutcome, OptimizerError>,
) -> anyhow::Result<()> {
    let task = engine.task(task_id)?;
    match outcome {
        Ok(outcome) => {
            println!("{}", describe_outcome(&outcome));
            print_result(&task);
            Ok(())
        }
        Err(e) => {
            print_result(&task);
            Err(anyhow::anyhow!("Task paused after error: {e}"))
        }
    }
}

fn print_result(task: &Task) {
    let initial = task.prompt_iterations.first().and_then(|it| it.avg_score);
    if let Some(best) = task.best_iteration() {
        let best_score = best.avg_score.unwrap_or_default();
        match initial {
            Some(initial) => println!(
                "Score: {:.2} (initial) -> {:.2} (best, iteration {})",
                initial,
                best_score,
                best.iteration + 1
            ),
            None => println!("Best score: {:.2} (iteration {})", best_score, best.iteration + 1),
        }
        println!("\nBest prompt:\n{}", best.prompt);
    }
    println!(
        "\nTokens: target={} optimization={}",
        task.target_model_token_usage.total_tokens, task.optimization_model_token_usage.total_tokens
    );
    if let Some(waiting) = task.latest_iteration().filter(|it| it.waiting_for_feedback) {
        println!(
            "\nWaiting for feedback on iteration {}. Continue with:\n  promptkoi feedback {} \"<your guidance>\"",
            waiting.iteration + 1,
            task.id
        );
    }
}
