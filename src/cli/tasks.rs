// src/cli/tasks.rs — Create, list, show, delete and reset tasks

use std::path::Path;

use super::CreateArgs;
use crate::core::engine::IterationEngine;
use crate::core::token_budget::TokenBudget;
use crate::core::types::{CaseInput, Task, TaskOptions, TestSet};
use crate::infra::config::Config;
use crate::util::{excerpt, one_line};

/// Read a dataset: a JSON array of `{input, output}` objects, or one such
/// object per line (JSON Lines).
pub fn load_dataset(path: &Path) -> anyhow::Result<Vec<CaseInput>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read dataset {}: {e}", path.display()))?;
    parse_dataset(&content)
}

pub fn parse_dataset(content: &str) -> anyhow::Result<Vec<CaseInput>> {
    let trimmed = content.trim_start();
    let cases: Vec<CaseInput> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| anyhow::anyhow!("Dataset line {}: {e}", n + 1))
            })
            .collect::<anyhow::Result<_>>()?
    };
    if cases.is_empty() {
        anyhow::bail!("Dataset has no cases");
    }
    Ok(cases)
}

pub fn create_task(
    engine: &IterationEngine,
    config: &Config,
    args: &CreateArgs,
) -> anyhow::Result<Task> {
    let prompt = match (&args.prompt, &args.prompt_file) {
        (Some(p), _) => p.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => anyhow::bail!("Provide --prompt or --prompt-file"),
    };
    for id in [&args.target, &args.optimizer] {
        if config.model(id).is_none() {
            tracing::warn!("Model '{}' is not in the config yet; `run` will fail until it is", id);
        }
    }

    let test_set = TestSet {
        mode: args.mode.into(),
        data: load_dataset(&args.dataset)?,
    };
    let options = TaskOptions {
        max_iterations: args
            .max_iterations
            .unwrap_or(config.engine.default_max_iterations),
        token_budget: args.token_budget,
        target_model_id: Some(args.target.clone()),
        optimization_model_id: Some(args.optimizer.clone()),
        require_user_feedback: args.require_feedback,
        concurrent_calls: args.concurrency.unwrap_or(config.engine.default_concurrency),
    };
    let task = engine.create_task(&args.name, test_set, &prompt, options)?;
    println!("Created task {} ({} cases)", task.id, task.test_cases.len());
    Ok(task)
}

pub fn list_tasks(engine: &IterationEngine) -> anyhow::Result<()> {
    let tasks = engine.tasks()?;
    if tasks.is_empty() {
        println!("No tasks. Create one with `promptkoi create`.");
        return Ok(());
    }
    println!(
        "{:<36}  {:<22}  {:>5}  {:>5}  NAME",
        "ID", "STATUS", "ITERS", "BEST"
    );
    for task in &tasks {
        let best = task
            .best_iteration()
            .and_then(|it| it.avg_score)
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<36}  {:<22}  {:>5}  {:>5}  {}",
            task.id,
            task.status.to_string(),
            task.prompt_iterations.len(),
            best,
            task.name
        );
    }
    Ok(())
}

pub fn show_task(engine: &IterationEngine, task_id: &str, with_cases: bool) -> anyhow::Result<()> {
    let task = engine.task(task_id)?;
    println!("{} ({})", task.name, task.id);
    println!("  status:      {}", task.status);
    println!("  mode:        {}", task.mode());
    println!(
        "  models:      target={} optimizer={}",
        task.target_model_id.as_deref().unwrap_or("-"),
        task.optimization_model_id.as_deref().unwrap_or("-")
    );
    println!("  iterations:  {} / {}", task.prompt_iterations.len(), task.max_iterations);
    println!("  tokens:      {}", budget_line(&TokenBudget::for_task(&task)));
    if let Some(ref err) = task.last_error {
        println!("  last error:  {}", err);
    }

    for it in &task.prompt_iterations {
        let score = it
            .avg_score
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "\n#{} [{}] avg={}{}",
            it.iteration + 1,
            it.stage,
            score,
            if it.waiting_for_feedback {
                " (waiting for feedback)"
            } else {
                ""
            }
        );
        println!("  id:       {}", it.id);
        println!("  prompt:   {}", excerpt(&one_line(&it.prompt), 200));
        if !it.report_summary.is_empty() {
            println!("  report:   {}", excerpt(&one_line(&it.report_summary), 200));
        }
        if let Some(ref fb) = it.user_feedback {
            println!("  feedback: {}", fb);
        }
    }

    if with_cases {
        if let Some(latest) = task.latest_iteration() {
            println!("\nCases (iteration {}):", latest.iteration + 1);
            for case in &task.test_cases {
                let (output, score) = match case.result(latest.iteration) {
                    Some(r) => (
                        excerpt(&one_line(&r.output), 60),
                        r.score.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                    ),
                    None => ("(pending)".to_string(), "-".to_string()),
                };
                println!(
                    "  #{:<3} score={}  input={}  output={}",
                    case.index,
                    score,
                    excerpt(&one_line(&case.input), 40),
                    output
                );
            }
        }
    }
    Ok(())
}

/// Spent tokens, plus what is left when the task is capped.
fn budget_line(budget: &TokenBudget) -> String {
    match (budget.remaining(), budget.used_fraction()) {
        (Some(left), Some(used)) => {
            format!("{budget} ({left} remaining, {:.0}% used)", used * 100.0)
        }
        _ => budget.to_string(),
    }
}

pub fn delete_task(engine: &IterationEngine, task_id: &str) -> anyhow::Result<()> {
    if engine.delete_task(task_id)? {
        println!("Deleted task {task_id}");
    } else {
        println!("No task {task_id}");
    }
    Ok(())
}

pub fn reset_task(engine: &IterationEngine, task_id: &str) -> anyhow::Result<()> {
    let task = engine.reset_task(task_id)?;
    println!("Reset task {} to its initial prompt", task.id);
    Ok(())
}

pub fn list_models(config: &Config) {
    if config.models.is_empty() {
        println!("No models configured. Add [[models]] entries to config.toml.");
        return;
    }
    for m in &config.models {
        let key = if m.resolve_api_key().is_some() {
            "key ok"
        } else {
            "no key"
        };
        println!(
            "{:<16} {:<28} {}{} ({})",
            m.id,
            m.display_name(),
            m.base_url,
            if m.reasoning { " [reasoning]" } else { "" },
            key
        );
    }
}
