// src/core/rewriter.rs — Produce the next prompt from iteration history

use std::sync::Arc;
use std::time::Duration;

use super::streaming::{drain_stream, tagged_final, tagged_preview};
use super::templates::{self, CaseDigest, HistoryEntry, OptimizationFacts};
use super::types::Task;
use crate::infra::errors::OptimizerError;
use crate::provider::{ChatRequest, LanguageModel, TokenUsage};

/// Per-field cap for case text shown to the rewriter.
const CASE_EXCERPT: usize = 500;
/// Cases from the latest evaluation shown to the rewriter.
const REWRITE_CASES: usize = 10;

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub prompt: String,
    pub usage: TokenUsage,
}

pub struct Rewriter {
    model: Arc<dyn LanguageModel>,
    flush_every: Duration,
}

impl Rewriter {
    pub fn new(model: Arc<dyn LanguageModel>, flush_every: Duration) -> Self {
        Self { model, flush_every }
    }

    /// Write the prompt for iteration `iteration` (>= 1) of `task`.
    ///
    /// Uses the previous iteration's prompt, report, feedback and case
    /// results, plus every earlier iteration as history. An empty reply
    /// keeps the previous prompt.
    pub async fn rewrite<F>(
        &self,
        task: &Task,
        iteration: u32,
        mut on_partial: F,
    ) -> Result<Rewrite, OptimizerError>
    where
        F: FnMut(&str),
    {
        let previous = iteration
            .checked_sub(1)
            .and_then(|i| task.iteration(i))
            .ok_or_else(|| OptimizerError::IterationNotFound {
                task_id: task.id.clone(),
                iteration_id: format!("#{}", iteration.saturating_sub(1)),
            })?;

        let history = task
            .prompt_iterations
            .iter()
            .filter(|it| it.iteration < previous.iteration)
            .map(|it| HistoryEntry {
                iteration: it.iteration,
                prompt: it.prompt.clone(),
                avg_score: it.avg_score.map(|s| format!("{s:.2}")),
                report: it.report_summary.clone(),
                feedback: it.user_feedback.clone(),
            })
            .collect();
        let current_results = templates::select_cases(
            task.test_cases
                .iter()
                .filter_map(|c| CaseDigest::from_case(c, previous.iteration, CASE_EXCERPT))
                .collect(),
            REWRITE_CASES,
        );
        let current_avg = previous
            .avg_score
            .or_else(|| task.average_score(previous.iteration))
            .map(|s| format!("{s:.2}"));

        let facts = OptimizationFacts {
            previous_prompt: &previous.prompt,
            previous_report: &previous.report_summary,
            feedback: previous.user_feedback.as_deref(),
            mode: task.mode(),
            history,
            current_results,
            current_avg,
        };
        let messages = templates::optimization_messages(&facts, self.model.supports_reasoning())?;

        let stream = self
            .model
            .generate_stream(ChatRequest::new(messages))
            .await?;
        let outcome = drain_stream(stream, self.flush_every, |thought, answer| {
            if let Some(preview) = tagged_preview(thought, answer, "Prompt") {
                on_partial(&preview);
            }
        })
        .await?;

        let mut prompt = tagged_final(&outcome.answer, "Prompt");
        if prompt.is_empty() {
            tracing::warn!(
                "Rewrite for iteration {} came back empty, keeping previous prompt",
                iteration
            );
            prompt = previous.prompt.clone();
        }

        Ok(Rewrite {
            prompt,
            usage: outcome.usage,
        })
    }
}
