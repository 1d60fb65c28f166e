// src/core/summarizer.rs — Streaming evaluation report

use std::sync::Arc;
use std::time::Duration;

use super::streaming::{drain_stream, tagged_final, tagged_preview};
use super::templates::{self, CaseDigest, SummaryFacts};
use super::types::{Task, MAX_SCORE};
use crate::infra::errors::OptimizerError;
use crate::provider::{ChatRequest, LanguageModel, TokenUsage};

/// Cases shown to the model per summary.
const SUMMARY_CASES: usize = 5;
const INPUT_EXCERPT: usize = 50;
const COMMENT_EXCERPT: usize = 100;

#[derive(Debug, Clone)]
pub struct Summary {
    pub report: String,
    pub usage: TokenUsage,
}

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    flush_every: Duration,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>, flush_every: Duration) -> Self {
        Self { model, flush_every }
    }

    /// Summarize a fully evaluated iteration. `on_partial` receives the
    /// live report preview while the reply streams in.
    pub async fn summarize<F>(
        &self,
        task: &Task,
        iteration: u32,
        mut on_partial: F,
    ) -> Result<Summary, OptimizerError>
    where
        F: FnMut(&str),
    {
        let prompt = task
            .iteration(iteration)
            .map(|it| it.prompt.as_str())
            .unwrap_or_default();
        let digests: Vec<CaseDigest> = task
            .test_cases
            .iter()
            .filter_map(|c| CaseDigest::from_case(c, iteration, COMMENT_EXCERPT))
            .map(|mut d| {
                d.input = crate::util::excerpt(&d.input, INPUT_EXCERPT);
                d
            })
            .collect();
        let perfect_cases = digests
            .iter()
            .filter(|d| d.score == Some(MAX_SCORE))
            .count();
        let avg = task.average_score(iteration).unwrap_or(0.0);

        let facts = SummaryFacts {
            prompt,
            mode: task.mode(),
            total_cases: task.test_cases.len(),
            perfect_cases,
            avg_score: format!("{avg:.2}"),
            cases: templates::select_cases(digests, SUMMARY_CASES),
        };
        let messages = templates::summary_messages(&facts, self.model.supports_reasoning())?;

        let stream = self
            .model
            .generate_stream(ChatRequest::new(messages))
            .await?;
        let outcome = drain_stream(stream, self.flush_every, |thought, answer| {
            if let Some(preview) = tagged_preview(thought, answer, "Summary") {
                on_partial(&preview);
            }
        })
        .await?;

        let report = tagged_final(&outcome.answer, "Summary");
        if report.is_empty() {
            tracing::warn!("Summary reply was empty");
        }
        Ok(Summary {
            report,
            usage: outcome.usage,
        })
    }
}
