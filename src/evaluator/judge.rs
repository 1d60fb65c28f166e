// src/evaluator/judge.rs — Score (actual, expected) pairs with the optimization model

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::parser::parse_evaluation_reply;
use crate::core::limiter::{BatchReport, ConcurrencyLimiter};
use crate::core::templates::{self, EvaluationFacts};
use crate::core::types::{TestMode, MAX_SCORE, MIN_SCORE};
use crate::provider::{ChatRequest, LanguageModel, TokenUsage};

/// Comment attached to exact matches in strict mode.
pub const EXACT_MATCH_COMMENT: &str = "Output matches the expected output exactly";

/// One tested case awaiting a score.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub case_index: usize,
    pub input: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: u8,
    pub comment: String,
    pub usage: TokenUsage,
}

/// Strict-mode exact match: maximum score, no model call.
pub fn exact_match_verdict(mode: TestMode, job: &EvaluationJob) -> Option<Verdict> {
    (mode == TestMode::Strict && job.actual == job.expected).then(|| Verdict {
        score: MAX_SCORE,
        comment: EXACT_MATCH_COMMENT.to_string(),
        usage: TokenUsage::default(),
    })
}

pub struct Judge {
    model: Arc<dyn LanguageModel>,
    limiter: ConcurrencyLimiter,
}

impl Judge {
    pub fn new(model: Arc<dyn LanguageModel>, concurrency: usize) -> Self {
        Self {
            model,
            limiter: ConcurrencyLimiter::new(concurrency),
        }
    }

    /// Score every job. Exact matches resolve immediately; the rest go
    /// through the limiter with a cancellation check before each call.
    pub async fn evaluate<C>(
        &self,
        prompt: &str,
        mode: TestMode,
        jobs: Vec<EvaluationJob>,
        cancel: &CancellationToken,
        mut on_complete: C,
    ) -> BatchReport
    where
        C: FnMut(usize, Verdict),
    {
        let mut shortcut = 0;
        let mut remote = Vec::with_capacity(jobs.len());
        for job in jobs {
            match exact_match_verdict(mode, &job) {
                Some(verdict) => {
                    on_complete(job.case_index, verdict);
                    shortcut += 1;
                }
                None => remote.push(job),
            }
        }

        let mut report = self
            .limiter
            .run(
                remote,
                cancel,
                |job: EvaluationJob| self.score(prompt, mode, job),
                |job, verdict| on_complete(job.case_index, verdict),
            )
            .await;
        report.completed += shortcut;
        report
    }

    async fn score(&self, prompt: &str, mode: TestMode, job: EvaluationJob) -> Verdict {
        let facts = EvaluationFacts {
            prompt,
            input: &job.input,
            expected: &job.expected,
            actual: &job.actual,
            mode,
        };
        let messages = match templates::evaluation_messages(&facts, self.model.supports_reasoning()) {
            Ok(m) => m,
            Err(e) => return failed_verdict(job.case_index, &e.to_string()),
        };

        match self.model.generate(ChatRequest::new(messages)).await {
            Ok(response) => {
                let parsed = parse_evaluation_reply(&response.answer, mode);
                if !parsed.parsed {
                    tracing::warn!(
                        "Case {}: unparseable evaluation, using fallback score",
                        job.case_index
                    );
                }
                Verdict {
                    score: parsed.score,
                    comment: parsed.reason,
                    usage: response.usage,
                }
            }
            Err(e) => failed_verdict(job.case_index, &e.to_string()),
        }
    }
}

fn failed_verdict(case_index: usize, error: &str) -> Verdict {
    tracing::warn!("Evaluation of case {} failed: {}", case_index, error);
    Verdict {
        score: MIN_SCORE,
        comment: format!("Evaluation failed: {error}"),
        usage: TokenUsage::default(),
    }
}
