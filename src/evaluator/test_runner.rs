// src/evaluator/test_runner.rs — Run the prompt under test against each pending case

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::limiter::{BatchReport, ConcurrencyLimiter};
use crate::core::templates;
use crate::provider::{ChatRequest, LanguageModel, TokenUsage};

/// One case awaiting output from the target model.
#[derive(Debug, Clone)]
pub struct TestJob {
    pub case_index: usize,
    pub input: String,
}

/// Result of one target-model call.
#[derive(Debug, Clone)]
pub enum TestOutcome {
    Output { text: String, usage: TokenUsage },
    /// The call failed; the batch continues.
    Failed { error: String },
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed { .. })
    }
}

pub struct TestRunner {
    model: Arc<dyn LanguageModel>,
    limiter: ConcurrencyLimiter,
}

impl TestRunner {
    pub fn new(model: Arc<dyn LanguageModel>, concurrency: usize) -> Self {
        Self {
            model,
            limiter: ConcurrencyLimiter::new(concurrency),
        }
    }

    /// Run `prompt` over `jobs`. Callers pass only cases lacking a result
    /// for the current iteration. `on_complete` fires per case as it
    /// finishes so results can be persisted one at a time.
    pub async fn run<C>(
        &self,
        prompt: &str,
        jobs: Vec<TestJob>,
        cancel: &CancellationToken,
        mut on_complete: C,
    ) -> BatchReport
    where
        C: FnMut(usize, TestOutcome),
    {
        self.limiter
            .run(
                jobs,
                cancel,
                |job: TestJob| self.execute(prompt, job),
                |job, outcome| on_complete(job.case_index, outcome),
            )
            .await
    }

    async fn execute(&self, prompt: &str, job: TestJob) -> TestOutcome {
        let request = ChatRequest::new(templates::test_messages(prompt, &job.input));
        match self.model.generate(request).await {
            Ok(response) => TestOutcome::Output {
                text: response.answer,
                usage: response.usage,
            },
            Err(e) => {
                tracing::warn!("Test case {} failed: {}", job.case_index, e);
                TestOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
