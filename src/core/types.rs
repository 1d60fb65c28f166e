// src/core/types.rs — Core domain types
//
// The Task is the only durable state. Every mutation the engine performs is
// one of the small named operations below, applied through the store's
// atomic update so concurrent completions never touch unrelated fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::token_budget::TokenBudget;
use crate::provider::TokenUsage;

pub const MAX_SCORE: u8 = 5;
pub const MIN_SCORE: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Strict,
    Descriptive,
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestMode::Strict => write!(f, "strict"),
            TestMode::Descriptive => write!(f, "descriptive"),
        }
    }
}

/// One input/expected pair as supplied by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseInput {
    pub input: String,
    #[serde(alias = "expected_output", alias = "expectedOutput")]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSet {
    pub mode: TestMode,
    pub data: Vec<CaseInput>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    MaxIterationsReached,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::MaxIterationsReached => "max_iterations_reached",
        };
        write!(f, "{s}")
    }
}

/// Per-iteration stage. Ordering is the pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    Generated,
    Tested,
    Evaluated,
    Summarized,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::NotStarted => "not_started",
            Stage::Generated => "generated",
            Stage::Tested => "tested",
            Stage::Evaluated => "evaluated",
            Stage::Summarized => "summarized",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub id: String,
    pub iteration: u32,
    pub prompt: String,
    pub stage: Stage,
    pub avg_score: Option<f64>,
    pub report_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,
    pub waiting_for_feedback: bool,
}

impl Iteration {
    pub fn new(iteration: u32, prompt: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            iteration,
            prompt: prompt.into(),
            stage,
            avg_score: None,
            report_summary: String::new(),
            user_feedback: None,
            waiting_for_feedback: false,
        }
    }
}

/// Result of one test case under one iteration's prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub iteration: u32,
    pub output: String,
    /// `None` until evaluated. Must stay `None` across a round-trip.
    pub score: Option<u8>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub index: usize,
    pub input: String,
    pub expected_output: String,
    pub iteration_results: Vec<CaseResult>,
}

impl TestCase {
    pub fn result(&self, iteration: u32) -> Option<&CaseResult> {
        self.iteration_results
            .iter()
            .find(|r| r.iteration == iteration)
    }

    fn upsert(&mut self, result: CaseResult) {
        match self
            .iteration_results
            .iter_mut()
            .find(|r| r.iteration == result.iteration)
        {
            Some(existing) => *existing = result,
            None => self.iteration_results.push(result),
        }
    }
}

/// Which model a token delta is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenChannel {
    Target,
    Optimization,
}

/// Options supplied when creating a task.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub max_iterations: u32,
    pub token_budget: Option<u64>,
    pub target_model_id: Option<String>,
    pub optimization_model_id: Option<String>,
    pub require_user_feedback: bool,
    pub concurrent_calls: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            token_budget: None,
            target_model_id: None,
            optimization_model_id: None,
            require_user_feedback: false,
            concurrent_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub test_set: TestSet,
    pub max_iterations: u32,
    #[serde(default)]
    pub token_budget: Option<u64>,
    pub target_model_token_usage: TokenUsage,
    pub optimization_model_token_usage: TokenUsage,
    pub status: TaskStatus,
    #[serde(default)]
    pub target_model_id: Option<String>,
    #[serde(default)]
    pub optimization_model_id: Option<String>,
    pub require_user_feedback: bool,
    pub concurrent_calls: usize,
    pub test_cases: Vec<TestCase>,
    pub prompt_iterations: Vec<Iteration>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a task whose iteration 0 carries the user's prompt, ready to test.
    pub fn new(
        name: impl Into<String>,
        test_set: TestSet,
        initial_prompt: impl Into<String>,
        options: TaskOptions,
    ) -> Self {
        let test_cases = test_set
            .data
            .iter()
            .enumerate()
            .map(|(index, case)| TestCase {
                id: uuid::Uuid::new_v4().to_string(),
                index,
                input: case.input.clone(),
                expected_output: case.output.clone(),
                iteration_results: Vec::new(),
            })
            .collect();
        let now = Utc::now();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            test_set,
            max_iterations: options.max_iterations.max(1),
            token_budget: options.token_budget,
            target_model_token_usage: TokenUsage::default(),
            optimization_model_token_usage: TokenUsage::default(),
            status: TaskStatus::NotStarted,
            target_model_id: options.target_model_id,
            optimization_model_id: options.optimization_model_id,
            require_user_feedback: options.require_user_feedback,
            concurrent_calls: options.concurrent_calls.max(1),
            test_cases,
            prompt_iterations: vec![Iteration::new(0, initial_prompt, Stage::Generated)],
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mode(&self) -> TestMode {
        self.test_set.mode
    }

    pub fn latest_iteration(&self) -> Option<&Iteration> {
        self.prompt_iterations.last()
    }

    pub fn iteration(&self, index: u32) -> Option<&Iteration> {
        self.prompt_iterations.iter().find(|it| it.iteration == index)
    }

    fn iteration_mut(&mut self, index: u32) -> Option<&mut Iteration> {
        self.prompt_iterations
            .iter_mut()
            .find(|it| it.iteration == index)
    }

    pub fn iteration_by_id(&self, id: &str) -> Option<&Iteration> {
        self.prompt_iterations.iter().find(|it| it.id == id)
    }

    // ─── Derived state ──────────────────────────────────────────

    /// Case indices with no result yet for `iteration`.
    pub fn pending_test_cases(&self, iteration: u32) -> Vec<usize> {
        self.test_cases
            .iter()
            .filter(|c| c.result(iteration).is_none())
            .map(|c| c.index)
            .collect()
    }

    /// Case indices that have output for `iteration` but no score.
    pub fn pending_evaluations(&self, iteration: u32) -> Vec<usize> {
        self.test_cases
            .iter()
            .filter(|c| matches!(c.result(iteration), Some(r) if r.score.is_none()))
            .map(|c| c.index)
            .collect()
    }

    pub fn is_tested(&self, iteration: u32) -> bool {
        self.test_cases.iter().all(|c| c.result(iteration).is_some())
    }

    pub fn is_evaluated(&self, iteration: u32) -> bool {
        self.test_cases
            .iter()
            .all(|c| matches!(c.result(iteration), Some(r) if r.score.is_some()))
    }

    /// Mean score over every case, `None` unless all are scored.
    pub fn average_score(&self, iteration: u32) -> Option<f64> {
        if self.test_cases.is_empty() || !self.is_evaluated(iteration) {
            return None;
        }
        let sum: u32 = self
            .test_cases
            .iter()
            .filter_map(|c| c.result(iteration).and_then(|r| r.score))
            .map(u32::from)
            .sum();
        Some(f64::from(sum) / self.test_cases.len() as f64)
    }

    pub fn all_perfect(&self, iteration: u32) -> bool {
        !self.test_cases.is_empty()
            && self
                .test_cases
                .iter()
                .all(|c| matches!(c.result(iteration), Some(r) if r.score == Some(MAX_SCORE)))
    }

    pub fn total_tokens(&self) -> u64 {
        self.target_model_token_usage.total_tokens
            + self.optimization_model_token_usage.total_tokens
    }

    pub fn budget_exhausted(&self) -> bool {
        TokenBudget::for_task(self).is_exhausted()
    }

    /// Iteration with the highest average score (earliest wins ties).
    pub fn best_iteration(&self) -> Option<&Iteration> {
        self.prompt_iterations
            .iter()
            .filter(|it| it.avg_score.is_some())
            .fold(None, |best: Option<&Iteration>, it| match best {
                Some(b) if b.avg_score >= it.avg_score => Some(b),
                _ => Some(it),
            })
    }

    // ─── Named mutations ────────────────────────────────────────

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    /// Add one call's usage to the channel's running totals.
    pub fn record_usage(&mut self, channel: TokenChannel, usage: &TokenUsage) {
        match channel {
            TokenChannel::Target => self.target_model_token_usage.accumulate(usage),
            TokenChannel::Optimization => self.optimization_model_token_usage.accumulate(usage),
        }
        self.touch();
    }

    /// Record the target model's output for a case, awaiting evaluation.
    pub fn set_case_output(&mut self, case_index: usize, iteration: u32, output: String) {
        if let Some(case) = self.test_cases.get_mut(case_index) {
            case.upsert(CaseResult {
                iteration,
                output,
                score: None,
                comment: String::new(),
            });
            self.touch();
        }
    }

    /// Record a failed target call: error text as output, minimum score.
    pub fn set_case_failure(&mut self, case_index: usize, iteration: u32, error: &str) {
        if let Some(case) = self.test_cases.get_mut(case_index) {
            case.upsert(CaseResult {
                iteration,
                output: format!("Error: {error}"),
                score: Some(MIN_SCORE),
                comment: format!("Execution failed: {error}"),
            });
            self.touch();
        }
    }

    /// Attach a score to an existing result. No-op if the case has no output.
    pub fn set_case_score(&mut self, case_index: usize, iteration: u32, score: u8, comment: String) {
        let Some(case) = self.test_cases.get_mut(case_index) else {
            return;
        };
        if let Some(result) = case
            .iteration_results
            .iter_mut()
            .find(|r| r.iteration == iteration)
        {
            result.score = Some(score.clamp(MIN_SCORE, MAX_SCORE));
            result.comment = comment;
            self.touch();
        }
    }

    /// Move an iteration forward. Returns false if that would not advance it.
    pub fn advance_stage(&mut self, iteration: u32, stage: Stage) -> bool {
        let advanced = match self.iteration_mut(iteration) {
            Some(it) if stage > it.stage => {
                it.stage = stage;
                true
            }
            _ => false,
        };
        if advanced {
            self.touch();
        }
        advanced
    }

    pub fn set_prompt(&mut self, iteration: u32, prompt: String) {
        if let Some(it) = self.iteration_mut(iteration) {
            it.prompt = prompt;
            self.touch();
        }
    }

    pub fn set_report(&mut self, iteration: u32, report: String) {
        if let Some(it) = self.iteration_mut(iteration) {
            it.report_summary = report;
            self.touch();
        }
    }

    pub fn set_avg_score(&mut self, iteration: u32, avg: f64) {
        if let Some(it) = self.iteration_mut(iteration) {
            it.avg_score = Some(avg);
            self.touch();
        }
    }

    pub fn set_waiting_for_feedback(&mut self, iteration: u32, waiting: bool) {
        if let Some(it) = self.iteration_mut(iteration) {
            it.waiting_for_feedback = waiting;
            self.touch();
        }
    }

    pub fn set_feedback(&mut self, iteration: u32, feedback: Option<String>) {
        if let Some(it) = self.iteration_mut(iteration) {
            it.user_feedback = feedback;
            it.waiting_for_feedback = false;
            self.touch();
        }
    }

    /// Append the next iteration in `not_started`. Returns its ordinal.
    pub fn append_iteration(&mut self) -> u32 {
        let next = self
            .prompt_iterations
            .last()
            .map(|it| it.iteration + 1)
            .unwrap_or(0);
        self.prompt_iterations
            .push(Iteration::new(next, String::new(), Stage::NotStarted));
        self.touch();
        next
    }

    /// Discard all progress and return to the user's initial prompt.
    pub fn reset(&mut self) {
        let initial = self
            .prompt_iterations
            .first()
            .map(|it| it.prompt.clone())
            .unwrap_or_default();
        self.prompt_iterations = vec![Iteration::new(0, initial, Stage::Generated)];
        for case in &mut self.test_cases {
            case.iteration_results.clear();
        }
        self.target_model_token_usage = TokenUsage::default();
        self.optimization_model_token_usage = TokenUsage::default();
        self.last_error = None;
        self.set_status(TaskStatus::NotStarted);
    }
}

/// Why a run stopped without finishing the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Cancelled,
    AwaitingFeedback,
    BudgetExhausted,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::Cancelled => write!(f, "stopped by user"),
            PauseReason::AwaitingFeedback => write!(f, "awaiting feedback"),
            PauseReason::BudgetExhausted => write!(f, "token budget exhausted"),
        }
    }
}

/// How a call to `start` ended. Unexpected failures are returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    MaxIterationsReached,
    Paused(PauseReason),
}

impl RunOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            RunOutcome::Completed => TaskStatus::Completed,
            RunOutcome::MaxIterationsReached => TaskStatus::MaxIterationsReached,
            RunOutcome::Paused(_) => TaskStatus::Paused,
        }
    }
}

/// Fire-and-forget progress notifications.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    IterationStart {
        task_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    StageAdvanced {
        task_id: String,
        iteration: u32,
        stage: Stage,
    },
    CaseTested {
        task_id: String,
        iteration: u32,
        case_index: usize,
        failed: bool,
    },
    CaseEvaluated {
        task_id: String,
        iteration: u32,
        case_index: usize,
        score: u8,
    },
    Finished {
        task_id: String,
        outcome: RunOutcome,
        total_tokens: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strict_set(n: usize) -> TestSet {
        TestSet {
            mode: TestMode::Strict,
            data: (0..n)
                .map(|i| CaseInput {
                    input: format!("in-{i}"),
                    output: format!("out-{i}"),
                })
                .collect(),
        }
    }

    fn task(n: usize) -> Task {
        Task::new("t", strict_set(n), "Echo the input.", TaskOptions::default())
    }

    #[test]
    fn test_new_task_has_generated_initial_iteration() {
        let t = task(3);
        assert_eq!(t.status, TaskStatus::NotStarted);
        assert_eq!(t.prompt_iterations.len(), 1);
        let it0 = &t.prompt_iterations[0];
        assert_eq!(it0.iteration, 0);
        assert_eq!(it0.stage, Stage::Generated);
        assert_eq!(it0.prompt, "Echo the input.");
        assert_eq!(t.test_cases.len(), 3);
        assert_eq!(t.test_cases[2].index, 2);
        assert_eq!(t.test_cases[2].expected_output, "out-2");
    }

    #[test]
    fn test_pending_and_tested() {
        let mut t = task(3);
        assert_eq!(t.pending_test_cases(0), vec![0, 1, 2]);
        t.set_case_output(1, 0, "x".into());
        assert_eq!(t.pending_test_cases(0), vec![0, 2]);
        assert!(!t.is_tested(0));
        t.set_case_output(0, 0, "y".into());
        t.set_case_failure(2, 0, "timeout");
        assert!(t.is_tested(0));
        // Failure already carries a score, so only 0 and 1 await evaluation
        assert_eq!(t.pending_evaluations(0), vec![0, 1]);
    }

    #[test]
    fn test_average_requires_all_scored() {
        let mut t = task(2);
        t.set_case_output(0, 0, "a".into());
        t.set_case_output(1, 0, "b".into());
        t.set_case_score(0, 0, 4, "ok".into());
        assert_eq!(t.average_score(0), None);
        t.set_case_score(1, 0, 5, "great".into());
        assert_eq!(t.average_score(0), Some(4.5));
        assert!(!t.all_perfect(0));
    }

    #[test]
    fn test_all_perfect() {
        let mut t = task(2);
        for i in 0..2 {
            t.set_case_output(i, 0, "a".into());
            t.set_case_score(i, 0, MAX_SCORE, "match".into());
        }
        assert!(t.all_perfect(0));
        assert!(!t.all_perfect(1));
    }

    #[test]
    fn test_set_score_without_output_is_noop() {
        let mut t = task(1);
        t.set_case_score(0, 0, 5, "x".into());
        assert!(t.test_cases[0].iteration_results.is_empty());
    }

    #[test]
    fn test_score_is_clamped() {
        let mut t = task(1);
        t.set_case_output(0, 0, "a".into());
        t.set_case_score(0, 0, 9, "x".into());
        assert_eq!(t.test_cases[0].result(0).unwrap().score, Some(5));
    }

    #[test]
    fn test_stage_never_regresses() {
        let mut t = task(1);
        assert!(t.advance_stage(0, Stage::Tested));
        assert!(!t.advance_stage(0, Stage::Generated));
        assert!(!t.advance_stage(0, Stage::Tested));
        assert_eq!(t.prompt_iterations[0].stage, Stage::Tested);
    }

    #[test]
    fn test_append_iteration() {
        let mut t = task(1);
        let next = t.append_iteration();
        assert_eq!(next, 1);
        let it = t.latest_iteration().unwrap();
        assert_eq!(it.stage, Stage::NotStarted);
        assert!(it.prompt.is_empty());
        assert!(it.avg_score.is_none());
    }

    #[test]
    fn test_record_usage_per_channel() {
        let mut t = task(1);
        t.record_usage(TokenChannel::Target, &TokenUsage::new(10, 5));
        t.record_usage(TokenChannel::Optimization, &TokenUsage::new(100, 50));
        t.record_usage(TokenChannel::Target, &TokenUsage::new(1, 1));
        assert_eq!(t.target_model_token_usage.total_tokens, 17);
        assert_eq!(t.optimization_model_token_usage.total_tokens, 150);
        assert_eq!(t.total_tokens(), 167);
    }

    #[test]
    fn test_budget_exhausted() {
        let mut t = task(1);
        assert!(!t.budget_exhausted());
        t.token_budget = Some(100);
        t.record_usage(TokenChannel::Target, &TokenUsage::new(60, 40));
        assert!(t.budget_exhausted());
    }

    #[test]
    fn test_best_iteration_prefers_earliest_on_tie() {
        let mut t = task(1);
        t.append_iteration();
        t.append_iteration();
        t.set_avg_score(0, 3.0);
        t.set_avg_score(1, 4.0);
        t.set_avg_score(2, 4.0);
        assert_eq!(t.best_iteration().unwrap().iteration, 1);
    }

    #[test]
    fn test_feedback_clears_waiting_flag() {
        let mut t = task(1);
        t.set_waiting_for_feedback(0, true);
        t.set_feedback(0, Some("improve clarity".into()));
        let it = &t.prompt_iterations[0];
        assert!(!it.waiting_for_feedback);
        assert_eq!(it.user_feedback.as_deref(), Some("improve clarity"));
    }

    #[test]
    fn test_reset_returns_to_initial_prompt() {
        let mut t = task(2);
        t.set_case_output(0, 0, "a".into());
        t.append_iteration();
        t.record_usage(TokenChannel::Target, &TokenUsage::new(1, 1));
        t.set_status(TaskStatus::Paused);
        t.reset();
        assert_eq!(t.prompt_iterations.len(), 1);
        assert_eq!(t.prompt_iterations[0].prompt, "Echo the input.");
        assert!(t.test_cases[0].iteration_results.is_empty());
        assert_eq!(t.total_tokens(), 0);
        assert_eq!(t.status, TaskStatus::NotStarted);
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_null_scores_and_stage_strings() {
        let mut t = task(2);
        t.set_case_output(0, 0, "a".into());
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"score\":null"));
        assert!(json.contains("\"stage\":\"generated\""));
        assert!(json.contains("\"status\":\"not_started\""));
        assert!(json.contains("\"mode\":\"strict\""));

        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.test_cases[0].result(0).unwrap().score, None);
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            TaskStatus::NotStarted,
            TaskStatus::InProgress,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::MaxIterationsReached,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
