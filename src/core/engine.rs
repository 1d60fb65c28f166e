// src/core/engine.rs — Iteration engine: per-task state machine
//
// Drives generate → test → evaluate → summarize → decide for one task at a
// time per task id. All durable state lives in the TaskStore and is re-read
// at every decision point, so a stopped or crashed run resumes at the exact
// stage it left, reusing every persisted case result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::rewriter::Rewriter;
use super::summarizer::Summarizer;
use super::types::*;
use crate::evaluator::{EvaluationJob, Judge, TestJob, TestOutcome, TestRunner};
use crate::infra::config::EngineSettings;
use crate::infra::errors::OptimizerError;
use crate::memory::TaskStore;
use crate::provider::registry::ModelRegistry;
use crate::provider::LanguageModel;

type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Models resolved for one run.
struct RunModels {
    target: Arc<dyn LanguageModel>,
    optimizer: Arc<dyn LanguageModel>,
}

pub struct IterationEngine {
    store: Arc<dyn TaskStore>,
    models: ModelRegistry,
    settings: EngineSettings,
    /// Cancellation tokens of runs currently in flight, by task id.
    running: Mutex<HashMap<String, CancellationToken>>,
    on_progress: Option<ProgressCallback>,
}

/// Removes a run's token when the run ends, however it ends.
struct RunRegistration<'a> {
    running: &'a Mutex<HashMap<String, CancellationToken>>,
    task_id: String,
}

impl Drop for RunRegistration<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.task_id);
    }
}

impl IterationEngine {
    pub fn new(store: Arc<dyn TaskStore>, models: ModelRegistry, settings: EngineSettings) -> Self {
        Self {
            store,
            models,
            settings,
            running: Mutex::new(HashMap::new()),
            on_progress: None,
        }
    }

    /// Set a callback for progress events. Delivery is fire-and-forget.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    fn flush_every(&self) -> Duration {
        Duration::from_millis(self.settings.stream_flush_ms)
    }

    // ─── Task lifecycle ─────────────────────────────────────────

    /// Persist a new task. Its initial prompt is iteration 0, ready to test.
    pub fn create_task(
        &self,
        name: &str,
        test_set: TestSet,
        initial_prompt: &str,
        options: TaskOptions,
    ) -> Result<Task, OptimizerError> {
        if test_set.data.is_empty() {
            return Err(OptimizerError::Configuration(
                "test set has no cases".into(),
            ));
        }
        if initial_prompt.trim().is_empty() {
            return Err(OptimizerError::Configuration(
                "initial prompt is empty".into(),
            ));
        }
        let task = Task::new(name, test_set, initial_prompt, options);
        self.store.save(&task)?;
        tracing::info!("Created task {} ({} cases)", task.id, task.test_cases.len());
        Ok(task)
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub fn task(&self, task_id: &str) -> Result<Task, OptimizerError> {
        self.store.load(task_id)
    }

    pub fn tasks(&self) -> Result<Vec<Task>, OptimizerError> {
        self.store.list()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }

    pub fn delete_task(&self, task_id: &str) -> Result<bool, OptimizerError> {
        if self.is_running(task_id) {
            return Err(OptimizerError::AlreadyRunning {
                task_id: task_id.to_string(),
            });
        }
        self.store.delete(task_id)
    }

    /// Discard all iterations after the initial one and all results.
    pub fn reset_task(&self, task_id: &str) -> Result<Task, OptimizerError> {
        if self.is_running(task_id) {
            return Err(OptimizerError::AlreadyRunning {
                task_id: task_id.to_string(),
            });
        }
        self.store.update(task_id, &mut |t| t.reset())
    }

    // ─── Run control ────────────────────────────────────────────

    /// Request a cooperative stop. In-flight calls finish and are persisted;
    /// nothing new is dispatched. Returns false if the task is not running.
    pub fn stop(&self, task_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(task_id) {
            Some(token) => {
                tracing::info!("Stop requested for task {}", task_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Record feedback on an iteration that is waiting for it, then resume.
    pub async fn submit_feedback(
        &self,
        task_id: &str,
        iteration_id: &str,
        text: &str,
    ) -> Result<RunOutcome, OptimizerError> {
        let task = self.store.load(task_id)?;
        let iteration = task.iteration_by_id(iteration_id).ok_or_else(|| {
            OptimizerError::IterationNotFound {
                task_id: task_id.to_string(),
                iteration_id: iteration_id.to_string(),
            }
        })?;
        if !iteration.waiting_for_feedback {
            return Err(OptimizerError::NotAwaitingFeedback {
                iteration_id: iteration_id.to_string(),
            });
        }
        let index = iteration.iteration;
        let feedback = text.trim().to_string();
        self.store.update(task_id, &mut |t| {
            t.set_feedback(index, Some(feedback.clone()).filter(|f| !f.is_empty()))
        })?;
        self.start(task_id).await
    }

    /// Run the task until it completes, hits its iteration cap, or pauses.
    ///
    /// Cancellation and feedback gates are normal exits reported through
    /// [`RunOutcome::Paused`]. Any other failure leaves the task paused with
    /// the message in `last_error` and is returned as `Err`.
    pub async fn start(&self, task_id: &str) -> Result<RunOutcome, OptimizerError> {
        let task = self.store.load(task_id)?;
        let models = RunModels {
            target: self
                .models
                .resolve(task.target_model_id.as_deref(), "target")?,
            optimizer: self
                .models
                .resolve(task.optimization_model_id.as_deref(), "optimization")?,
        };

        let cancel = CancellationToken::new();
        let _registration = self.register(task_id, cancel.clone())?;

        self.store.update(task_id, &mut |t| {
            t.last_error = None;
            // Starting while feedback is pending continues without it
            if let Some(idx) = t
                .latest_iteration()
                .filter(|it| it.waiting_for_feedback)
                .map(|it| it.iteration)
            {
                t.set_waiting_for_feedback(idx, false);
            }
            t.set_status(TaskStatus::InProgress);
        })?;
        tracing::info!("Task {} started", task_id);

        let result = self.drive(task_id, &cancel, &models).await;
        let result = match result {
            Err(e) if e.is_cancellation() => Ok(RunOutcome::Paused(PauseReason::Cancelled)),
            other => other,
        };

        let final_update = match &result {
            Ok(outcome) => {
                let outcome = *outcome;
                self.store.update(task_id, &mut |t| {
                    if outcome == RunOutcome::Paused(PauseReason::BudgetExhausted) {
                        t.last_error = Some(PauseReason::BudgetExhausted.to_string());
                    }
                    t.set_status(outcome.status());
                })
            }
            Err(e) => {
                tracing::error!("Task {} failed: {}", task_id, e);
                let message = e.to_string();
                self.store.update(task_id, &mut |t| {
                    t.last_error = Some(message.clone());
                    t.set_status(TaskStatus::Paused);
                })
            }
        };

        let task = match final_update {
            Ok(task) => task,
            Err(store_err) => {
                tracing::error!("Could not record final status of {}: {}", task_id, store_err);
                return Err(result.err().unwrap_or(store_err));
            }
        };

        let outcome = result?;
        tracing::info!("Task {} finished: {:?}", task_id, outcome);
        self.emit(ProgressEvent::Finished {
            task_id: task_id.to_string(),
            outcome,
            total_tokens: task.total_tokens(),
        });
        Ok(outcome)
    }

    fn register(
        &self,
        task_id: &str,
        token: CancellationToken,
    ) -> Result<RunRegistration<'_>, OptimizerError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(task_id) {
            return Err(OptimizerError::AlreadyRunning {
                task_id: task_id.to_string(),
            });
        }
        running.insert(task_id.to_string(), token);
        Ok(RunRegistration {
            running: &self.running,
            task_id: task_id.to_string(),
        })
    }

    // ─── State machine ──────────────────────────────────────────

    async fn drive(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
        models: &RunModels,
    ) -> Result<RunOutcome, OptimizerError> {
        loop {
            let task = self.store.load(task_id)?;
            let latest = task.latest_iteration().ok_or_else(|| {
                OptimizerError::Other(anyhow::anyhow!("task {task_id} has no iterations"))
            })?;
            let idx = latest.iteration;

            match latest.stage {
                Stage::Summarized => {
                    if task.all_perfect(idx) {
                        return Ok(RunOutcome::Completed);
                    }
                    if latest.waiting_for_feedback {
                        return Ok(RunOutcome::Paused(PauseReason::AwaitingFeedback));
                    }
                    if task.prompt_iterations.len() as u32 >= task.max_iterations {
                        return Ok(RunOutcome::MaxIterationsReached);
                    }
                    if task.budget_exhausted() {
                        tracing::warn!("Task {} exhausted its token budget", task_id);
                        return Ok(RunOutcome::Paused(PauseReason::BudgetExhausted));
                    }
                    if cancel.is_cancelled() {
                        return Err(OptimizerError::Cancelled);
                    }
                    let mut next = 0;
                    self.store
                        .update(task_id, &mut |t| next = t.append_iteration())?;
                    self.emit(ProgressEvent::IterationStart {
                        task_id: task_id.to_string(),
                        iteration: next,
                        max_iterations: task.max_iterations,
                    });
                }
                Stage::NotStarted => self.generate(&task, idx, cancel, models).await?,
                Stage::Generated => self.run_tests(&task, idx, cancel, models).await?,
                Stage::Tested => self.evaluate(&task, idx, cancel, models).await?,
                Stage::Evaluated => self.summarize(&task, idx, cancel, models).await?,
            }
        }
    }

    fn advance(&self, task_id: &str, iteration: u32, stage: Stage) -> Result<(), OptimizerError> {
        let mut advanced = false;
        self.store
            .update(task_id, &mut |t| advanced = t.advance_stage(iteration, stage))?;
        if advanced {
            tracing::info!("Task {} iteration {} → {}", task_id, iteration, stage);
            self.emit(ProgressEvent::StageAdvanced {
                task_id: task_id.to_string(),
                iteration,
                stage,
            });
        }
        Ok(())
    }

    /// Persist a streamed preview. Best effort: the final value is written
    /// separately, so a failed intermediate write is only logged.
    fn persist_preview(&self, task_id: &str, apply: &mut dyn FnMut(&mut Task)) {
        if let Err(e) = self.store.update(task_id, apply) {
            tracing::debug!("Dropped stream preview for {}: {}", task_id, e);
        }
    }

    async fn generate(
        &self,
        task: &Task,
        idx: u32,
        cancel: &CancellationToken,
        models: &RunModels,
    ) -> Result<(), OptimizerError> {
        // The user's prompt is never rewritten
        if idx == 0 {
            return self.advance(&task.id, idx, Stage::Generated);
        }
        if cancel.is_cancelled() {
            return Err(OptimizerError::Cancelled);
        }

        let rewriter = Rewriter::new(models.optimizer.clone(), self.flush_every());
        let rewrite = rewriter
            .rewrite(task, idx, |preview| {
                let preview = preview.to_string();
                self.persist_preview(&task.id, &mut |t| t.set_prompt(idx, preview.clone()));
            })
            .await?;

        self.store.update(&task.id, &mut |t| {
            t.set_prompt(idx, rewrite.prompt.clone());
            t.record_usage(TokenChannel::Optimization, &rewrite.usage);
        })?;
        self.advance(&task.id, idx, Stage::Generated)
    }

    async fn run_tests(
        &self,
        task: &Task,
        idx: u32,
        cancel: &CancellationToken,
        models: &RunModels,
    ) -> Result<(), OptimizerError> {
        let prompt = task
            .iteration(idx)
            .map(|it| it.prompt.clone())
            .unwrap_or_default();
        let jobs: Vec<TestJob> = task
            .pending_test_cases(idx)
            .into_iter()
            .map(|i| TestJob {
                case_index: i,
                input: task.test_cases[i].input.clone(),
            })
            .collect();
        if !jobs.is_empty() {
            tracing::info!("Task {} iteration {}: testing {} cases", task.id, idx, jobs.len());
        }

        // A store failure stops further dispatch without touching the caller's token
        let batch = cancel.child_token();
        let mut store_err = None;
        let runner = TestRunner::new(models.target.clone(), task.concurrent_calls);
        let report = runner
            .run(&prompt, jobs, &batch, |case_index, outcome| {
                let failed = outcome.is_failure();
                let res = self.store.update(&task.id, &mut |t| match &outcome {
                    TestOutcome::Output { text, usage } => {
                        t.set_case_output(case_index, idx, text.clone());
                        t.record_usage(TokenChannel::Target, usage);
                    }
                    TestOutcome::Failed { error } => t.set_case_failure(case_index, idx, error),
                });
                match res {
                    Ok(_) => self.emit(ProgressEvent::CaseTested {
                        task_id: task.id.clone(),
                        iteration: idx,
                        case_index,
                        failed,
                    }),
                    Err(e) => {
                        batch.cancel();
                        store_err.get_or_insert(e);
                    }
                }
            })
            .await;

        if let Some(e) = store_err {
            return Err(e);
        }
        if report.cancelled() {
            return Err(OptimizerError::Cancelled);
        }

        let task = self.store.load(&task.id)?;
        if !task.is_tested(idx) {
            return Err(stalled(&task.id, idx, Stage::Tested));
        }
        self.advance(&task.id, idx, Stage::Tested)
    }

    async fn evaluate(
        &self,
        task: &Task,
        idx: u32,
        cancel: &CancellationToken,
        models: &RunModels,
    ) -> Result<(), OptimizerError> {
        let prompt = task
            .iteration(idx)
            .map(|it| it.prompt.clone())
            .unwrap_or_default();
        let jobs: Vec<EvaluationJob> = task
            .pending_evaluations(idx)
            .into_iter()
            .filter_map(|i| {
                let case = &task.test_cases[i];
                case.result(idx).map(|r| EvaluationJob {
                    case_index: i,
                    input: case.input.clone(),
                    expected: case.expected_output.clone(),
                    actual: r.output.clone(),
                })
            })
            .collect();
        if !jobs.is_empty() {
            tracing::info!("Task {} iteration {}: scoring {} cases", task.id, idx, jobs.len());
        }

        let batch = cancel.child_token();
        let mut store_err = None;
        let judge = Judge::new(models.optimizer.clone(), task.concurrent_calls);
        let report = judge
            .evaluate(&prompt, task.mode(), jobs, &batch, |case_index, verdict| {
                let res = self.store.update(&task.id, &mut |t| {
                    t.set_case_score(case_index, idx, verdict.score, verdict.comment.clone());
                    t.record_usage(TokenChannel::Optimization, &verdict.usage);
                });
                match res {
                    Ok(_) => self.emit(ProgressEvent::CaseEvaluated {
                        task_id: task.id.clone(),
                        iteration: idx,
                        case_index,
                        score: verdict.score,
                    }),
                    Err(e) => {
                        batch.cancel();
                        store_err.get_or_insert(e);
                    }
                }
            })
            .await;

        if let Some(e) = store_err {
            return Err(e);
        }
        if report.cancelled() {
            return Err(OptimizerError::Cancelled);
        }

        let task = self.store.load(&task.id)?;
        let avg = task
            .average_score(idx)
            .ok_or_else(|| stalled(&task.id, idx, Stage::Evaluated))?;
        self.store
            .update(&task.id, &mut |t| t.set_avg_score(idx, avg))?;
        tracing::info!("Task {} iteration {} average {:.2}", task.id, idx, avg);
        self.advance(&task.id, idx, Stage::Evaluated)
    }

    async fn summarize(
        &self,
        task: &Task,
        idx: u32,
        cancel: &CancellationToken,
        models: &RunModels,
    ) -> Result<(), OptimizerError> {
        let perfect = task.all_perfect(idx);
        // A perfect iteration always finishes, so a completed evaluation is
        // never reported as paused.
        if !perfect && cancel.is_cancelled() {
            return Err(OptimizerError::Cancelled);
        }

        let summarizer = Summarizer::new(models.optimizer.clone(), self.flush_every());
        let summary = summarizer
            .summarize(task, idx, |preview| {
                let preview = preview.to_string();
                self.persist_preview(&task.id, &mut |t| t.set_report(idx, preview.clone()));
            })
            .await?;

        let wants_feedback = task.require_user_feedback
            && !perfect
            && (task.prompt_iterations.len() as u32) < task.max_iterations;
        self.store.update(&task.id, &mut |t| {
            t.set_report(idx, summary.report.clone());
            t.record_usage(TokenChannel::Optimization, &summary.usage);
            t.set_waiting_for_feedback(idx, wants_feedback);
        })?;
        self.advance(&task.id, idx, Stage::Summarized)
    }
}

/// A finished batch left the iteration short of the next stage.
fn stalled(task_id: &str, iteration: u32, stage: Stage) -> OptimizerError {
    OptimizerError::Other(anyhow::anyhow!(
        "task {task_id} iteration {iteration} could not reach stage {stage}"
    ))
}
