// src/cli/progress.rs — Terminal progress renderer for task runs

use crate::core::types::{ProgressEvent, RunOutcome};

/// One line per event, or `None` for events not worth a line.
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::IterationStart {
            iteration,
            max_iterations,
            ..
        } => Some(format!(
            "[iter {}/{}] rewriting prompt...",
            iteration + 1,
            max_iterations
        )),
        ProgressEvent::StageAdvanced {
            iteration, stage, ..
        } => Some(format!("[iter {}] {}", iteration + 1, stage)),
        ProgressEvent::CaseTested {
            iteration,
            case_index,
            failed: true,
            ..
        } => Some(format!(
            "[iter {}]   case #{} failed",
            iteration + 1,
            case_index
        )),
        ProgressEvent::CaseTested { .. } => None,
        ProgressEvent::CaseEvaluated {
            iteration,
            case_index,
            score,
            ..
        } => Some(format!(
            "[iter {}]   case #{} scored {}/5",
            iteration + 1,
            case_index,
            score
        )),
        ProgressEvent::Finished {
            outcome,
            total_tokens,
            ..
        } => Some(format!(
            "[done] {} tokens={}",
            describe_outcome(outcome),
            total_tokens
        )),
    }
}

pub fn describe_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed => "completed: every case scored 5/5".into(),
        RunOutcome::MaxIterationsReached => "stopped: iteration limit reached".into(),
        RunOutcome::Paused(reason) => format!("paused: {reason}"),
    }
}

/// Progress callback writing to stderr, keeping stdout for data.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event) {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PauseReason, Stage};

    #[test]
    fn test_iteration_start_is_one_based() {
        let line = format_event(&ProgressEvent::IterationStart {
            task_id: "t".into(),
            iteration: 1,
            max_iterations: 3,
        });
        assert_eq!(line.as_deref(), Some("[iter 2/3] rewriting prompt..."));
    }

    #[test]
    fn test_stage_line() {
        let line = format_event(&ProgressEvent::StageAdvanced {
            task_id: "t".into(),
            iteration: 0,
            stage: Stage::Evaluated,
        });
        assert_eq!(line.as_deref(), Some("[iter 1] evaluated"));
    }

    #[test]
    fn test_successful_case_is_quiet() {
        let ok = ProgressEvent::CaseTested {
            task_id: "t".into(),
            iteration: 0,
            case_index: 2,
            failed: false,
        };
        assert!(format_event(&ok).is_none());
        let failed = ProgressEvent::CaseTested {
            task_id: "t".into(),
            iteration: 0,
            case_index: 2,
            failed: true,
        };
        assert_eq!(
            format_event(&failed).as_deref(),
            Some("[iter 1]   case #2 failed")
        );
    }

    #[test]
    fn test_finished_line() {
        let line = format_event(&ProgressEvent::Finished {
            task_id: "t".into(),
            outcome: RunOutcome::Paused(PauseReason::AwaitingFeedback),
            total_tokens: 1234,
        });
        assert_eq!(
            line.as_deref(),
            Some("[done] paused: awaiting feedback tokens=1234")
        );
    }
}
