// src/cli/mod.rs — CLI definition (clap derive)

pub mod export;
pub mod migrate;
pub mod progress;
pub mod run;
pub mod tasks;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::types::TestMode;

#[derive(Parser)]
#[command(
    name = "promptkoi",
    about = "Iteratively optimize a prompt against a test set",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Suppress progress output
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a task from a dataset of input/expected pairs
    Create(CreateArgs),
    /// Start or resume a task (Ctrl-C pauses it gracefully)
    Run {
        task_id: String,
    },
    /// Answer a task that is waiting for feedback, then resume it
    Feedback {
        task_id: String,
        /// Feedback text for the next rewrite
        text: String,
        /// Iteration id (defaults to the one awaiting feedback)
        #[arg(long)]
        iteration: Option<String>,
    },
    /// Show a task's iterations and scores
    Show {
        task_id: String,
        /// Also print per-case results for the latest iteration
        #[arg(long)]
        cases: bool,
    },
    /// List all tasks
    List,
    /// Delete a task
    Delete {
        task_id: String,
    },
    /// Discard all progress and return to the initial prompt
    Reset {
        task_id: String,
    },
    /// Write a task snapshot as JSON
    Export {
        task_id: String,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a task snapshot from JSON
    Import {
        file: PathBuf,
    },
    /// List configured models
    Models,
    /// Show or roll back database migrations
    Migrate {
        #[arg(long)]
        status: bool,
        #[arg(long)]
        rollback: bool,
    },
}

#[derive(clap::Args, Clone)]
pub struct CreateArgs {
    /// Task name
    pub name: String,

    /// Dataset file: JSON array or JSON Lines of {"input", "output"} objects
    #[arg(long)]
    pub dataset: PathBuf,

    /// Initial prompt text
    #[arg(long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    /// Read the initial prompt from a file
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// How outputs are judged
    #[arg(long, value_enum, default_value_t = ModeArg::Strict)]
    pub mode: ModeArg,

    /// Model id (from config) whose prompt is optimized
    #[arg(long)]
    pub target: String,

    /// Model id (from config) that judges, summarizes and rewrites
    #[arg(long)]
    pub optimizer: String,

    /// Maximum iterations, including the initial prompt
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Stop once both models together have used this many tokens
    #[arg(long)]
    pub token_budget: Option<u64>,

    /// Concurrent model calls per batch
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Pause after each imperfect iteration for feedback
    #[arg(long)]
    pub require_feedback: bool,

    /// Start the task immediately
    #[arg(long)]
    pub run: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Output must equal the expected text
    Strict,
    /// Expected text describes requirements; a model judges fit
    Descriptive,
}

impl From<ModeArg> for TestMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Strict => TestMode::Strict,
            ModeArg::Descriptive => TestMode::Descriptive,
        }
    }
}
