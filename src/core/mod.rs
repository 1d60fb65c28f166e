// src/core/mod.rs — Iteration engine and the pipelines it drives

pub mod engine;
pub mod limiter;
pub mod rewriter;
pub mod streaming;
pub mod summarizer;
pub mod templates;
pub mod token_budget;
pub mod types;
