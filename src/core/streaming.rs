// src/core/streaming.rs — Stream draining, tag filtering and live previews

use futures::StreamExt;
use std::time::{Duration, Instant};

use crate::infra::errors::OptimizerError;
use crate::provider::{ChatStream, TokenUsage};

/// Shown in place of the real content while the model is still thinking.
pub const THINKING_PLACEHOLDER: &str = "<thinking>";

/// Result of looking for `<tag>...</tag>` in possibly incomplete text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagContent {
    /// A complete open/close pair was found.
    pub closed: bool,
    /// A complete opening tag has been received.
    pub opened: bool,
    pub content: String,
}

/// Extract the content of the last `<tag>` in `text`.
///
/// With a complete pair, returns what is between the last opening tag and
/// the first closing tag after it. Otherwise strips any trailing partial
/// closing tag, then returns what follows the last opening tag, or the
/// text minus a trailing partial opening tag.
pub fn filter_content_by_tag(text: &str, tag: &str) -> TagContent {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    if let Some(start) = text.rfind(&open) {
        let body = &text[start + open.len()..];
        if let Some(end) = body.find(&close) {
            return TagContent {
                closed: true,
                opened: true,
                content: body[..end].to_string(),
            };
        }
    }

    let mut current = text;
    for i in (1..=close.len()).rev() {
        if current.ends_with(&close[..i]) {
            current = &current[..current.len() - i];
            break;
        }
    }

    if let Some(start) = current.rfind(&open) {
        return TagContent {
            closed: false,
            opened: true,
            content: current[start + open.len()..].to_string(),
        };
    }

    for i in (1..open.len()).rev() {
        if current.ends_with(&open[..i]) {
            return TagContent {
                closed: false,
                opened: false,
                content: current[..current.len() - i].to_string(),
            };
        }
    }

    TagContent {
        closed: false,
        opened: false,
        content: current.to_string(),
    }
}

fn placeholder_if_empty(s: &str) -> &str {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        "..."
    } else {
        trimmed
    }
}

fn thinking_preview(thinking: &str) -> String {
    format!("{THINKING_PLACEHOLDER}\n{}", placeholder_if_empty(thinking))
}

/// Live view of a streaming reply whose useful part sits inside `<tag>`.
///
/// Reasoning models deliver their trace separately; others are asked to
/// think inside `<Thinking>` tags. Either way the preview shows a thinking
/// placeholder until the answer tag opens.
pub fn tagged_preview(thought: &str, answer: &str, tag: &str) -> Option<String> {
    if thought.trim().is_empty() && answer.trim().is_empty() {
        return None;
    }
    let target = filter_content_by_tag(answer, tag);

    let preview = if !thought.trim().is_empty() {
        if answer.is_empty() {
            thinking_preview(thought)
        } else {
            placeholder_if_empty(&target.content).to_string()
        }
    } else {
        let thinking = filter_content_by_tag(answer, "Thinking");
        if thinking.opened && !thinking.closed && !target.opened {
            thinking_preview(&thinking.content)
        } else {
            placeholder_if_empty(&target.content).to_string()
        }
    };
    Some(preview)
}

/// Final text of a tagged reply. Falls back to the untagged answer (minus
/// any thinking block) when the model ignored the format.
pub fn tagged_final(answer: &str, tag: &str) -> String {
    let target = filter_content_by_tag(answer, tag);
    if target.opened {
        return target.content.trim().to_string();
    }
    let thinking = filter_content_by_tag(answer, "Thinking");
    if thinking.closed {
        if let Some(end) = answer.rfind("</Thinking>") {
            return answer[end + "</Thinking>".len()..].trim().to_string();
        }
    }
    answer.trim().to_string()
}

/// Everything a finished stream delivered.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub answer: String,
    pub thought: String,
    pub usage: TokenUsage,
}

/// Minimum-interval gate for partial updates.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when enough time has passed since the last admitted update.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Drain a chat stream, accumulating answer, thought and usage.
///
/// `on_partial(thought, answer)` receives the accumulated text at most once
/// per `flush_every`. The caller persists the returned outcome, so the final
/// content always lands even when the last partial was throttled away.
pub async fn drain_stream<F>(
    mut stream: ChatStream,
    flush_every: Duration,
    mut on_partial: F,
) -> Result<StreamOutcome, OptimizerError>
where
    F: FnMut(&str, &str),
{
    let mut outcome = StreamOutcome::default();
    let mut throttle = Throttle::new(flush_every);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        outcome.answer.push_str(&chunk.answer_delta);
        outcome.thought.push_str(&chunk.thought_delta);
        if let Some(usage) = chunk.usage {
            // Providers report cumulative usage; keep the latest.
            outcome.usage = usage;
        }
        let has_text = !chunk.answer_delta.is_empty() || !chunk.thought_delta.is_empty();
        if has_text && throttle.ready() {
            on_partial(&outcome.thought, &outcome.answer);
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatChunk;

    fn chunks(parts: &[&str]) -> ChatStream {
        let items: Vec<Result<ChatChunk, OptimizerError>> = parts
            .iter()
            .map(|p| {
                Ok(ChatChunk {
                    answer_delta: p.to_string(),
                    ..Default::default()
                })
            })
            .chain(std::iter::once(Ok(ChatChunk {
                usage: Some(TokenUsage::new(12, 8)),
                ..Default::default()
            })))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    // ─── Tag filtering ──────────────────────────────────────────

    #[test]
    fn test_complete_pair() {
        let r = filter_content_by_tag("noise <Prompt>hello</Prompt> tail", "Prompt");
        assert!(r.closed);
        assert_eq!(r.content, "hello");
    }

    #[test]
    fn test_last_open_tag_wins() {
        let r = filter_content_by_tag("<Prompt>a</Prompt><Prompt>b</Prompt>", "Prompt");
        assert_eq!(r.content, "b");
    }

    #[test]
    fn test_partial_close_tag_stripped() {
        let r = filter_content_by_tag("<Summary>good so far</Sum", "Summary");
        assert!(!r.closed);
        assert!(r.opened);
        assert_eq!(r.content, "good so far");
    }

    #[test]
    fn test_partial_open_tag_stripped() {
        let r = filter_content_by_tag("preamble <Pro", "Prompt");
        assert!(!r.opened);
        assert_eq!(r.content, "preamble ");
    }

    #[test]
    fn test_no_tag_returns_text() {
        let r = filter_content_by_tag("plain", "Prompt");
        assert_eq!(r.content, "plain");
        assert!(!r.closed);
    }

    // ─── Previews ───────────────────────────────────────────────

    #[test]
    fn test_preview_reasoning_model_thinking() {
        let p = tagged_preview("weighing options", "", "Prompt").unwrap();
        assert!(p.starts_with(THINKING_PLACEHOLDER));
        assert!(p.contains("weighing options"));
    }

    #[test]
    fn test_preview_thinking_tag_for_plain_model() {
        let p = tagged_preview("", "<Thinking>first I", "Prompt").unwrap();
        assert!(p.starts_with(THINKING_PLACEHOLDER));
        assert!(p.ends_with("first I"));
    }

    #[test]
    fn test_preview_switches_to_answer() {
        let p = tagged_preview("", "<Thinking>x</Thinking><Prompt>Be brief", "Prompt").unwrap();
        assert_eq!(p, "Be brief");
    }

    #[test]
    fn test_preview_empty_is_none() {
        assert!(tagged_preview(" ", "", "Prompt").is_none());
    }

    #[test]
    fn test_final_falls_back_when_untagged() {
        assert_eq!(tagged_final("  just text ", "Prompt"), "just text");
        assert_eq!(
            tagged_final("<Thinking>hmm</Thinking>\nNew prompt", "Prompt"),
            "New prompt"
        );
        assert_eq!(tagged_final("<Prompt> p </Prompt>", "Prompt"), "p");
    }

    // ─── Draining ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_drain_accumulates_and_takes_usage() {
        let mut seen = Vec::new();
        let out = drain_stream(
            chunks(&["<Prompt>", "hi", "</Prompt>"]),
            Duration::ZERO,
            |_, a| seen.push(a.to_string()),
        )
        .await
        .unwrap();
        assert_eq!(out.answer, "<Prompt>hi</Prompt>");
        assert_eq!(out.usage.total_tokens, 20);
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_drain_throttles_partials() {
        let mut calls = 0;
        let out = drain_stream(
            chunks(&["a", "b", "c", "d"]),
            Duration::from_secs(60),
            |_, _| calls += 1,
        )
        .await
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(out.answer, "abcd");
    }

    #[tokio::test]
    async fn test_drain_propagates_error() {
        let items: Vec<Result<ChatChunk, OptimizerError>> = vec![
            Ok(ChatChunk {
                answer_delta: "x".into(),
                ..Default::default()
            }),
            Err(OptimizerError::Provider {
                provider: "m".into(),
                message: "reset".into(),
                retriable: false,
            }),
        ];
        let stream: ChatStream = Box::pin(futures::stream::iter(items));
        let err = drain_stream(stream, Duration::ZERO, |_, _| {}).await.err().unwrap();
        assert!(err.to_string().contains("reset"));
    }
}
