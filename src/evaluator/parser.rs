// src/evaluator/parser.rs — Parse judge replies into a score and justification

use crate::core::types::{TestMode, MAX_SCORE, MIN_SCORE};

/// Mid-range score used when a reply cannot be parsed.
pub const FALLBACK_SCORE: u8 = 3;

/// Parsed judge verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScore {
    pub score: u8,
    pub reason: String,
    /// False when the fallback score was applied.
    pub parsed: bool,
}

/// Highest score the judge may award. A strict-mode reply is only requested
/// for non-identical output, which cannot be perfect.
pub fn score_ceiling(mode: TestMode) -> u8 {
    match mode {
        TestMode::Strict => MAX_SCORE - 1,
        TestMode::Descriptive => MAX_SCORE,
    }
}

/// Extract `<Score>` and `<Reason>` from a judge reply.
///
/// Expected format:
/// ```text
/// <Score>4</Score>
/// <Reason>Correct meaning, wrong casing.</Reason>
/// ```
/// Never fails: a missing or malformed score yields [`FALLBACK_SCORE`] with
/// the raw reply kept as the reason.
pub fn parse_evaluation_reply(reply: &str, mode: TestMode) -> ParsedScore {
    let score = tag_body(reply, "Score").and_then(first_score_digit);
    let reason = tag_body(reply, "Reason")
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    match score {
        Some(score) => ParsedScore {
            score: score.clamp(MIN_SCORE, score_ceiling(mode)),
            reason: reason.unwrap_or_else(|| format!("Scored {score} without a stated reason")),
            parsed: true,
        },
        None => ParsedScore {
            score: FALLBACK_SCORE.min(score_ceiling(mode)),
            reason: format!("Unparseable evaluation reply: {}", reply.trim()),
            parsed: false,
        },
    }
}

/// Body of the first complete `<tag>...</tag>` pair.
fn tag_body<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

fn first_score_digit(s: &str) -> Option<u8> {
    s.chars()
        .filter_map(|c| c.to_digit(10))
        .find(|d| (1..=5).contains(d))
        .map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let r = parse_evaluation_reply(
            "<Score>4</Score>\n<Reason> Nearly right. </Reason>",
            TestMode::Descriptive,
        );
        assert_eq!(r.score, 4);
        assert_eq!(r.reason, "Nearly right.");
        assert!(r.parsed);
    }

    #[test]
    fn test_parse_after_thinking_block() {
        let reply = "<Thinking>maybe a 2? no, 3</Thinking><Score> score: 3/5 </Score><Reason>ok</Reason>";
        let r = parse_evaluation_reply(reply, TestMode::Descriptive);
        assert_eq!(r.score, 3);
    }

    #[test]
    fn test_strict_clamps_to_four() {
        let r = parse_evaluation_reply("<Score>5</Score><Reason>x</Reason>", TestMode::Strict);
        assert_eq!(r.score, 4);
    }

    #[test]
    fn test_missing_score_falls_back() {
        let r = parse_evaluation_reply("I think it is fine.", TestMode::Descriptive);
        assert_eq!(r.score, FALLBACK_SCORE);
        assert!(!r.parsed);
        assert!(r.reason.contains("I think it is fine."));
    }

    #[test]
    fn test_out_of_range_digit_ignored() {
        let r = parse_evaluation_reply("<Score>9</Score>", TestMode::Descriptive);
        assert!(!r.parsed);
        assert_eq!(r.score, FALLBACK_SCORE);
    }

    #[test]
    fn test_missing_reason_keeps_score() {
        let r = parse_evaluation_reply("<Score>2</Score>", TestMode::Descriptive);
        assert_eq!(r.score, 2);
        assert!(r.parsed);
        assert!(r.reason.contains("without a stated reason"));
    }

    #[test]
    fn test_unclosed_tag_is_malformed() {
        let r = parse_evaluation_reply("<Score>4", TestMode::Descriptive);
        assert!(!r.parsed);
    }
}
