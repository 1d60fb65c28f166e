// src/core/templates.rs — Message builders for test, evaluation, summary and rewrite calls
//
// Pure functions: structured facts in, message list out. Reply formats are
// tag-delimited (<Score>, <Reason>, <Summary>, <Prompt>) and parsed by
// `evaluator::parser` / `core::streaming`.

use minijinja::Environment;
use serde::Serialize;

use super::types::{TestCase, TestMode, MAX_SCORE};
use crate::infra::errors::OptimizerError;
use crate::provider::Message;
use crate::util::excerpt;

const EVALUATOR_SYSTEM: &str = "You are a meticulous reviewer grading the output of a language model \
against a task description. You are fair, consistent and brief.";

const EVALUATION_TEMPLATE: &str = r#"Evaluate how well the following task was completed.

Task description (prompt):
'''
{{ prompt }}
'''

Test input:
'''
{{ input }}
'''

{% if mode == "strict" %}
Expected output (exact match required):
{% else %}
Output requirements (descriptive):
{% endif %}
'''
{{ expected }}
'''

Actual output:
'''
{{ actual }}
'''

{% if mode == "strict" %}
The actual output does NOT match the expected output exactly, so it cannot earn a 5.
Score it from 1 to 4 by how close it comes (4 = differs only trivially, 1 = wrong or unrelated).
{% else %}
Score it from 1 to 5 by how well it meets the requirements and fulfils the task (1 = worst, 5 = perfect).
{% endif %}
{% if not reasoning %}
First think step by step inside <Thinking></Thinking> tags.
{% endif %}
Put the score inside <Score></Score> tags and a brief justification inside <Reason></Reason> tags."#;

const SUMMARY_TEMPLATE: &str = r#"Below is an evaluation digest of the prompt
'''
{{ prompt }}
'''
run against a test set.

Overall statistics:
- Test set mode: {{ mode }}
- Total cases: {{ total_cases }}
- Perfect (5/5) cases: {{ perfect_cases }}
- Average score: {{ avg_score }}

Case details (excerpt):
{% for case in cases %}
- Case #{{ case.index }}: input='{{ case.input }}', expected='{{ case.expected }}', actual='{{ case.actual }}', score={{ case.score }}, reason='{{ case.comment }}'
{% endfor %}

Summarize the main strengths and weaknesses of the current prompt.
Point out recurring failure patterns and the key aspects to improve.
The report must be very concise.
{% if not reasoning %}
First think inside <Thinking></Thinking> tags, then write the report.
{% endif %}
Put the report inside <Summary></Summary> tags."#;

const OPTIMIZATION_TEMPLATE: &str = r#"You are improving a prompt that instructs a language model.

Current prompt:
'''
{{ previous_prompt }}
'''

Evaluation report for the current prompt (test set mode: {{ mode }}):
{{ previous_report }}
{% if current_avg %}
Current average score: {{ current_avg }} / 5
{% endif %}
{% if history %}

Earlier iterations, oldest first:
{% for it in history %}
--- Iteration {{ it.iteration }} (average {{ it.avg_score or "n/a" }}) ---
Prompt: {{ it.prompt }}
Report: {{ it.report }}
{% if it.feedback %}
User feedback: {{ it.feedback }}
{% endif %}
{% endfor %}
{% endif %}
{% if current_results %}

Case results for the current prompt:
{% for case in current_results %}
Case #{{ case.index }}:
- Input: '{{ case.input }}'
- Expected: '{{ case.expected }}'
- Actual: '{{ case.actual }}'
- Score: {{ case.score or "not scored" }}
- Reason: '{{ case.comment }}'
{% endfor %}
{% endif %}
{% if feedback %}

The user gave this guidance for the next version. You MUST take it into account:
'''
{{ feedback }}
'''
{% endif %}

Write an improved version of the prompt that fixes the problems found and raises the overall score.
Avoid repeating approaches that earlier iterations already showed do not work.
{% if not reasoning %}
First analyse the problems inside <Thinking></Thinking> tags.
{% endif %}
Return only the new prompt inside <Prompt></Prompt> tags, with no other commentary."#;

/// Scoring request facts for one (actual, expected) pair.
#[derive(Debug, Serialize)]
pub struct EvaluationFacts<'a> {
    pub prompt: &'a str,
    pub input: &'a str,
    pub expected: &'a str,
    pub actual: &'a str,
    pub mode: TestMode,
}

/// One case as shown to the optimization model.
#[derive(Debug, Clone, Serialize)]
pub struct CaseDigest {
    pub index: usize,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub score: Option<u8>,
    pub comment: String,
}

impl CaseDigest {
    /// Digest of a case's result at `iteration`, each text field cut to
    /// `max_len` bytes. `None` if the case has no output yet.
    pub fn from_case(case: &TestCase, iteration: u32, max_len: usize) -> Option<Self> {
        let result = case.result(iteration)?;
        Some(Self {
            index: case.index,
            input: excerpt(&case.input, max_len),
            expected: excerpt(&case.expected_output, max_len),
            actual: excerpt(&result.output, max_len),
            score: result.score,
            comment: excerpt(&result.comment, max_len),
        })
    }

    fn is_perfect(&self) -> bool {
        self.score == Some(MAX_SCORE)
    }
}

/// Up to `limit` cases, imperfect ones first, topped up with perfect ones.
/// Relative order within each group is kept.
pub fn select_cases(cases: Vec<CaseDigest>, limit: usize) -> Vec<CaseDigest> {
    let (perfect, imperfect): (Vec<_>, Vec<_>) = cases.into_iter().partition(|c| c.is_perfect());
    imperfect.into_iter().chain(perfect).take(limit).collect()
}

#[derive(Debug, Serialize)]
pub struct SummaryFacts<'a> {
    pub prompt: &'a str,
    pub mode: TestMode,
    pub total_cases: usize,
    pub perfect_cases: usize,
    /// Pre-formatted to two decimals.
    pub avg_score: String,
    pub cases: Vec<CaseDigest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub prompt: String,
    pub avg_score: Option<String>,
    pub report: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OptimizationFacts<'a> {
    pub previous_prompt: &'a str,
    pub previous_report: &'a str,
    pub feedback: Option<&'a str>,
    pub mode: TestMode,
    pub history: Vec<HistoryEntry>,
    pub current_results: Vec<CaseDigest>,
    pub current_avg: Option<String>,
}

#[derive(Serialize)]
struct RenderContext<'a, T: Serialize> {
    #[serde(flatten)]
    facts: &'a T,
    reasoning: bool,
}

fn render<T: Serialize>(source: &str, facts: &T, reasoning: bool) -> Result<String, OptimizerError> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    let tmpl = env.template_from_str(source)?;
    let rendered = tmpl.render(RenderContext { facts, reasoning })?;
    Ok(rendered)
}

/// Target-model call: the prompt under test as system message, the case input as user.
pub fn test_messages(prompt: &str, input: &str) -> Vec<Message> {
    vec![Message::system(prompt), Message::user(input)]
}

pub fn evaluation_messages(
    facts: &EvaluationFacts<'_>,
    reasoning: bool,
) -> Result<Vec<Message>, OptimizerError> {
    Ok(vec![
        Message::system(EVALUATOR_SYSTEM),
        Message::user(render(EVALUATION_TEMPLATE, facts, reasoning)?),
    ])
}

pub fn summary_messages(
    facts: &SummaryFacts<'_>,
    reasoning: bool,
) -> Result<Vec<Message>, OptimizerError> {
    Ok(vec![Message::user(render(SUMMARY_TEMPLATE, facts, reasoning)?)])
}

pub fn optimization_messages(
    facts: &OptimizationFacts<'_>,
    reasoning: bool,
) -> Result<Vec<Message>, OptimizerError> {
    Ok(vec![Message::user(render(
        OPTIMIZATION_TEMPLATE,
        facts,
        reasoning,
    )?)])
}
