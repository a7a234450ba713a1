//! Intent alignment between a tool call's arguments and the tool itself.
//!
//! The heuristic looks for the natural-language text the agent passed along
//! (usually a restatement of the user request) and measures how many of its
//! meaningful tokens also appear in the tool's name and description.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Minimum score a call needs when candidate text is present.
pub const DEFAULT_ALIGNMENT_THRESHOLD: f64 = 0.12;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "to", "of", "for", "and", "or", "in", "on", "with", "from", "by", "is",
    "are", "be", "this", "that", "it", "as", "at", "your", "you", "i", "we", "our", "us", "me",
];

/// Argument keys that carry payload data rather than intent.
const PAYLOAD_KEYS: &[&str] = &["body", "content", "data", "payload", "html", "text"];

const MIN_CANDIDATE_LEN: usize = 20;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("valid token regex"));

/// Minimal view of a tool call used for scoring.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentContext<'a> {
    pub candidate_text: Option<&'a str>,
    pub tool_name: &'a str,
    pub tool_description: Option<&'a str>,
}

/// Outcome of an alignment check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentVerdict {
    pub allowed: bool,
    pub score: f64,
}

/// Lowercases, tokenizes and drops stopwords and tokens of two chars or less.
#[must_use]
pub fn normalize(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    TOKEN_REGEX
        .find_iter(&lowered)
        .map(|token| token.as_str())
        .filter(|token| token.len() > 2 && !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Picks the longest argument string that reads like user intent.
#[must_use]
pub fn extract_candidate_text(arguments: &Map<String, Value>) -> Option<&str> {
    let mut best: Option<&str> = None;
    for (key, value) in arguments {
        let Value::String(value) = value else {
            continue;
        };
        if PAYLOAD_KEYS.contains(&key.to_lowercase().as_str()) {
            continue;
        }
        let text = value.trim();
        if text.chars().count() < MIN_CANDIDATE_LEN || !text.contains(' ') {
            continue;
        }
        // Ties keep the earlier argument; Map preserves insertion order.
        if best.is_none_or(|current| text.chars().count() > current.chars().count()) {
            best = Some(text);
        }
    }
    best
}

/// Fraction of candidate tokens that also occur in the tool metadata.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn alignment_score(ctx: &AlignmentContext<'_>) -> f64 {
    let Some(candidate) = ctx.candidate_text else {
        return 1.0;
    };
    let prompt_tokens = normalize(candidate);
    if prompt_tokens.is_empty() {
        return 1.0;
    }

    let tool_text = match ctx.tool_description {
        Some(description) => format!("{} {description}", ctx.tool_name),
        None => ctx.tool_name.to_string(),
    };
    let tool_tokens = normalize(&tool_text);
    if tool_tokens.is_empty() {
        return 0.0;
    }

    let overlap = prompt_tokens.intersection(&tool_tokens).count();
    overlap as f64 / prompt_tokens.len() as f64
}

/// Checks whether a call plausibly matches the intent found in its arguments.
///
/// Calls without any intent-like argument are always allowed.
#[must_use]
pub fn check_alignment(
    arguments: &Map<String, Value>,
    tool_name: &str,
    tool_description: Option<&str>,
    threshold: f64,
) -> AlignmentVerdict {
    let candidate = extract_candidate_text(arguments);
    let score = alignment_score(&AlignmentContext {
        candidate_text: candidate,
        tool_name,
        tool_description,
    });
    let allowed = candidate.is_none() || score >= threshold;
    AlignmentVerdict { allowed, score }
}
