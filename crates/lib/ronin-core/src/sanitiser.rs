//! Hidden payload removal for tool response text.
//!
//! HTML comments and long Base64-like runs are the two carriers seen in
//! hidden-payload delivery: both are invisible or unreadable to a human
//! reviewing the response but fully legible to the model.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::info;

static HTML_COMMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid html comment regex"));

static BASE64_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z0-9+/]{20,})={0,2}").expect("valid base64 regex")
});

const SNIPPET_CHARS: usize = 40;

/// Kind of hidden payload removed from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadKind {
    HtmlComment,
    Base64,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlComment => f.write_str("HTML_COMMENT"),
            Self::Base64 => f.write_str("BASE64"),
        }
    }
}

/// A single payload stripped from the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadFinding {
    pub kind: PayloadKind,
    pub length: usize,
    pub snippet: String,
}

/// Sanitised text along with what was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitiseReport {
    pub text: String,
    pub findings: Vec<PayloadFinding>,
}

impl SanitiseReport {
    #[must_use]
    pub const fn was_sanitised(&self) -> bool {
        !self.findings.is_empty()
    }
}

/// Strips HTML comments, then Base64-like blocks, logging each removal.
#[must_use]
pub fn sanitise_report(text: &str, tool_name: &str) -> SanitiseReport {
    let mut findings = Vec::new();
    let text = strip(&HTML_COMMENT_REGEX, PayloadKind::HtmlComment, text, tool_name, &mut findings);
    let text = strip(&BASE64_BLOCK_REGEX, PayloadKind::Base64, &text, tool_name, &mut findings);
    SanitiseReport { text, findings }
}

/// Returns the sanitised text and whether anything was removed.
#[must_use]
pub fn sanitise_response_text(text: &str, tool_name: &str) -> (String, bool) {
    let report = sanitise_report(text, tool_name);
    let was_sanitised = report.was_sanitised();
    (report.text, was_sanitised)
}

/// Sanitises a single content block, discarding the findings.
#[must_use]
pub fn sanitise_content_block(block_text: &str, tool_name: &str) -> String {
    sanitise_report(block_text, tool_name).text
}

fn strip(
    pattern: &Regex,
    kind: PayloadKind,
    text: &str,
    tool_name: &str,
    findings: &mut Vec<PayloadFinding>,
) -> String {
    let before = findings.len();
    for found in pattern.find_iter(text) {
        let payload = found.as_str();
        let snippet: String = payload.chars().take(SNIPPET_CHARS).collect();
        let length = payload.chars().count();
        info!(
            target: "ronin::sanitised",
            tool = tool_name,
            kind = %kind,
            length,
            "Tool={tool_name} | Type={kind} | Length={length} | Snippet={snippet}..."
        );
        findings.push(PayloadFinding {
            kind,
            length,
            snippet,
        });
    }
    if findings.len() == before {
        return text.to_string();
    }
    pattern.replace_all(text, "").into_owned()
}
