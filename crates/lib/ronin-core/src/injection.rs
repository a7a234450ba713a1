//! Prompt-injection phrasing detection and neutralization.
//!
//! Responses from an upstream tool are data, but injected text tries to read
//! like instructions: fake authority headers, imperative commands aimed at
//! the model, requests to call other tools, or fabricated failure claims.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Matches required before a response counts as suspicious.
const SUSPICIOUS_MATCH_COUNT: usize = 2;
const MIN_SCAN_CHARS: usize = 10;

/// Family a detection pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternGroup {
    Authority,
    Command,
    ToolManipulation,
    FalseClaim,
}

const PATTERN_SOURCES: &[(PatternGroup, &str)] = &[
    (
        PatternGroup::Authority,
        r"\b(SYSTEM|CRITICAL|IMPORTANT|ADMIN|SECURITY ALERT|WARNING|ERROR)\s*:",
    ),
    (PatternGroup::Authority, r"\b(OVERRIDE|EMERGENCY|URGENT)\b"),
    (
        PatternGroup::Command,
        r"\b(you must|you should|you need to|do not|never tell|always respond)\b",
    ),
    (
        PatternGroup::Command,
        r"\b(ignore previous|forget|from now on|your new role)\b",
    ),
    (
        PatternGroup::Command,
        r"\b(tell the user|inform the user|say that|respond with)\b",
    ),
    (
        PatternGroup::ToolManipulation,
        r"\b(call|invoke|use|execute)\s+\w+\s+(tool|function)",
    ),
    (PatternGroup::ToolManipulation, r"\btool_name\s*[=:]"),
    (
        PatternGroup::FalseClaim,
        r"\b(security compromised|access denied|account locked|disabled|suspended)\b",
    ),
    (
        PatternGroup::FalseClaim,
        r"\b(you cannot|you can't|unable to|forbidden)\b",
    ),
];

/// A compiled, case-insensitive detection pattern.
#[derive(Debug)]
pub struct InjectionPattern {
    pub group: PatternGroup,
    pub source: &'static str,
    regex: Regex,
}

impl InjectionPattern {
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

static PATTERNS: LazyLock<Vec<InjectionPattern>> = LazyLock::new(|| {
    PATTERN_SOURCES
        .iter()
        .map(|&(group, source)| InjectionPattern {
            group,
            source,
            regex: RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .expect("valid injection pattern"),
        })
        .collect()
});

/// All detection patterns in evaluation order.
#[must_use]
pub fn patterns() -> &'static [InjectionPattern] {
    &PATTERNS
}

/// Result of scanning a response for injection phrasing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InjectionScan {
    pub suspicious: bool,
    pub matched: Vec<&'static str>,
}

/// Scans text for injection patterns.
///
/// Texts shorter than ten characters after trimming are never scanned.
#[must_use]
pub fn detect_injection_patterns(text: &str) -> InjectionScan {
    if text.trim().chars().count() < MIN_SCAN_CHARS {
        return InjectionScan::default();
    }

    let matched: Vec<&'static str> = patterns()
        .iter()
        .filter(|pattern| pattern.is_match(text))
        .map(|pattern| pattern.source)
        .collect();

    InjectionScan {
        suspicious: matched.len() >= SUSPICIOUS_MATCH_COUNT,
        matched,
    }
}

/// Quotes authority headers and command phrases so they read as reported
/// content rather than directives.
#[must_use]
pub fn neutralize_injection_patterns(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in patterns() {
        let replacement = match pattern.group {
            PatternGroup::Authority => r#"[Content claims: "${1}":]"#,
            PatternGroup::Command => r#"["${1}"]"#,
            PatternGroup::ToolManipulation | PatternGroup::FalseClaim => continue,
        };
        result = pattern.regex.replace_all(&result, replacement).into_owned();
    }
    result
}
