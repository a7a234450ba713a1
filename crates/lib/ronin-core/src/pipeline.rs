//! Layered defense pipeline applied around every proxied tool call.
//!
//! Pre-call: intent alignment, then call-sequence screening.
//! Post-call: injection neutralization, hidden payload stripping, instruction
//! scoring and framing, then the verification stamp.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::alignment::{DEFAULT_ALIGNMENT_THRESHOLD, check_alignment};
use crate::framing::{
    DEFAULT_INSTRUCTION_THRESHOLD,
    compute_instruction_score,
    frame_external_content,
};
use crate::injection::{detect_injection_patterns, neutralize_injection_patterns};
use crate::sanitiser::sanitise_content_block;
use crate::sequence::{DEFAULT_BURST_WINDOW, DEFAULT_MAX_HISTORY, SequenceAnomaly, SequenceTracker};

/// Trailer appended to every processed response and block message.
pub const VERIFICATION_STAMP: &str = "\n\n⛩️ 検証済み ─ Verified by Ronin ─ 浪人 ⛩️";

/// Tunables for the defense pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DefenseConfig {
    pub alignment_threshold: f64,
    pub instruction_threshold: f64,
    pub max_history: usize,
    pub burst_window: Duration,
    pub stamp: bool,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            alignment_threshold: DEFAULT_ALIGNMENT_THRESHOLD,
            instruction_threshold: DEFAULT_INSTRUCTION_THRESHOLD,
            max_history: DEFAULT_MAX_HISTORY,
            burst_window: DEFAULT_BURST_WINDOW,
            stamp: true,
        }
    }
}

impl DefenseConfig {
    #[must_use]
    pub const fn with_alignment_threshold(mut self, threshold: f64) -> Self {
        self.alignment_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_instruction_threshold(mut self, threshold: f64) -> Self {
        self.instruction_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    #[must_use]
    pub const fn with_burst_window(mut self, burst_window: Duration) -> Self {
        self.burst_window = burst_window;
        self
    }

    #[must_use]
    pub const fn with_stamp(mut self, stamp: bool) -> Self {
        self.stamp = stamp;
        self
    }
}

/// Reason a tool call was refused before reaching the upstream server.
#[derive(Debug, Clone, PartialEq)]
pub enum DefenseBlock {
    Misaligned { tool: String, score: f64 },
    SuspiciousSequence { tool: String, anomaly: SequenceAnomaly },
}

impl fmt::Display for DefenseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned { tool, score } => write!(
                f,
                "Blocked tool '{tool}': it appears unrelated to the current request \
                 (alignment score={score:.2}). This may indicate an unsafe or unintended \
                 tool invocation."
            ),
            Self::SuspiciousSequence { tool, anomaly } => write!(
                f,
                "Blocked tool '{tool}': suspicious call sequence detected. {anomaly}"
            ),
        }
    }
}

impl Error for DefenseBlock {}

/// Stateful defense pipeline; one instance is shared by every session.
#[derive(Debug, Default)]
pub struct DefensePipeline {
    config: DefenseConfig,
    tracker: SequenceTracker,
}

impl DefensePipeline {
    #[must_use]
    pub fn new(config: DefenseConfig) -> Self {
        let tracker = SequenceTracker::new(config.max_history, config.burst_window);
        Self { config, tracker }
    }

    #[must_use]
    pub const fn config(&self) -> &DefenseConfig {
        &self.config
    }

    #[must_use]
    pub const fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    /// Screens a call before it is forwarded.
    ///
    /// # Errors
    /// Returns a [`DefenseBlock`] when the call is misaligned with the intent
    /// in its arguments or would extend a suspicious call sequence.
    pub fn screen_call(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        tool_description: Option<&str>,
    ) -> Result<(), DefenseBlock> {
        let verdict = check_alignment(
            arguments,
            tool_name,
            tool_description,
            self.config.alignment_threshold,
        );
        if !verdict.allowed {
            warn!(tool = tool_name, score = verdict.score, "blocked misaligned tool call");
            return Err(DefenseBlock::Misaligned {
                tool: tool_name.to_string(),
                score: verdict.score,
            });
        }

        if let Some(anomaly) = self.tracker.check(tool_name) {
            warn!(tool = tool_name, %anomaly, "blocked suspicious call sequence");
            return Err(DefenseBlock::SuspiciousSequence {
                tool: tool_name.to_string(),
                anomaly,
            });
        }

        Ok(())
    }

    /// Records a call that completed upstream.
    pub fn record_completed(&self, tool_name: &str) {
        self.tracker.record(tool_name);
    }

    /// Message returned to the agent for a blocked call.
    #[must_use]
    pub fn block_message(&self, block: &DefenseBlock) -> String {
        self.stamp(block.to_string())
    }

    /// Applies the response-side layers to one block of tool output.
    #[must_use]
    pub fn process_response_text(&self, text: &str, tool_name: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let scan = detect_injection_patterns(text);
        let neutralized = if scan.suspicious {
            neutralize_injection_patterns(text)
        } else {
            text.to_string()
        };

        let sanitised = sanitise_content_block(&neutralized, tool_name);

        let instruction_score = compute_instruction_score(&sanitised);
        let high_instruction_score = instruction_score > self.config.instruction_threshold;

        let output = if scan.suspicious || high_instruction_score {
            let mut details: Option<String> = (!scan.matched.is_empty())
                .then(|| format!("Matched patterns: {}", scan.matched.len()));
            if high_instruction_score {
                let mut info = details.unwrap_or_default();
                info.push_str(&format!(" | Instruction score: {instruction_score:.2}"));
                details = Some(info);
            }
            debug!(
                tool = tool_name,
                matched = scan.matched.len(),
                instruction_score,
                "framing suspicious tool output"
            );
            frame_external_content(&sanitised, tool_name, true, details.as_deref())
        } else {
            sanitised
        };

        self.stamp(output)
    }

    fn stamp(&self, mut text: String) -> String {
        if self.config.stamp {
            text.push_str(VERIFICATION_STAMP);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    #[test]
    fn misaligned_message_matches_format() {
        let block = DefenseBlock::Misaligned {
            tool: "transfer_funds".to_string(),
            score: 0.0,
        };
        assert_eq!(
            block.to_string(),
            "Blocked tool 'transfer_funds': it appears unrelated to the current request \
             (alignment score=0.00). This may indicate an unsafe or unintended tool invocation."
        );
    }

    #[test]
    fn block_message_is_stamped() {
        let pipeline = DefensePipeline::default();
        let block = DefenseBlock::SuspiciousSequence {
            tool: "send_email".to_string(),
            anomaly: SequenceAnomaly::ReadToActionEscalation,
        };
        let message = pipeline.block_message(&block);
        assert!(message.starts_with(
            "Blocked tool 'send_email': suspicious call sequence detected. Escalation"
        ));
        assert!(message.ends_with(VERIFICATION_STAMP));
    }

    #[test]
    fn screen_call_blocks_misaligned_calls() {
        let pipeline = DefensePipeline::default();
        let arguments = args(json!({ "reason": "summarize my unread emails from yesterday" }));
        let result = pipeline.screen_call("transfer_funds", &arguments, Some("Moves money"));
        assert!(matches!(result, Err(DefenseBlock::Misaligned { .. })));
    }

    #[test]
    fn screen_call_blocks_escalation() {
        let pipeline = DefensePipeline::default();
        pipeline.record_completed("fetch_page");
        pipeline.record_completed("send_email");
        let result = pipeline.screen_call("delete_file", &Map::new(), None);
        assert!(matches!(result, Err(DefenseBlock::SuspiciousSequence { .. })));
    }

    #[test]
    fn blank_response_is_untouched() {
        let pipeline = DefensePipeline::default();
        assert_eq!(pipeline.process_response_text("   ", "tool"), "   ");
    }

    #[test]
    fn benign_response_is_only_stamped() {
        let pipeline = DefensePipeline::default();
        let output = pipeline.process_response_text("Sunny, 21 degrees in Paris.", "weather");
        assert_eq!(output, format!("Sunny, 21 degrees in Paris.{VERIFICATION_STAMP}"));
    }

    #[test]
    fn stamp_can_be_disabled() {
        let pipeline = DefensePipeline::new(DefenseConfig::default().with_stamp(false));
        let output = pipeline.process_response_text("Sunny, 21 degrees in Paris.", "weather");
        assert_eq!(output, "Sunny, 21 degrees in Paris.");
    }
}
