//! Tool call sequence tracking.
//!
//! Injected instructions usually surface through a read (fetching a page,
//! loading a file) and then push the agent into a burst of follow-up
//! actions. The tracker keeps a short history of completed calls and flags
//! the next call when it would continue such a pattern.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_HISTORY: usize = 10;
pub const DEFAULT_BURST_WINDOW: Duration = Duration::from_secs(5);

const READ_TOOL_KEYWORDS: &[&str] = &[
    "get", "read", "fetch", "retrieve", "list", "show", "view", "download", "load", "query",
    "search", "find",
];

const BURST_AFTER_READ_MIN: usize = 3;

/// Returns true when a tool name looks like a read or retrieval operation.
#[must_use]
pub fn is_read_operation(tool_name: &str) -> bool {
    let lowered = tool_name.to_lowercase();
    READ_TOOL_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// A completed tool call.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub at: Instant,
    pub is_read: bool,
}

/// Why a sequence was considered anomalous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceAnomaly {
    BurstAfterRead { recent_calls: usize },
    ReadToActionEscalation,
}

impl std::fmt::Display for SequenceAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BurstAfterRead { recent_calls } => {
                write!(f, "Rapid burst of {recent_calls} tool calls after read operation")
            }
            Self::ReadToActionEscalation => {
                f.write_str("Escalation from read to multiple action operations")
            }
        }
    }
}

/// Bounded history of completed calls, safe to share across sessions.
#[derive(Debug)]
pub struct SequenceTracker {
    max_history: usize,
    burst_window: Duration,
    history: Mutex<VecDeque<ToolCallRecord>>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY, DEFAULT_BURST_WINDOW)
    }
}

impl SequenceTracker {
    #[must_use]
    pub fn new(max_history: usize, burst_window: Duration) -> Self {
        Self {
            max_history: max_history.max(1),
            burst_window,
            history: Mutex::new(VecDeque::with_capacity(max_history.max(1))),
        }
    }

    /// Records a completed call.
    pub fn record(&self, tool_name: &str) {
        self.record_at(tool_name, Instant::now());
    }

    /// Checks whether calling `next_tool` now would form a suspicious sequence.
    #[must_use]
    pub fn check(&self, next_tool: &str) -> Option<SequenceAnomaly> {
        self.check_at(next_tool, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn record_at(&self, tool_name: &str, at: Instant) {
        let mut history = self.lock();
        history.push_back(ToolCallRecord {
            tool_name: tool_name.to_string(),
            at,
            is_read: is_read_operation(tool_name),
        });
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    pub(crate) fn check_at(&self, next_tool: &str, now: Instant) -> Option<SequenceAnomaly> {
        let history = self.lock();
        if history.len() < 2 {
            return None;
        }

        let recent: Vec<&ToolCallRecord> = history
            .iter()
            .filter(|record| now.saturating_duration_since(record.at) < self.burst_window)
            .collect();
        if recent.len() < 2 {
            return None;
        }

        let newest_is_read = history.back().is_some_and(|record| record.is_read);
        if newest_is_read && recent.len() >= BURST_AFTER_READ_MIN {
            return Some(SequenceAnomaly::BurstAfterRead {
                recent_calls: recent.len(),
            });
        }

        let previous = recent[recent.len() - 2];
        let last = recent[recent.len() - 1];
        if previous.is_read && !last.is_read && !is_read_operation(next_tool) {
            return Some(SequenceAnomaly::ReadToActionEscalation);
        }

        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ToolCallRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
