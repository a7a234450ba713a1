//! Core defense layers for the Ronin MCP proxy.
//!
//! This crate owns the heuristics applied to every proxied tool call: intent
//! alignment and call-sequence screening before the call reaches the upstream
//! server, and injection neutralization, hidden-payload stripping and framing
//! on the way back. Nothing here performs I/O besides logging.

pub mod alignment;
pub mod framing;
pub mod injection;
pub mod pipeline;
pub mod sanitiser;
pub mod sequence;

pub use pipeline::{DefenseBlock, DefenseConfig, DefensePipeline, VERIFICATION_STAMP};
