//! Blocking-style conveniences over the port engine.
//!
//! Most callers want "send this AT command, wait, tell me if it worked".
//! [`send_standard`] builds a command with the conventional 3GPP final set
//! and classifies its outcome into a coarse [`CmdStatus`]; callers needing
//! the raw lines still get the full [`CommandResult`] alongside.

use std::time::Duration;

use tracing::warn;

use atmux_core::Result;

use crate::command::{Command, CommandResult};
use crate::port::{PortHandle, TIMEOUT_LINE};

/// The conventional final set for 3GPP AT commands.
///
/// None of these is a prefix of another, so their order is irrelevant.
pub const STANDARD_FINAL_PATTERNS: [&str; 5] =
    ["OK", "ERROR", "+CME ERROR:", "+CMS ERROR:", TIMEOUT_LINE];

/// The failure subset of [`STANDARD_FINAL_PATTERNS`].
pub const STANDARD_FAILURE_PATTERNS: [&str; 3] = ["ERROR", "+CME ERROR:", "+CMS ERROR:"];

/// Coarse classification of a completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStatus {
    /// The final line matched a success pattern.
    Ok,
    /// The final line matched a failure pattern, or matched nothing known.
    Fault,
    /// The command timed out (final line is the literal `TIMEOUT`).
    Timeout,
}

/// Classify a command result by its final line.
///
/// The literal `TIMEOUT` line is checked exactly, before the prefix sets,
/// so a failure set containing `TIMEOUT` cannot shadow it. An unmatched
/// final line classifies as [`CmdStatus::Fault`] with a warning; it means
/// the command's final set was broader than the classification sets.
pub fn check_result<S: AsRef<str>>(
    result: &CommandResult,
    success_patterns: &[S],
    failure_patterns: &[S],
) -> CmdStatus {
    let Some(final_line) = result.final_line() else {
        warn!("classifying a result with no final line");
        return CmdStatus::Fault;
    };

    if final_line == TIMEOUT_LINE {
        return CmdStatus::Timeout;
    }
    if crate::matcher::match_prefix(final_line, failure_patterns).is_some() {
        return CmdStatus::Fault;
    }
    if crate::matcher::match_prefix(final_line, success_patterns).is_some() {
        return CmdStatus::Ok;
    }

    warn!(final_line, "final line matched neither success nor failure set");
    CmdStatus::Fault
}

/// Send an AT command with the standard final set and classify the result.
///
/// `intermediate_patterns` selects which response lines to capture; empty
/// captures every line before the final one.
pub async fn send_standard<S: AsRef<str>>(
    port: &PortHandle,
    text: &str,
    intermediate_patterns: &[S],
    timeout: Duration,
) -> Result<(CmdStatus, CommandResult)> {
    let command = Command::new(text)
        .intermediate(intermediate_patterns)
        .final_patterns(&STANDARD_FINAL_PATTERNS)
        .timeout(timeout)
        .build();

    let result = port.send_command(command).await?;
    let status = check_result(&result, &["OK"], &STANDARD_FAILURE_PATTERNS);
    Ok((status, result))
}
