//! Command descriptors and accumulated results.
//!
//! A [`Command`] is one outstanding AT request: the literal text to send,
//! an optional data payload written after the modem's `>` prompt (SMS PDU
//! submission), the intermediate and final pattern sets that classify
//! response lines, and a timeout. Commands are built with
//! [`CommandBuilder`] and submitted through a port handle.
//!
//! A [`CommandResult`] accumulates every matched line in arrival order;
//! the final line (a final-pattern match or the synthesized `TIMEOUT`) is
//! always last.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-unique identifier for one submitted command.
///
/// Used to name a command when cancelling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(u64);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// Default command timeout when the builder does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One AT request, fully prepared for submission.
#[derive(Debug, Clone)]
pub struct Command {
    id: CommandId,
    text: String,
    data: Option<Vec<u8>>,
    intermediates: Vec<String>,
    finals: Vec<String>,
    timeout: Duration,
}

impl Command {
    /// Start building a command from its literal text (without terminator).
    pub fn new(text: impl Into<String>) -> CommandBuilder {
        CommandBuilder {
            text: text.into(),
            data: None,
            intermediates: Vec::new(),
            finals: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// This command's unique id.
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// The command text, without terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The extra data payload written after the `>` prompt, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Ordered intermediate patterns. Empty means every non-final line is
    /// captured as an intermediate response.
    pub fn intermediates(&self) -> &[String] {
        &self.intermediates
    }

    /// Ordered final patterns; matching any of them ends the command.
    pub fn finals(&self) -> &[String] {
        &self.finals
    }

    /// The command timeout. [`Duration::ZERO`] marks fire-and-forget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether this command is fire-and-forget (no response expected).
    pub fn is_fire_and_forget(&self) -> bool {
        self.timeout.is_zero()
    }
}

/// Builder for [`Command`].
#[derive(Debug)]
pub struct CommandBuilder {
    text: String,
    data: Option<Vec<u8>>,
    intermediates: Vec<String>,
    finals: Vec<String>,
    timeout: Duration,
}

impl CommandBuilder {
    /// Attach a data payload to write verbatim once the modem emits its
    /// `>` prompt. The caller includes any trailing Ctrl-Z/ESC byte.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Append intermediate response patterns, in matching order.
    pub fn intermediate<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.intermediates
            .extend(patterns.iter().map(|p| p.as_ref().to_string()));
        self
    }

    /// Append final response patterns, in matching order. May be called
    /// more than once; all patterns accumulate.
    pub fn final_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.finals
            .extend(patterns.iter().map(|p| p.as_ref().to_string()));
        self
    }

    /// Set the command timeout. [`Duration::ZERO`] makes the command
    /// fire-and-forget: the engine writes the text and resolves
    /// immediately with an empty result, arming no timer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Finalize the command.
    ///
    /// # Panics
    ///
    /// Panics if no final pattern was supplied for a command that expects
    /// a response (nonzero timeout) -- there is no implicit "OK terminates
    /// everything" rule, and a response-bearing command without final
    /// patterns could only ever resolve by timeout, which is a caller bug.
    pub fn build(self) -> Command {
        assert!(
            !self.finals.is_empty() || self.timeout.is_zero(),
            "command '{}' has no final patterns",
            self.text
        );
        Command {
            id: CommandId(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed)),
            text: self.text,
            data: self.data,
            intermediates: self.intermediates,
            finals: self.finals,
            timeout: self.timeout,
        }
    }
}

/// The accumulated outcome of a completed command.
///
/// Lines appear in arrival order: all intermediate matches first, the
/// final line last. Owned by the caller once returned from the port; the
/// engine never mutates it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    lines: Vec<String>,
}

impl CommandResult {
    pub(crate) fn new() -> Self {
        CommandResult { lines: Vec::new() }
    }

    pub(crate) fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Number of captured lines, final line included.
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// The line at `index`, in arrival order.
    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    /// The final line: the terminal-pattern match or `TIMEOUT`.
    ///
    /// `None` only for a fire-and-forget command's empty result.
    pub fn final_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    /// Iterate over all captured lines in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cmd = Command::new("AT+CREG?")
            .final_patterns(&["OK", "ERROR"])
            .build();
        assert_eq!(cmd.text(), "AT+CREG?");
        assert!(cmd.data().is_none());
        assert!(cmd.intermediates().is_empty());
        assert_eq!(cmd.finals(), &["OK", "ERROR"]);
        assert_eq!(cmd.timeout(), DEFAULT_TIMEOUT);
        assert!(!cmd.is_fire_and_forget());
    }

    #[test]
    fn builder_full() {
        let cmd = Command::new("AT+CMGS=24")
            .data(b"07914400000000F1\x1a".to_vec())
            .intermediate(&["+CMGS:"])
            .final_patterns(&["OK"])
            .final_patterns(&["ERROR", "+CMS ERROR:"])
            .timeout(Duration::from_secs(10))
            .build();
        assert_eq!(cmd.data().unwrap().last(), Some(&0x1a));
        assert_eq!(cmd.intermediates(), &["+CMGS:"]);
        assert_eq!(cmd.finals(), &["OK", "ERROR", "+CMS ERROR:"]);
        assert_eq!(cmd.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn ids_are_unique() {
        let a = Command::new("AT").final_patterns(&["OK"]).build();
        let b = Command::new("AT").final_patterns(&["OK"]).build();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn fire_and_forget_needs_no_finals() {
        let cmd = Command::new("ATZ").timeout(Duration::ZERO).build();
        assert!(cmd.is_fire_and_forget());
        assert!(cmd.finals().is_empty());
    }

    #[test]
    #[should_panic(expected = "no final patterns")]
    fn missing_finals_panics() {
        let _ = Command::new("AT+CREG?").build();
    }

    #[test]
    fn result_accessors() {
        let mut result = CommandResult::new();
        result.push("+CREG: 0,1".into());
        result.push("OK".into());

        assert_eq!(result.num_lines(), 2);
        assert_eq!(result.line(0), Some("+CREG: 0,1"));
        assert_eq!(result.line(1), Some("OK"));
        assert_eq!(result.line(2), None);
        assert_eq!(result.final_line(), Some("OK"));
        assert_eq!(
            result.iter().collect::<Vec<_>>(),
            vec!["+CREG: 0,1", "OK"]
        );
    }

    #[test]
    fn empty_result() {
        let result = CommandResult::new();
        assert_eq!(result.num_lines(), 0);
        assert_eq!(result.final_line(), None);
    }
}
