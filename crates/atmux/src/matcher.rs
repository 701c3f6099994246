//! Prefix pattern matching for response classification.
//!
//! AT response matching is plain string-prefix matching, not regex: a
//! pattern like `+CREG:` matches any line beginning with those bytes.
//! Ties break to the first pattern in the caller-supplied order, which
//! only matters when one pattern is a prefix of another.

/// Find the first pattern that is a prefix of `line`.
///
/// Returns the index of the first matching pattern, or `None`.
///
/// # Example
///
/// ```
/// use atmux::matcher::match_prefix;
///
/// assert_eq!(match_prefix("+CME ERROR: 10", &["+CME ERROR:", "ERROR"]), Some(0));
/// assert_eq!(match_prefix("OK", &["+CME ERROR:", "ERROR"]), None);
/// ```
pub fn match_prefix<S: AsRef<str>>(line: &str, patterns: &[S]) -> Option<usize> {
    patterns
        .iter()
        .position(|p| line.starts_with(p.as_ref()))
}

/// Whether `line` matches the pattern set.
///
/// An empty pattern set matches any line -- used by commands that capture
/// every raw payload line as an intermediate response.
pub fn matches_any<S: AsRef<str>>(line: &str, patterns: &[S]) -> bool {
    patterns.is_empty() || match_prefix(line, patterns).is_some()
}
