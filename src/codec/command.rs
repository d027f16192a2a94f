//! Encoding outgoing tagged commands, including literal arguments.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Generates strictly increasing tags of the form `A0001`, `A0002`,
/// ... Shared (via `Arc`) between a connection and anything that needs
/// to pre-allocate a tag before a command is actually written, e.g. the
/// command-submission algorithm that installs a handler before writing
/// the line it answers to.
#[derive(Clone, Debug)]
pub struct TagGenerator {
    counter: Arc<AtomicU32>,
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TagGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicU32::new(1)),
        }
    }

    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("A{n:04}")
    }
}

/// One piece of an outgoing command line: literal text, or a byte
/// string that must be sent as an IMAP literal (`{n}` followed by the
/// raw bytes, after waiting for the server's `+` continuation).
#[derive(Debug, Clone)]
pub enum Segment {
    Text(String),
    Literal(Vec<u8>),
}

/// A fully assembled outgoing command, ready to be written segment by
/// segment (continuations require waiting for `+` between literal
/// segments).
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub tag: String,
    pub segments: Vec<Segment>,
}

impl Command {
    #[must_use]
    pub fn simple(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            segments: vec![Segment::Text(text.into())],
        }
    }

    #[must_use]
    pub fn with_literal(tag: impl Into<String>, prefix: impl Into<String>, literal: Vec<u8>, suffix: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            segments: vec![
                Segment::Text(prefix.into()),
                Segment::Literal(literal),
                Segment::Text(suffix.into()),
            ],
        }
    }

    /// Whether this command needs to pause for a `+` continuation
    /// before a later segment can be written.
    #[must_use]
    pub fn has_literal(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render the line(s) that precede the first literal, including
    /// the `{n}` announcement, for writers that send everything up to
    /// the first continuation point in one call.
    #[must_use]
    pub fn first_line(&self) -> Vec<u8> {
        let mut out = format!("{} ", self.tag).into_bytes();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.extend_from_slice(t.as_bytes()),
                Segment::Literal(bytes) => {
                    out.extend_from_slice(format!("{{{}}}", bytes.len()).as_bytes());
                    out.extend_from_slice(b"\r\n");
                    return out;
                }
            }
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Quote a mailbox name or other astring argument per the IMAP quoted
/// string grammar, escaping embedded quotes and backslashes. Mailbox
/// names containing control characters should use a literal instead;
/// this crate's callers stick to quoted strings for the common case.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
