//! Byte-stream framing: turns a raw TCP/TLS stream into complete
//! logical response units, holding partial data across reads and
//! resolving `{n}` literal announcements by waiting for exactly `n`
//! more bytes before the unit is considered complete.

use crate::error::{Error, Result};

/// One piece of a raw response unit: either plain text between
/// literals, or the literal's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Literal(Vec<u8>),
}

/// A complete, but not yet semantically parsed, server response. May
/// span several physical lines when it carries one or more literals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawUnit {
    pub parts: Vec<Part>,
}

impl RawUnit {
    /// The unit with every literal replaced by its byte length, useful
    /// for structural parsing that only needs to know a literal was
    /// present, not its content (e.g. locating the FETCH attribute
    /// list's closing paren).
    #[must_use]
    pub fn text_only(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(s) => out.push_str(s),
                Part::Literal(bytes) => {
                    out.push_str(&format!("{{{}}}", bytes.len()));
                }
            }
        }
        out
    }

    #[must_use]
    pub fn literals(&self) -> Vec<&[u8]> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Literal(b) => Some(b.as_slice()),
                Part::Text(_) => None,
            })
            .collect()
    }
}

/// Incremental framer. Feed it bytes as they arrive; pull out
/// complete units with [`Framer::next_unit`].
pub struct Framer {
    buf: Vec<u8>,
    max_literal_bytes: u64,
}

impl Framer {
    #[must_use]
    pub fn new(max_literal_bytes: u64) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            max_literal_bytes,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempt to pull the next complete unit out of the buffered
    /// bytes. Returns `Ok(None)` when more data is needed; never
    /// blocks.
    pub fn next_unit(&mut self) -> Result<Option<RawUnit>> {
        match scan(&self.buf, self.max_literal_bytes)? {
            Some((consumed, unit)) => {
                self.buf.drain(..consumed);
                Ok(Some(unit))
            }
            None => Ok(None),
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// If `line` ends in a literal announcement (`{n}` or the
/// non-synchronizing `{n+}`), return `n`.
fn literal_len(line: &[u8]) -> Option<u64> {
    if line.last() != Some(&b'}') {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    let mut inner = &line[open + 1..line.len() - 1];
    if inner.last() == Some(&b'+') {
        inner = &inner[..inner.len() - 1];
    }
    if inner.is_empty() || !inner.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(inner).ok()?.parse().ok()
}

fn strip_literal_marker(line: &[u8]) -> String {
    let open = line.iter().rposition(|&b| b == b'{').unwrap_or(line.len());
    String::from_utf8_lossy(&line[..open]).into_owned()
}

fn scan(buf: &[u8], max_literal_bytes: u64) -> Result<Option<(usize, RawUnit)>> {
    let mut consumed = 0usize;
    let mut parts = Vec::new();
    loop {
        let rest = &buf[consumed..];
        let Some(crlf_idx) = find_crlf(rest) else {
            return Ok(None);
        };
        let line = &rest[..crlf_idx];
        let after_line = consumed + crlf_idx + 2;

        if let Some(n) = literal_len(line) {
            if n > max_literal_bytes {
                return Err(Error::MalformedResponse(format!(
                    "literal of {n} bytes exceeds the configured maximum"
                )));
            }
            let need = after_line
                .checked_add(usize::try_from(n).map_err(|_| {
                    Error::MalformedResponse("literal length does not fit usize".into())
                })?)
                .ok_or_else(|| Error::MalformedResponse("literal length overflow".into()))?;
            if buf.len() < need {
                return Ok(None);
            }
            parts.push(Part::Text(strip_literal_marker(line)));
            parts.push(Part::Literal(buf[after_line..need].to_vec()));
            consumed = need;
            continue;
        }

        parts.push(Part::Text(String::from_utf8_lossy(line).into_owned()));
        consumed = after_line;
        return Ok(Some((consumed, RawUnit { parts })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_line_without_literal() {
        let mut framer = Framer::new(1024);
        framer.feed(b"* 4 EXISTS\r\n");
        let unit = framer.next_unit().unwrap().unwrap();
        assert_eq!(unit.text_only(), "* 4 EXISTS");
        assert!(framer.next_unit().unwrap().is_none());
    }

    #[test]
    fn partial_line_waits_for_more_bytes() {
        let mut framer = Framer::new(1024);
        framer.feed(b"* 4 EXI");
        assert!(framer.next_unit().unwrap().is_none());
        framer.feed(b"STS\r\n");
        let unit = framer.next_unit().unwrap().unwrap();
        assert_eq!(unit.text_only(), "* 4 EXISTS");
    }

    #[test]
    fn literal_waits_for_its_full_byte_count() {
        let mut framer = Framer::new(1024);
        framer.feed(b"* 1 FETCH (BODY[] {5}\r\n");
        assert!(framer.next_unit().unwrap().is_none());
        framer.feed(b"he");
        assert!(framer.next_unit().unwrap().is_none());
        framer.feed(b"llo)\r\n");
        let unit = framer.next_unit().unwrap().unwrap();
        assert_eq!(unit.literals(), vec![b"hello".as_slice()]);
        assert_eq!(unit.text_only(), "* 1 FETCH (BODY[] {5})");
    }

    #[test]
    fn oversized_literal_is_rejected() {
        let mut framer = Framer::new(4);
        framer.feed(b"* 1 FETCH (BODY[] {5}\r\n");
        assert!(framer.next_unit().is_err());
    }

    #[test]
    fn two_units_fed_together_are_both_extracted() {
        let mut framer = Framer::new(1024);
        framer.feed(b"* 1 EXISTS\r\n* 2 RECENT\r\n");
        let first = framer.next_unit().unwrap().unwrap();
        let second = framer.next_unit().unwrap().unwrap();
        assert_eq!(first.text_only(), "* 1 EXISTS");
        assert_eq!(second.text_only(), "* 2 RECENT");
    }
}
