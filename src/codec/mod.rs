//! The wire codec: incremental decoding of server responses and
//! encoding of outgoing commands.

mod command;
mod framer;
mod parse;
pub mod response;

pub use command::{quote, Command, Segment, TagGenerator};
pub use response::{ConditionalState, FetchEvent, MailboxData, MessageData, Response, ResponseCode, Status, Untagged};

use crate::error::Result;
use framer::Framer;

/// Incremental decoder. Wraps the byte-level [`Framer`] with the
/// semantic parser so callers just feed bytes and drain responses.
pub struct Decoder {
    framer: Framer,
}

impl Decoder {
    #[must_use]
    pub fn new(max_literal_bytes: u64) -> Self {
        Self {
            framer: Framer::new(max_literal_bytes),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.framer.feed(bytes);
    }

    /// Drain every response that can currently be fully decoded from
    /// the buffered bytes, in wire order.
    pub fn decode_ready(&mut self) -> Result<Vec<Response>> {
        let mut out = Vec::new();
        while let Some(unit) = self.framer.next_unit()? {
            out.extend(parse::parse_unit(&unit)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_drains_multiple_responses_from_one_feed() {
        let mut decoder = Decoder::new(1024 * 1024);
        decoder.feed(b"* 2 EXISTS\r\n* 1 RECENT\r\nA1 OK NOOP completed\r\n");
        let responses = decoder.decode_ready().unwrap();
        assert_eq!(responses.len(), 3);
    }

    #[test]
    fn decoder_waits_for_a_split_response() {
        let mut decoder = Decoder::new(1024 * 1024);
        decoder.feed(b"* 2 EXI");
        assert!(decoder.decode_ready().unwrap().is_empty());
        decoder.feed(b"STS\r\n");
        assert_eq!(decoder.decode_ready().unwrap().len(), 1);
    }
}
