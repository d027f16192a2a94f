//! `FETCH`, in its three common shapes: structure-only (FLAGS/ENVELOPE/
//! INTERNALDATE/RFC822.SIZE), a single body part, and a lightweight
//! "info" fetch (UID + FLAGS only, used to cheaply discover new
//! messages). All three share the same event-collection logic; only
//! the command text the caller sends (built in `connection.rs`)
//! differs, so one handler constructor serves all three.

use super::{resolve, CommandHandler, TaggedOutcome};
use crate::codec::response::{FetchEvent, Response};
use crate::error::Error;
use crate::pipeline::Stage;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Which FETCH shape a caller is issuing. Carried only for API clarity
/// at call sites — the handler itself is shape-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Structure,
    BodyPart,
    Info,
}

/// One message's worth of FETCH data.
#[derive(Debug, Clone, Default)]
pub struct FetchRecord {
    pub seq: u32,
    pub uid: Option<u32>,
    pub attributes: Vec<(String, String)>,
    pub sections: Vec<(String, Vec<u8>)>,
}

/// `records`, `current`, `pending_section`, and — for `FetchKind::BodyPart`
/// only — whether the first body section has already been fully
/// streamed, so any further section in the same FETCH response is
/// discarded instead of appended.
type FetchState = (Vec<FetchRecord>, Option<FetchRecord>, Option<String>, bool);

fn apply_fetch_event(state: &mut FetchState, response: &Response, kind: FetchKind) {
    let (records, current, pending_section, first_part_done) = state;
    let Response::Fetch(event) = response else {
        return;
    };
    match event {
        FetchEvent::Start { seq } => {
            *current = Some(FetchRecord {
                seq: *seq,
                ..Default::default()
            });
            *first_part_done = false;
        }
        FetchEvent::StartUid { uid } => {
            if let Some(record) = current.as_mut() {
                record.uid = Some(*uid);
            }
        }
        FetchEvent::SimpleAttribute { name, value } => {
            if let Some(record) = current.as_mut() {
                record.attributes.push((name.clone(), value.clone()));
            }
        }
        FetchEvent::StreamingBegin { section, .. } => {
            if kind == FetchKind::BodyPart && *first_part_done {
                *pending_section = None;
            } else {
                *pending_section = Some(section.clone());
            }
        }
        FetchEvent::StreamingBytes { bytes } => {
            if let (Some(record), Some(section)) = (current.as_mut(), pending_section.clone()) {
                record.sections.push((section, bytes.clone()));
            }
        }
        FetchEvent::StreamingEnd => {
            if kind == FetchKind::BodyPart && pending_section.is_some() {
                *first_part_done = true;
            }
            *pending_section = None;
        }
        FetchEvent::Finish => {
            if let Some(record) = current.take() {
                records.push(record);
            }
            *first_part_done = false;
        }
    }
}

pub fn fetch(
    tag: impl Into<String>,
    kind: FetchKind,
) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<FetchRecord>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (Vec::<FetchRecord>::new(), None, None, false),
        move |state: &mut FetchState, response: &Response| apply_fetch_event(state, response, kind),
        |(records, _, _, _), outcome: TaggedOutcome| resolve(&outcome, records, Error::FetchFailed),
        tx,
    );
    (stage, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(seq: u32) -> Response {
        Response::Fetch(FetchEvent::Start { seq })
    }

    fn begin(section: &str) -> Response {
        Response::Fetch(FetchEvent::StreamingBegin {
            section: section.to_string(),
            size: 0,
        })
    }

    fn bytes(b: &[u8]) -> Response {
        Response::Fetch(FetchEvent::StreamingBytes { bytes: b.to_vec() })
    }

    #[test]
    fn body_part_fetch_discards_sections_after_the_first() {
        let mut state: FetchState = (Vec::new(), None, None, false);
        for r in [
            start(1),
            begin("1"),
            bytes(b"hello"),
            Response::Fetch(FetchEvent::StreamingEnd),
            begin("2"),
            bytes(b"world"),
            Response::Fetch(FetchEvent::StreamingEnd),
            Response::Fetch(FetchEvent::Finish),
        ] {
            apply_fetch_event(&mut state, &r, FetchKind::BodyPart);
        }
        let (records, ..) = state;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sections, vec![("1".to_string(), b"hello".to_vec())]);
    }

    #[test]
    fn structure_fetch_keeps_every_section() {
        let mut state: FetchState = (Vec::new(), None, None, false);
        for r in [
            start(1),
            begin("1"),
            bytes(b"hello"),
            Response::Fetch(FetchEvent::StreamingEnd),
            begin("2"),
            bytes(b"world"),
            Response::Fetch(FetchEvent::StreamingEnd),
            Response::Fetch(FetchEvent::Finish),
        ] {
            apply_fetch_event(&mut state, &r, FetchKind::Structure);
        }
        let (records, ..) = state;
        assert_eq!(records[0].sections.len(), 2);
    }
}
