//! `ServerEvent`: the domain-level notifications the IDLE/NOOP streams
//! surface to callers, decoded from whatever untagged responses
//! happened to arrive while idling.

use crate::codec::response::{ConditionalState, FetchEvent, MailboxData, MessageData, Response, Untagged};
use tracing::debug;

/// A mailbox-change or server notification observed during IDLE/NOOP.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerEvent {
    Exists(u32),
    Recent(u32),
    Flags(Vec<String>),
    Expunge(u32),
    /// `FETCH` pushed unsolicited during IDLE, addressed by sequence
    /// number, carrying its FLAGS.
    FetchFlags { seq: u32, flags: Vec<String> },
    /// `UID FETCH` pushed unsolicited during IDLE, addressed by UID.
    FetchUid { uid: u32, flags: Vec<String> },
    /// `VANISHED <uid-set>` (not the `(EARLIER)` resync form — that
    /// form is ignored per the IDLE event-recognition list).
    Vanished { uid_set: String },
    Alert(String),
    Capability(Vec<String>),
    Bye(String),
}

/// Reduce a decoded response that is not part of a `FETCH` sub-event
/// stream to a `ServerEvent`, if it is one the IDLE loop cares about.
/// `VANISHED (EARLIER)`, tagged completions, and streaming FETCH
/// sub-events are deliberately not recognized here: the first is
/// logged and ignored, the others need `FetchAccumulator`.
#[must_use]
pub fn from_response(response: &Response) -> Option<ServerEvent> {
    match response {
        Response::Untagged(Untagged::Mailbox(MailboxData::Exists(n))) => Some(ServerEvent::Exists(*n)),
        Response::Untagged(Untagged::Mailbox(MailboxData::Recent(n))) => Some(ServerEvent::Recent(*n)),
        Response::Untagged(Untagged::Mailbox(MailboxData::Flags(flags))) => {
            Some(ServerEvent::Flags(flags.clone()))
        }
        Response::Untagged(Untagged::Message(MessageData::Expunge(n))) => Some(ServerEvent::Expunge(*n)),
        Response::Untagged(Untagged::Message(MessageData::Vanished { uid_set, earlier: true })) => {
            debug!(%uid_set, "ignoring VANISHED (EARLIER) observed during IDLE/NOOP");
            None
        }
        Response::Untagged(Untagged::Message(MessageData::Vanished { uid_set, earlier: false })) => {
            Some(ServerEvent::Vanished { uid_set: uid_set.clone() })
        }
        Response::Untagged(Untagged::Conditional(ConditionalState { code, text, .. })) => {
            if matches!(code, Some(crate::codec::response::ResponseCode::Alert)) {
                Some(ServerEvent::Alert(text.clone()))
            } else {
                None
            }
        }
        Response::Untagged(Untagged::Capability(caps)) => Some(ServerEvent::Capability(caps.clone())),
        Response::Fatal(reason) => Some(ServerEvent::Bye(reason.clone())),
        _ => None,
    }
}

/// Folds a streaming `FETCH` sub-event sequence (`Start`/`StartUid` →
/// `SimpleAttribute`* → `Finish`) observed during IDLE/NOOP into one
/// `ServerEvent`, emitted on `Finish`. A fresh accumulator should be
/// used per IDLE cycle; `Start` resets any half-finished record.
#[derive(Debug, Default)]
pub struct FetchAccumulator {
    seq: Option<u32>,
    uid: Option<u32>,
    flags: Vec<String>,
}

impl FetchAccumulator {
    pub fn push(&mut self, response: &Response) -> Option<ServerEvent> {
        let Response::Fetch(event) = response else {
            return None;
        };
        match event {
            FetchEvent::Start { seq } => {
                self.seq = Some(*seq);
                self.uid = None;
                self.flags.clear();
                None
            }
            FetchEvent::StartUid { uid } => {
                self.uid = Some(*uid);
                None
            }
            FetchEvent::SimpleAttribute { name, value } => {
                if name.eq_ignore_ascii_case("FLAGS") {
                    self.flags = value
                        .trim_start_matches('(')
                        .trim_end_matches(')')
                        .split_whitespace()
                        .map(str::to_string)
                        .collect();
                }
                None
            }
            FetchEvent::Finish => {
                let seq = self.seq.take()?;
                let flags = std::mem::take(&mut self.flags);
                match self.uid.take() {
                    Some(uid) => Some(ServerEvent::FetchUid { uid, flags }),
                    None => Some(ServerEvent::FetchFlags { seq, flags }),
                }
            }
            _ => None,
        }
    }
}

/// Convert a batch of previously buffered responses (e.g. drained from
/// the persistent buffer after a handler-gap) into the `ServerEvent`s
/// IDLE would have yielded had it been watching when they arrived.
#[must_use]
pub fn events_from_responses(responses: &[Response]) -> Vec<ServerEvent> {
    let mut fetch_acc = FetchAccumulator::default();
    let mut out = Vec::new();
    for response in responses {
        let event = if matches!(response, Response::Fetch(_)) {
            fetch_acc.push(response)
        } else {
            from_response(response)
        };
        if let Some(event) = event {
            out.push(event);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_maps_to_server_event() {
        let r = Response::Untagged(Untagged::Mailbox(MailboxData::Exists(4)));
        assert_eq!(from_response(&r), Some(ServerEvent::Exists(4)));
    }

    #[test]
    fn vanished_earlier_is_ignored_not_propagated() {
        let earlier = Response::Untagged(Untagged::Message(MessageData::Vanished {
            uid_set: "1:2".into(),
            earlier: true,
        }));
        assert_eq!(from_response(&earlier), None);
    }

    #[test]
    fn plain_vanished_is_a_server_event() {
        let r = Response::Untagged(Untagged::Message(MessageData::Vanished {
            uid_set: "1:2".into(),
            earlier: false,
        }));
        assert_eq!(from_response(&r), Some(ServerEvent::Vanished { uid_set: "1:2".into() }));
    }

    #[test]
    fn fatal_maps_to_bye_event() {
        let r = Response::Fatal("idle timeout".into());
        assert_eq!(from_response(&r), Some(ServerEvent::Bye("idle timeout".into())));
    }

    #[test]
    fn fetch_events_are_not_server_events_via_from_response() {
        let r = Response::Fetch(FetchEvent::Finish);
        assert_eq!(from_response(&r), None);
    }

    #[test]
    fn fetch_accumulator_emits_fetch_flags_for_seq_only() {
        let mut acc = FetchAccumulator::default();
        assert_eq!(acc.push(&Response::Fetch(FetchEvent::Start { seq: 7 })), None);
        assert_eq!(
            acc.push(&Response::Fetch(FetchEvent::SimpleAttribute {
                name: "FLAGS".into(),
                value: "(\\Seen \\Answered)".into(),
            })),
            None
        );
        assert_eq!(
            acc.push(&Response::Fetch(FetchEvent::Finish)),
            Some(ServerEvent::FetchFlags {
                seq: 7,
                flags: vec!["\\Seen".into(), "\\Answered".into()]
            })
        );
    }

    #[test]
    fn fetch_accumulator_emits_fetch_uid_when_uid_present() {
        let mut acc = FetchAccumulator::default();
        acc.push(&Response::Fetch(FetchEvent::Start { seq: 3 }));
        acc.push(&Response::Fetch(FetchEvent::StartUid { uid: 99 }));
        assert_eq!(
            acc.push(&Response::Fetch(FetchEvent::Finish)),
            Some(ServerEvent::FetchUid { uid: 99, flags: vec![] })
        );
    }

    #[test]
    fn events_from_responses_handles_a_mixed_gap_batch() {
        let batch = vec![
            Response::Untagged(Untagged::Mailbox(MailboxData::Exists(5))),
            Response::Fetch(FetchEvent::Start { seq: 5 }),
            Response::Fetch(FetchEvent::SimpleAttribute {
                name: "FLAGS".into(),
                value: "(\\Deleted)".into(),
            }),
            Response::Fetch(FetchEvent::Finish),
            Response::Untagged(Untagged::Message(MessageData::Expunge(5))),
        ];
        let events = events_from_responses(&batch);
        assert_eq!(
            events,
            vec![
                ServerEvent::Exists(5),
                ServerEvent::FetchFlags { seq: 5, flags: vec!["\\Deleted".into()] },
                ServerEvent::Expunge(5),
            ]
        );
    }
}
