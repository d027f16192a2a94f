//! SELECT/UNSELECT/CLOSE/CREATE/EXPUNGE/COPY/STORE/MOVE handlers.

use super::{resolve, CommandHandler, TaggedOutcome};
use crate::codec::response::{FetchEvent, MailboxData, Response, ResponseCode, Untagged};
use crate::error::Error;
use crate::pipeline::Stage;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Mailbox metadata gathered while a `SELECT`/`EXAMINE` completes.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub flags: Vec<String>,
    pub exists: u32,
    pub recent: u32,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<u32>,
    pub permanent_flags: Vec<String>,
    pub read_write: bool,
}

fn apply_selection_untagged(state: &mut Selection, response: &Response) {
    match response {
        Response::Untagged(Untagged::Mailbox(MailboxData::Flags(flags))) => state.flags = flags.clone(),
        Response::Untagged(Untagged::Mailbox(MailboxData::Exists(n))) => state.exists = *n,
        Response::Untagged(Untagged::Mailbox(MailboxData::Recent(n))) => state.recent = *n,
        Response::Untagged(Untagged::Conditional(cond)) => match &cond.code {
            Some(ResponseCode::PermanentFlags(f)) => state.permanent_flags = f.clone(),
            Some(ResponseCode::UidNext(n)) => state.uid_next = Some(*n),
            Some(ResponseCode::UidValidity(n)) => state.uid_validity = Some(*n),
            Some(ResponseCode::Unseen(n)) => state.unseen = Some(*n),
            Some(ResponseCode::ReadWrite) => state.read_write = true,
            Some(ResponseCode::ReadOnly) => state.read_write = false,
            _ => {}
        },
        _ => {}
    }
}

pub fn select(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Selection>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        Selection::default(),
        |state: &mut Selection, response: &Response| apply_selection_untagged(state, response),
        |mut state, outcome: TaggedOutcome| {
            if matches!(outcome.code, Some(ResponseCode::ReadWrite)) {
                state.read_write = true;
            }
            resolve(&outcome, state, Error::SelectFailed)
        },
        tx,
    );
    (stage, rx)
}

pub fn unselect(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<()>>) {
    simple(tag, Error::CommandFailed)
}

pub fn close(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<()>>) {
    simple(tag, Error::CommandFailed)
}

pub fn create(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<()>>) {
    simple(tag, Error::CreateFailed)
}

fn simple(
    tag: impl Into<String>,
    on_failure: fn(String) -> Error,
) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<()>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        |_state: &mut (), _response: &Response| {},
        move |(), outcome| resolve(&outcome, (), on_failure),
        tx,
    );
    (stage, rx)
}

/// Sequence numbers expunged by an `EXPUNGE` command, in the order the
/// server reported them.
pub fn expunge(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<u32>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        Vec::<u32>::new(),
        |state: &mut Vec<u32>, response: &Response| {
            if let Response::Untagged(Untagged::Message(crate::codec::response::MessageData::Expunge(n))) = response {
                state.push(*n);
            }
        },
        |state, outcome| resolve(&outcome, state, Error::ExpungeFailed),
        tx,
    );
    (stage, rx)
}

/// `(uid_validity, source_uids, destination_uids)` from a UIDPLUS
/// `COPYUID` response code, when the server supports it.
pub type CopyOutcome = Option<(u32, String, String)>;

pub fn copy_messages(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<CopyOutcome>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        |_state: &mut (), _response: &Response| {},
        |(), outcome| {
            let copy_uid = match &outcome.code {
                Some(ResponseCode::CopyUid(validity, src, dst)) => Some((*validity, src.clone(), dst.clone())),
                _ => None,
            };
            resolve(&outcome, copy_uid, Error::CopyFailed)
        },
        tx,
    );
    (stage, rx)
}

pub fn mov(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<CopyOutcome>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        |_state: &mut (), _response: &Response| {},
        |(), outcome| {
            let copy_uid = match &outcome.code {
                Some(ResponseCode::CopyUid(validity, src, dst)) => Some((*validity, src.clone(), dst.clone())),
                _ => None,
            };
            resolve(&outcome, copy_uid, Error::MoveFailed)
        },
        tx,
    );
    (stage, rx)
}

/// Per-message flag set reported by a `STORE` response (the server
/// answers with the same `* n FETCH (FLAGS (...))` shape a plain
/// FETCH uses).
pub fn store(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<(u32, Vec<String>)>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (Vec::<(u32, Vec<String>)>::new(), None::<u32>),
        |state: &mut (Vec<(u32, Vec<String>)>, Option<u32>), response: &Response| {
            let (records, current_seq) = state;
            match response {
                Response::Fetch(FetchEvent::Start { seq }) => *current_seq = Some(*seq),
                Response::Fetch(FetchEvent::SimpleAttribute { name, value }) if name.eq_ignore_ascii_case("FLAGS") => {
                    if let Some(seq) = *current_seq {
                        let flags = value
                            .trim_start_matches('(')
                            .trim_end_matches(')')
                            .split_whitespace()
                            .map(std::string::ToString::to_string)
                            .collect();
                        records.push((seq, flags));
                    }
                }
                Response::Fetch(FetchEvent::Finish) => *current_seq = None,
                _ => {}
            }
        },
        |(records, _), outcome| resolve(&outcome, records, Error::StoreFailed),
        tx,
    );
    (stage, rx)
}
