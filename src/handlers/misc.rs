//! NOOP, IDLE, APPEND, ID, LOGOUT, QUOTA, NAMESPACE, and LIST.

use super::{resolve, CommandHandler};
use crate::codec::response::{Response, ResponseCode, Untagged};
use crate::error::Error;
use crate::events::{self, FetchAccumulator, ServerEvent};
use crate::pipeline::Stage;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

type NoopState = (Vec<ServerEvent>, FetchAccumulator);

/// NOOP's only purpose beyond keeping the connection alive is to let
/// the server announce mailbox changes; every untagged/FETCH response
/// observed before the tagged OK is converted to a `ServerEvent` and
/// handed back to the caller.
pub fn noop(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<ServerEvent>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (Vec::<ServerEvent>::new(), FetchAccumulator::default()),
        |(events, fetch_acc): &mut NoopState, response: &Response| {
            let event = if matches!(response, Response::Fetch(_)) {
                fetch_acc.push(response)
            } else {
                events::from_response(response)
            };
            if let Some(event) = event {
                events.push(event);
            }
        },
        |(events, _), outcome| resolve(&outcome, events, Error::CommandFailed),
        tx,
    );
    (stage, rx)
}

pub fn logout(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<()>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        |_state: &mut (), _response: &Response| {},
        |(), outcome| resolve(&outcome, (), Error::LogoutFailed),
        tx,
    );
    (stage, rx)
}

/// `(uid_validity, uid)` from an `APPENDUID` response code, when the
/// server supports UIDPLUS. `on_continuation` fires when the server's
/// `+` continuation arrives, signalling the caller to write the
/// literal message bytes.
pub fn append(
    tag: impl Into<String>,
    mut on_continuation: impl FnMut() + Send + 'static,
) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Option<(u32, u32)>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        move |_state: &mut (), response: &Response| {
            if matches!(response, Response::AuthenticationChallenge(_)) {
                on_continuation();
            }
        },
        |(), outcome| {
            let append_uid = match &outcome.code {
                Some(ResponseCode::AppendUid(validity, uid)) => Some((*validity, *uid)),
                _ => None,
            };
            resolve(&outcome, append_uid, Error::CommandFailed)
        },
        tx,
    );
    (stage, rx)
}

pub fn id(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Option<Vec<(String, String)>>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        None::<Vec<(String, String)>>,
        |state: &mut Option<Vec<(String, String)>>, response: &Response| {
            if let Response::Untagged(Untagged::Id(pairs)) = response {
                *state = pairs.clone();
            }
        },
        |state, outcome| resolve(&outcome, state, Error::CommandFailed),
        tx,
    );
    (stage, rx)
}

#[derive(Debug, Clone)]
pub struct QuotaResource {
    pub name: String,
    pub usage: u64,
    pub limit: u64,
}

pub fn quota(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<QuotaResource>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        Vec::<QuotaResource>::new(),
        |state: &mut Vec<QuotaResource>, response: &Response| {
            if let Response::Untagged(Untagged::Quota { resources, .. }) = response {
                state.extend(resources.iter().map(|(name, usage, limit)| QuotaResource {
                    name: name.clone(),
                    usage: *usage,
                    limit: *limit,
                }));
            }
        },
        |state, outcome| resolve(&outcome, state, Error::CommandFailed),
        tx,
    );
    (stage, rx)
}

pub fn namespace(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<String>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        Vec::<String>::new(),
        |state: &mut Vec<String>, response: &Response| {
            if let Response::Untagged(Untagged::Mailbox(crate::codec::response::MailboxData::Namespace(text))) = response {
                state.push(text.clone());
            }
        },
        |state, outcome| resolve(&outcome, state, Error::CommandFailed),
        tx,
    );
    (stage, rx)
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub flags: Vec<String>,
    pub delimiter: Option<char>,
    pub name: String,
}

pub fn list(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<crate::error::Result<Vec<ListEntry>>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        Vec::<ListEntry>::new(),
        |state: &mut Vec<ListEntry>, response: &Response| {
            if let Response::Untagged(Untagged::Mailbox(data)) = response {
                match data {
                    crate::codec::response::MailboxData::List { flags, delimiter, name }
                    | crate::codec::response::MailboxData::Lsub { flags, delimiter, name } => {
                        state.push(ListEntry {
                            flags: flags.clone(),
                            delimiter: *delimiter,
                            name: name.clone(),
                        });
                    }
                    _ => {}
                }
            }
        },
        |state, outcome| resolve(&outcome, state, Error::CommandFailed),
        tx,
    );
    (stage, rx)
}

/// A live IDLE handler: every untagged response observed while idling
/// is forwarded immediately over `events` (not buffered until
/// completion, since the whole point of IDLE is to react as
/// notifications arrive), and `done` resolves once the tagged reply to
/// `DONE` arrives.
pub struct IdleHandle {
    tag: String,
    events: mpsc::UnboundedSender<Response>,
    done: Mutex<Option<oneshot::Sender<crate::error::Result<()>>>>,
    idle_started: std::sync::atomic::AtomicBool,
    idle_started_notify: tokio::sync::Notify,
}

impl IdleHandle {
    /// Wait for the server's `+ idling` continuation, or return
    /// immediately if it already arrived. Callers bound this with a
    /// timeout themselves.
    pub async fn wait_idle_started(&self) {
        let notified = self.idle_started_notify.notified();
        if self.idle_started.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl Stage for IdleHandle {
    fn name(&self) -> &str {
        &self.tag
    }

    fn handle(&self, response: &Response) -> bool {
        match response {
            Response::IdleStarted => {
                self.idle_started.store(true, std::sync::atomic::Ordering::SeqCst);
                self.idle_started_notify.notify_waiters();
                false
            }
            Response::Tagged { tag, status, text, .. } if tag == &self.tag => {
                if let Some(done) = self.done.lock().expect("idle done poisoned").take() {
                    let result = if matches!(status, crate::codec::response::Status::Ok) {
                        Ok(())
                    } else {
                        Err(Error::CommandFailed(text.clone()))
                    };
                    let _ = done.send(result);
                }
                true
            }
            Response::Fatal(reason) => {
                if let Some(done) = self.done.lock().expect("idle done poisoned").take() {
                    let _ = done.send(Err(Error::ConnectionFailed(reason.clone())));
                }
                let _ = self.events.send(response.clone());
                true
            }
            other => {
                let _ = self.events.send(other.clone());
                false
            }
        }
    }
}

pub fn idle(
    tag: impl Into<String>,
) -> (
    Arc<IdleHandle>,
    mpsc::UnboundedReceiver<Response>,
    oneshot::Receiver<crate::error::Result<()>>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let handle = Arc::new(IdleHandle {
        tag: tag.into(),
        events: events_tx,
        done: Mutex::new(Some(done_tx)),
        idle_started: std::sync::atomic::AtomicBool::new(false),
        idle_started_notify: tokio::sync::Notify::new(),
    });
    (handle, events_rx, done_rx)
}
