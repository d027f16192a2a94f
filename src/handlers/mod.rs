//! Command-scoped pipeline stages.
//!
//! Every IMAP command installs one of these immediately before the
//! persistent buffer, accumulates whatever untagged data belongs to
//! it, and resolves a `oneshot` reply the moment its tagged completion
//! arrives — at which point it removes itself from the pipeline.

mod auth;
mod fetch;
mod greeting;
mod mailbox;
mod misc;
mod search;

pub use auth::{capability, login, xoauth2, CapabilityResult};
pub use fetch::{fetch, FetchKind, FetchRecord};
pub use greeting::greeting;
pub use mailbox::{close, copy_messages, create, expunge, mov, select, store, unselect, CopyOutcome, Selection};
pub use misc::{append, id, list, logout, namespace, noop, quota, IdleHandle, ListEntry, QuotaResource};
pub use search::search;

use crate::codec::response::{Response, ResponseCode, Status};
use crate::error::{Error, Result};
use crate::pipeline::Stage;
use tokio::sync::oneshot;
use tracing::warn;

use std::sync::Mutex;

/// The parsed tagged-completion line, handed to a handler's `finish`
/// closure once the matching tag arrives.
#[derive(Debug, Clone)]
pub struct TaggedOutcome {
    pub status: Status,
    pub code: Option<ResponseCode>,
    pub text: String,
}

/// Turn a non-OK tagged completion into the right `Error` variant via
/// the caller-supplied constructor, or `Ok(value)` on success.
///
/// A `CLIENTBUG` response code is logged regardless of outcome: the
/// server is telling us our command was malformed in a way it chose to
/// tolerate, which is worth a warning even when the command otherwise
/// succeeded.
pub fn resolve<T>(outcome: &TaggedOutcome, value: T, on_failure: impl FnOnce(String) -> Error) -> Result<T> {
    if let Some(ResponseCode::ClientBug(text)) = &outcome.code {
        warn!(%text, "server reported CLIENTBUG");
    }
    match outcome.status {
        Status::Ok => Ok(value),
        _ => Err(on_failure(outcome.text.clone())),
    }
}

/// A generic command-scoped pipeline stage: accumulates untagged
/// responses into `T`, then finalizes into `R` once its tag's tagged
/// completion arrives, delivering the result through a `oneshot`.
pub struct CommandHandler<T, R> {
    tag: String,
    on_untagged: Mutex<Box<dyn FnMut(&mut T, &Response) + Send>>,
    state: Mutex<Option<T>>,
    finish: Mutex<Option<Box<dyn FnOnce(T, TaggedOutcome) -> Result<R> + Send>>>,
    reply: Mutex<Option<oneshot::Sender<Result<R>>>>,
}

impl<T, R> CommandHandler<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new(
        tag: impl Into<String>,
        initial: T,
        on_untagged: impl FnMut(&mut T, &Response) + Send + 'static,
        finish: impl FnOnce(T, TaggedOutcome) -> Result<R> + Send + 'static,
        reply: oneshot::Sender<Result<R>>,
    ) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            tag: tag.into(),
            on_untagged: Mutex::new(Box::new(on_untagged)),
            state: Mutex::new(Some(initial)),
            finish: Mutex::new(Some(Box::new(finish))),
            reply: Mutex::new(Some(reply)),
        })
    }
}

impl<T, R> Stage for CommandHandler<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &str {
        &self.tag
    }

    fn handle(&self, response: &Response) -> bool {
        match response {
            Response::Tagged { tag, status, code, text } if tag == &self.tag => {
                let Some(state) = self.state.lock().expect("handler state poisoned").take() else {
                    return true;
                };
                let outcome = TaggedOutcome {
                    status: *status,
                    code: code.clone(),
                    text: text.clone(),
                };
                let Some(finish) = self.finish.lock().expect("handler finish poisoned").take() else {
                    return true;
                };
                let result = finish(state, outcome);
                if let Some(reply) = self.reply.lock().expect("handler reply poisoned").take() {
                    let _ = reply.send(result);
                }
                true
            }
            Response::Fatal(reason) => {
                if let Some(reply) = self.reply.lock().expect("handler reply poisoned").take() {
                    let _ = reply.send(Err(Error::ConnectionFailed(reason.clone())));
                }
                true
            }
            other => {
                let mut on_untagged = self.on_untagged.lock().expect("handler callback poisoned");
                if let Some(state) = self.state.lock().expect("handler state poisoned").as_mut() {
                    on_untagged(state, other);
                }
                false
            }
        }
    }
}
