//! LOGIN, CAPABILITY, and the XOAUTH2 SASL exchange.
//!
//! XOAUTH2 needs no special-casing beyond what the generic
//! [`CommandHandler`] already does: a continuation challenge arrives
//! as an ordinary [`Response::AuthenticationChallenge`] through the
//! same `on_untagged` callback every other handler uses, so both the
//! SASL-IR single-line shape and the plain two-step challenge/response
//! shape are handled by the same code — the caller-supplied
//! `on_challenge` closure decides what to write back in either case.

use super::{resolve, CommandHandler, TaggedOutcome};
use crate::codec::response::{Response, Untagged};
use crate::error::{Error, Result};
use crate::pipeline::Stage;
use std::sync::Arc;
use tokio::sync::oneshot;

pub fn login(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<Result<()>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        |_state: &mut (), _response: &Response| {},
        |(), outcome: TaggedOutcome| resolve(&outcome, (), Error::LoginFailed),
        tx,
    );
    (stage, rx)
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityResult {
    pub capabilities: Vec<String>,
}

pub fn capability(tag: impl Into<String>) -> (Arc<dyn Stage>, oneshot::Receiver<Result<CapabilityResult>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        Vec::<String>::new(),
        |state: &mut Vec<String>, response: &Response| {
            if let Response::Untagged(Untagged::Capability(caps)) = response {
                *state = caps.clone();
            }
        },
        |state, outcome| resolve(&outcome, CapabilityResult { capabilities: state }, Error::CommandFailed),
        tx,
    );
    (stage, rx)
}

/// Install an `AUTHENTICATE XOAUTH2` handler. `on_challenge` is called
/// with the raw (already base64-decoded) bytes of every continuation
/// the server sends; the caller writes whatever response line that
/// implies (the token line, or an empty line to abort after an error
/// challenge) directly to the connection.
pub fn xoauth2(
    tag: impl Into<String>,
    mut on_challenge: impl FnMut(&[u8]) + Send + 'static,
) -> (Arc<dyn Stage>, oneshot::Receiver<Result<()>>) {
    let (tx, rx) = oneshot::channel();
    let stage = CommandHandler::new(
        tag,
        (),
        move |_state: &mut (), response: &Response| {
            if let Response::AuthenticationChallenge(bytes) = response {
                on_challenge(bytes);
            }
        },
        |(), outcome| resolve(&outcome, (), Error::AuthFailed),
        tx,
    );
    (stage, rx)
}
