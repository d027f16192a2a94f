//! The server greeting: the one response with no tag, observed before
//! any command has been written.

use super::TaggedOutcome;
use crate::codec::response::{Response, Untagged};
use crate::error::{Error, Result};
use crate::pipeline::Stage;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct GreetingStage {
    reply: Mutex<Option<oneshot::Sender<Result<TaggedOutcome>>>>,
}

impl Stage for GreetingStage {
    fn name(&self) -> &str {
        "greeting"
    }

    fn handle(&self, response: &Response) -> bool {
        match response {
            Response::Untagged(Untagged::Conditional(cond)) => {
                if let Some(reply) = self.reply.lock().expect("greeting reply poisoned").take() {
                    let _ = reply.send(Ok(TaggedOutcome {
                        status: cond.status,
                        code: cond.code.clone(),
                        text: cond.text.clone(),
                    }));
                }
                true
            }
            Response::Fatal(reason) => {
                if let Some(reply) = self.reply.lock().expect("greeting reply poisoned").take() {
                    let _ = reply.send(Err(Error::GreetingFailed(reason.clone())));
                }
                true
            }
            _ => false,
        }
    }
}

/// Build the one-shot stage that resolves as soon as the server's
/// greeting line arrives (or fails if the connection dies first).
pub fn greeting(reply: oneshot::Sender<Result<TaggedOutcome>>) -> Arc<dyn Stage> {
    Arc::new(GreetingStage {
        reply: Mutex::new(Some(reply)),
    })
}
