//! The persistent untagged-response buffer: the pipeline's terminal
//! stage, always present, that accumulates whatever no transient
//! command handler already fully owns (and, per the two-phase
//! delivery model, *everything* a command handler saw too).

use crate::codec::Response;
use crate::pipeline::Stage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Inner {
    buffer: Vec<Response>,
    termination_reasons: Vec<String>,
}

/// The always-present tail stage of the response pipeline.
pub struct PersistentBuffer {
    /// Set while a command-scoped handler is actively installed, so
    /// callers can tell "nothing happened" apart from "a handler is
    /// mid-flight and hasn't forwarded anything buffer-worthy yet".
    active_handler_flag: AtomicBool,
    inner: Mutex<Inner>,
}

impl Default for PersistentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active_handler_flag: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn set_active_handler(&self, active: bool) {
        self.active_handler_flag.store(active, Ordering::SeqCst);
    }

    #[must_use]
    pub fn has_active_handler(&self) -> bool {
        self.active_handler_flag.load(Ordering::SeqCst)
    }

    /// Remove and return every buffered response, oldest first.
    pub fn drain(&self) -> Vec<Response> {
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        std::mem::take(&mut inner.buffer)
    }

    /// Remove and return every recorded termination reason (`* BYE`
    /// text or fatal transport errors observed while this buffer was
    /// the only thing watching the stream).
    pub fn drain_termination_reasons(&self) -> Vec<String> {
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        std::mem::take(&mut inner.termination_reasons)
    }

    /// Clear buffered responses and termination reasons without
    /// returning them, e.g. right after a reconnect makes them stale.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        inner.buffer.clear();
        inner.termination_reasons.clear();
    }

    #[must_use]
    pub fn has_termination(&self) -> bool {
        !self
            .inner
            .lock()
            .expect("buffer lock poisoned")
            .termination_reasons
            .is_empty()
    }

    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.inner.lock().expect("buffer lock poisoned").buffer.len()
    }
}

impl Stage for PersistentBuffer {
    fn name(&self) -> &str {
        "persistent-buffer"
    }

    fn handle(&self, response: &Response) -> bool {
        // Tagged completions belong to whichever command-scoped handler
        // issued them; if one reaches the terminal stage, no handler
        // claimed it. Never buffered, only logged.
        if let Response::Tagged { tag, .. } = response {
            debug!(%tag, "dropping unclaimed tagged response at persistent buffer");
            return false;
        }

        // A live command-scoped handler already saw this response (the
        // pipeline forwards to every stage); the buffer only needs to
        // step in for server-pushed data with nobody else watching.
        if self.active_handler_flag.load(Ordering::SeqCst) {
            return false;
        }

        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        if let Response::Fatal(reason) = response {
            inner.termination_reasons.push(reason.clone());
        }
        inner.buffer.push(response.clone());
        false
    }
}
