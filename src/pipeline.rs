//! The response pipeline: an ordered chain of stages every decoded
//! response is forwarded through, head to tail.
//!
//! Command-scoped handlers sit near the head and install themselves
//! immediately before the persistent buffer; the buffer itself is
//! always the tail. Because forwarding is unconditional rather than
//! "first stage to claim it wins", the buffer observes every response
//! even while a transient handler is actively consuming the same
//! stream for its own command — the two-phase "handle, then forward"
//! delivery the connection engine relies on to never lose an untagged
//! line.

use crate::codec::Response;
use std::sync::{Arc, Mutex};

/// A single link in the pipeline.
pub trait Stage: Send + Sync {
    /// Unique name used for ordering (`Position::Before`) and removal.
    fn name(&self) -> &str;

    /// Process one response. Return `true` once this stage has nothing
    /// further to do and should be removed from the pipeline.
    fn handle(&self, response: &Response) -> bool;
}

/// Where a new stage is inserted.
pub enum Position<'a> {
    /// At the tail, after every existing stage.
    Last,
    /// Immediately before the named stage (used to install a
    /// command-scoped handler directly ahead of the persistent
    /// buffer).
    Before(&'a str),
}

/// The ordered stage chain itself.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<Mutex<Vec<Arc<dyn Stage>>>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add(&self, stage: Arc<dyn Stage>, position: Position<'_>) {
        let mut stages = self.stages.lock().expect("pipeline lock poisoned");
        match position {
            Position::Last => stages.push(stage),
            Position::Before(name) => {
                let idx = stages
                    .iter()
                    .position(|s| s.name() == name)
                    .unwrap_or(stages.len());
                stages.insert(idx, stage);
            }
        }
    }

    /// Remove a stage by name. Idempotent: removing a name that is not
    /// present (already removed, or never added) is a no-op.
    pub fn remove(&self, name: &str) {
        let mut stages = self.stages.lock().expect("pipeline lock poisoned");
        stages.retain(|s| s.name() != name);
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.stages
            .lock()
            .expect("pipeline lock poisoned")
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Deliver one response through the full chain in order. Stages
    /// that report completion are removed once the pass finishes, so a
    /// handler consuming the response that completes it does not
    /// change what later stages in the *same* pass observe.
    pub fn dispatch(&self, response: &Response) {
        let snapshot: Vec<Arc<dyn Stage>> = self
            .stages
            .lock()
            .expect("pipeline lock poisoned")
            .clone();

        let mut finished = Vec::new();
        for stage in &snapshot {
            if stage.handle(response) {
                finished.push(stage.name().to_string());
            }
        }

        if !finished.is_empty() {
            let mut stages = self.stages.lock().expect("pipeline lock poisoned");
            stages.retain(|s| !finished.iter().any(|f| f == s.name()));
        }
    }
}
