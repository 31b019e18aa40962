//! Error bus
//!
//! Process-wide channel of unhandled failures. Guards subscribe to it and
//! claim the events that belong to their section.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{classify_message, FailureKind, FailureReport, ResilienceError};
use crate::section::SectionId;

const BUS_CAPACITY: usize = 256;

// == Failure Event ==
/// An unhandled failure observed somewhere in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEvent {
    /// Structural owner, when the thrower knew it
    pub section: Option<SectionId>,
    /// Structural kind, when the thrower knew it
    pub kind: Option<FailureKind>,
    pub message: String,
}

impl FailureEvent {
    /// An event with no structural tags.
    pub fn untagged(message: impl Into<String>) -> Self {
        Self {
            section: None,
            kind: None,
            message: message.into(),
        }
    }

    pub fn from_error(err: &ResilienceError) -> Self {
        Self {
            section: err.section().cloned(),
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }

    pub fn for_section(mut self, id: &SectionId) -> Self {
        self.section = Some(id.clone());
        self
    }

    /// Tagged events match by id. Untagged events match when the message
    /// names the section as a whole word.
    pub fn attributed_to(&self, id: &SectionId) -> bool {
        match &self.section {
            Some(owner) => owner == id,
            None => {
                let wanted = id.as_str().to_lowercase();
                self.message
                    .to_lowercase()
                    .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
                    .any(|word| word == wanted)
            }
        }
    }

    /// Structural kind, falling back to message heuristics.
    pub fn kind(&self) -> FailureKind {
        self.kind.unwrap_or_else(|| classify_message(&self.message))
    }

    pub fn report(&self, id: &SectionId) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            message: self.message.clone(),
            section: Some(id.clone()),
            detail: None,
        }
    }
}

// == Error Bus ==
/// Broadcast channel of [`FailureEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct ErrorBus {
    tx: broadcast::Sender<FailureEvent>,
}

impl Default for ErrorBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes an event; returns how many subscribers saw it.
    pub fn publish(&self, event: FailureEvent) -> usize {
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(delivered, "failure event published");
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FailureEvent> {
        self.tx.subscribe()
    }
}
