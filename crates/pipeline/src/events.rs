//! Pipeline observability events
//!
//! Every session broadcasts the milestones of its pipeline over a
//! `tokio::sync::broadcast` channel. Subscribers (transport glue, tests,
//! monitoring) observe the session without being in the data path;
//! a lagging subscriber loses events, never audio.

use serde::Serialize;
use tokio::sync::broadcast;

/// Milestones emitted by a running session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    SessionStarted { session_id: String },
    /// Sustained caller speech confirmed
    UtteranceStarted,
    /// Caller speech interrupted assistant output; the named turn was aborted
    BargeIn { aborted_turn: u64 },
    PartialTranscript { text: String },
    FinalTranscript { text: String },
    TurnStarted { turn: u64 },
    ReplyDelta { turn: u64, text: String },
    TurnCompleted { turn: u64 },
    TurnCancelled { turn: u64 },
    TurnFailed { turn: u64, reason: String },
    /// One audio chunk written to the caller
    AudioOut { turn: u64 },
    SessionClosing { reason: String },
    SessionClosed,
}

/// Broadcast handle for session events. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}
