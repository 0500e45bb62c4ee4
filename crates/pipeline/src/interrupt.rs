//! Barge-in handling
//!
//! When the caller starts speaking while the assistant is generating or
//! still has audio queued, the in-flight turn is aborted: the shared turn
//! sequence advances (staling every outstanding token), queued outbound
//! audio below the new watermark is dropped at dequeue, and the cancel
//! notifier wakes stages blocked on slow providers. No provider call is
//! forcibly torn down; streams are dropped at the next stale check.

use callpipe_core::TurnSequence;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::events::{EventBus, PipelineEvent};

/// Decides whether caller speech constitutes a barge-in and executes it.
#[derive(Clone)]
pub struct InterruptionController {
    seq: Arc<TurnSequence>,
    /// Set by the engine while a turn is generating or synthesizing
    reply_active: Arc<AtomicBool>,
    /// Outbound frames enqueued but not yet written
    pending_out: Arc<AtomicUsize>,
    /// Lowest turn whose audio may still be written to the caller
    min_live_turn: Arc<AtomicU64>,
    cancel: Arc<Notify>,
    events: EventBus,
}

impl InterruptionController {
    pub fn new(seq: Arc<TurnSequence>, events: EventBus) -> Self {
        Self {
            seq,
            reply_active: Arc::new(AtomicBool::new(false)),
            pending_out: Arc::new(AtomicUsize::new(0)),
            min_live_turn: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(Notify::new()),
            events,
        }
    }

    /// Called by the ingest task the moment an utterance is confirmed,
    /// before the utterance's audio enters transcription. Returns the
    /// aborted turn if this was a barge-in.
    pub fn on_utterance_start(&self) -> Option<u64> {
        let speaking = self.reply_active.load(Ordering::Acquire)
            || self.pending_out.load(Ordering::Acquire) > 0;
        if !speaking {
            return None;
        }

        let aborted = self.seq.current();
        let next = self.seq.advance();
        self.min_live_turn.store(next, Ordering::Release);
        self.reply_active.store(false, Ordering::Release);
        self.cancel.notify_waiters();

        debug!(aborted_turn = aborted, "barge-in, aborting turn");
        self.events.emit(PipelineEvent::BargeIn {
            aborted_turn: aborted,
        });
        self.events
            .emit(PipelineEvent::TurnCancelled { turn: aborted });
        Some(aborted)
    }

    /// Mark the engine's current turn as in flight.
    pub fn turn_started(&self) {
        self.reply_active.store(true, Ordering::Release);
    }

    /// Mark the engine's current turn as resolved (completed, cancelled
    /// or failed). Queued audio keeps playing unless a barge-in drops it.
    pub fn turn_resolved(&self) {
        self.reply_active.store(false, Ordering::Release);
    }

    /// Notifier woken on every barge-in
    pub fn cancel_notify(&self) -> Arc<Notify> {
        self.cancel.clone()
    }

    /// Lowest turn whose queued audio is still allowed out
    pub fn min_live_turn(&self) -> u64 {
        self.min_live_turn.load(Ordering::Acquire)
    }

    pub(crate) fn pending_out(&self) -> Arc<AtomicUsize> {
        self.pending_out.clone()
    }

    pub(crate) fn min_live_turn_handle(&self) -> Arc<AtomicU64> {
        self.min_live_turn.clone()
    }
}
