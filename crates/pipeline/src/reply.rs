//! Reply generation stage
//!
//! One provider call per turn, against an immutable history snapshot
//! taken when the turn starts. Token deltas are forwarded to synthesis
//! as they arrive and accumulated locally; only a reply whose stream
//! completes normally is committed to the conversation history, so a
//! cancelled or failed turn leaves no partial trace.

use callpipe_core::{ControlSignal, Error, Frame, Message, ReplyModel, TurnSequence, TurnToken};
use futures::StreamExt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::events::{EventBus, PipelineEvent};

/// How a reply attempt ended
#[derive(Debug)]
pub enum ReplyOutcome {
    /// Full reply text; safe to commit to history
    Completed(String),
    /// Invalidated by barge-in; commit nothing, log nothing as failure
    Cancelled,
    /// Provider failure; the turn is lost but the session continues
    Failed(Error),
}

pub struct ReplyGenerationStage {
    model: Arc<dyn ReplyModel>,
    token_timeout: Duration,
    seq: Arc<TurnSequence>,
    cancel: Arc<Notify>,
    events: EventBus,
}

impl ReplyGenerationStage {
    pub fn new(
        model: Arc<dyn ReplyModel>,
        token_timeout: Duration,
        seq: Arc<TurnSequence>,
        cancel: Arc<Notify>,
        events: EventBus,
    ) -> Self {
        Self {
            model,
            token_timeout,
            seq,
            cancel,
            events,
        }
    }

    /// Generate one reply, streaming `ReplyText` frames into `cues` for
    /// synthesis.
    ///
    /// On completion sends an `EndOfReply` control frame so synthesis
    /// flushes its tail; on failure or cancellation the cue sender is
    /// dropped without it, so buffered unspoken text is discarded.
    pub async fn run_turn(
        &self,
        token: TurnToken,
        history: Vec<Message>,
        cues: mpsc::Sender<Frame>,
    ) -> ReplyOutcome {
        let mut stream = self.model.generate(history);
        let mut full_text = String::new();
        let mut cancelled = pin!(self.cancel.notified());
        cancelled.as_mut().enable();

        loop {
            if self.seq.is_stale(token) {
                return ReplyOutcome::Cancelled;
            }

            let next = tokio::select! {
                _ = &mut cancelled => {
                    return ReplyOutcome::Cancelled;
                }
                next = tokio::time::timeout(self.token_timeout, stream.next()) => next,
            };

            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    warn!(
                        turn = token.turn(),
                        model = self.model.model_name(),
                        "reply model timed out"
                    );
                    return ReplyOutcome::Failed(Error::ProviderTimeout(self.token_timeout));
                }
            };

            match item {
                Some(Ok(delta)) => {
                    if self.seq.is_stale(token) {
                        return ReplyOutcome::Cancelled;
                    }
                    full_text.push_str(&delta);
                    self.events.emit(PipelineEvent::ReplyDelta {
                        turn: token.turn(),
                        text: delta.clone(),
                    });
                    // Synthesis going away mid-turn surfaces on its side;
                    // keep accumulating so a completed reply still commits.
                    let _ = cues.send(Frame::ReplyText { token, text: delta }).await;
                }
                Some(Err(err)) => {
                    if err.is_cancellation() {
                        return ReplyOutcome::Cancelled;
                    }
                    warn!(
                        turn = token.turn(),
                        model = self.model.model_name(),
                        error = %err,
                        "reply model failed"
                    );
                    return ReplyOutcome::Failed(err);
                }
                None => {
                    if self.seq.is_stale(token) {
                        return ReplyOutcome::Cancelled;
                    }
                    debug!(
                        turn = token.turn(),
                        chars = full_text.len(),
                        "reply complete"
                    );
                    let _ = cues
                        .send(Frame::Control(ControlSignal::EndOfReply))
                        .await;
                    return ReplyOutcome::Completed(full_text);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpipe_core::TokenStream;

    struct ScriptedModel {
        tokens: Vec<callpipe_core::Result<String>>,
    }

    impl ReplyModel for ScriptedModel {
        fn generate(&self, _history: Vec<Message>) -> TokenStream {
            Box::pin(futures::stream::iter(self.tokens.clone()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Never yields; used to exercise timeout and cancellation wake-up.
    struct SilentModel;

    impl ReplyModel for SilentModel {
        fn generate(&self, _history: Vec<Message>) -> TokenStream {
            Box::pin(futures::stream::pending())
        }

        fn model_name(&self) -> &str {
            "silent"
        }
    }

    fn stage(model: Arc<dyn ReplyModel>, seq: Arc<TurnSequence>) -> ReplyGenerationStage {
        ReplyGenerationStage::new(
            model,
            Duration::from_millis(200),
            seq,
            Arc::new(Notify::new()),
            EventBus::new(64),
        )
    }

    #[tokio::test]
    async fn test_completed_reply_accumulates_all_deltas() {
        let seq = Arc::new(TurnSequence::new());
        let stage = stage(
            Arc::new(ScriptedModel {
                tokens: vec![Ok("Sunny ".to_string()), Ok("all week.".to_string())],
            }),
            seq.clone(),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = stage.run_turn(seq.mint(), vec![], tx).await;

        match outcome {
            ReplyOutcome::Completed(text) => assert_eq!(text, "Sunny all week."),
            other => panic!("expected completion, got {other:?}"),
        }

        assert!(matches!(rx.recv().await, Some(Frame::ReplyText { .. })));
        assert!(matches!(rx.recv().await, Some(Frame::ReplyText { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(Frame::Control(ControlSignal::EndOfReply))
        ));
    }

    #[tokio::test]
    async fn test_stale_token_cancels_before_streaming() {
        let seq = Arc::new(TurnSequence::new());
        let token = seq.mint();
        seq.advance();

        let stage = stage(
            Arc::new(ScriptedModel {
                tokens: vec![Ok("never spoken".to_string())],
            }),
            seq,
        );

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = stage.run_turn(token, vec![], tx).await;
        assert!(matches!(outcome, ReplyOutcome::Cancelled));
        // No EndOfReply, so downstream discards any buffered text
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_notification_wakes_hung_provider() {
        let seq = Arc::new(TurnSequence::new());
        let cancel = Arc::new(Notify::new());
        let stage = ReplyGenerationStage::new(
            Arc::new(SilentModel),
            Duration::from_secs(30),
            seq.clone(),
            cancel.clone(),
            EventBus::new(16),
        );

        let token = seq.mint();
        let (tx, _rx) = mpsc::channel(8);
        let task = tokio::spawn(async move { stage.run_turn(token, vec![], tx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        seq.advance();
        cancel.notify_waiters();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ReplyOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout_fails_the_turn() {
        let seq = Arc::new(TurnSequence::new());
        let stage = ReplyGenerationStage::new(
            Arc::new(SilentModel),
            Duration::from_millis(50),
            seq.clone(),
            Arc::new(Notify::new()),
            EventBus::new(16),
        );

        let (tx, _rx) = mpsc::channel(8);
        let outcome = stage.run_turn(seq.mint(), vec![], tx).await;
        match outcome {
            ReplyOutcome::Failed(err) => assert!(err.is_turn_recoverable()),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
