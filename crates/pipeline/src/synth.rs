//! Speech synthesis stage
//!
//! Reply deltas arrive as arbitrary token fragments; synthesis requests
//! are made per sentence so prosody stays natural and cancelled turns
//! waste at most one sentence of work. Text after the last sentence
//! boundary is flushed only on end-of-reply, so a failed reply never
//! speaks its dangling tail.

use callpipe_core::{ControlSignal, Error, Frame, Result, Synthesizer, TurnSequence, TurnToken};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::outbound::{OutboundFrame, OutboundHandle};

/// Accumulates deltas and yields complete sentences.
#[derive(Default)]
struct SentenceBuffer {
    buf: String,
}

impl SentenceBuffer {
    fn push(&mut self, delta: &str) {
        self.buf.push_str(delta);
    }

    /// Take the next complete sentence, if one is buffered.
    fn take_sentence(&mut self) -> Option<String> {
        let boundary = self
            .buf
            .char_indices()
            .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
            .map(|(i, c)| i + c.len_utf8())?;

        let rest = self.buf.split_off(boundary);
        let sentence = std::mem::replace(&mut self.buf, rest);
        let sentence = sentence.trim().to_string();
        if sentence.is_empty() {
            // Lone terminator; try again on the remainder
            return self.take_sentence();
        }
        Some(sentence)
    }

    /// Take whatever remains, sentence-terminated or not.
    fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buf);
        let tail = tail.trim().to_string();
        (!tail.is_empty()).then_some(tail)
    }
}

pub struct SpeechSynthesisStage {
    synthesizer: Arc<dyn Synthesizer>,
    chunk_timeout: Duration,
    seq: Arc<TurnSequence>,
    cancel: Arc<Notify>,
}

impl SpeechSynthesisStage {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        chunk_timeout: Duration,
        seq: Arc<TurnSequence>,
        cancel: Arc<Notify>,
    ) -> Self {
        Self {
            synthesizer,
            chunk_timeout,
            seq,
            cancel,
        }
    }

    /// Consume one turn's reply frames, synthesizing sentence by sentence
    /// into the outbound queue. Returns `Err(Cancelled)` on barge-in; any
    /// other error fails the turn.
    pub async fn run_turn(
        &self,
        token: TurnToken,
        mut cues: mpsc::Receiver<Frame>,
        out: OutboundHandle,
    ) -> Result<()> {
        let mut sentences = SentenceBuffer::default();

        while let Some(frame) = cues.recv().await {
            match frame {
                Frame::ReplyText { text, .. } => {
                    sentences.push(&text);
                    while let Some(sentence) = sentences.take_sentence() {
                        self.speak(token, &sentence, &out).await?;
                    }
                }
                Frame::Control(ControlSignal::EndOfReply) => {
                    if let Some(tail) = sentences.flush() {
                        self.speak(token, &tail, &out).await?;
                    }
                    return Ok(());
                }
                _ => {}
            }
        }

        // Cue sender dropped without EndOfReply: the reply was cancelled
        // or failed upstream. Discard the buffered tail.
        if self.seq.is_stale(token) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn speak(&self, token: TurnToken, text: &str, out: &OutboundHandle) -> Result<()> {
        if self.seq.is_stale(token) {
            return Err(Error::Cancelled);
        }
        debug!(turn = token.turn(), chars = text.len(), "synthesizing");

        let mut audio = self.synthesizer.synthesize(text);
        loop {
            let next = tokio::select! {
                _ = self.cancel.notified() => {
                    return Err(Error::Cancelled);
                }
                next = tokio::time::timeout(self.chunk_timeout, audio.next()) => next,
            };

            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    warn!(
                        turn = token.turn(),
                        model = self.synthesizer.model_name(),
                        "synthesis timed out"
                    );
                    return Err(Error::ProviderTimeout(self.chunk_timeout));
                }
            };

            match item {
                Some(Ok(chunk)) => {
                    if self.seq.is_stale(token) {
                        return Err(Error::Cancelled);
                    }
                    out.send(OutboundFrame { token, chunk }).await?;
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(()),
            }
        }
    }
}
