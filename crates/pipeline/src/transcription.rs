//! Streaming transcription stage
//!
//! One provider feed per utterance. The ingest task opens a feed when an
//! utterance is confirmed, forwards speech-tagged audio into it, and
//! closes it at utterance end; the provider sees end-of-feed and emits
//! its final result. Partial deltas are surfaced as events only and never
//! touch conversation state.

use callpipe_core::{AudioChunk, Error, Result, Transcriber, TranscriptDelta};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::events::{EventBus, PipelineEvent};

struct ActiveUtterance {
    feed: mpsc::Sender<AudioChunk>,
    consumer: JoinHandle<Result<TranscriptDelta>>,
}

/// Drives one transcription provider, one utterance at a time.
pub struct TranscriptionStage {
    transcriber: Arc<dyn Transcriber>,
    delta_timeout: Duration,
    /// Audio frames buffered toward the provider per utterance
    feed_capacity: usize,
    events: EventBus,
    active: Option<ActiveUtterance>,
}

impl TranscriptionStage {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        delta_timeout: Duration,
        feed_capacity: usize,
        events: EventBus,
    ) -> Self {
        Self {
            transcriber,
            delta_timeout,
            feed_capacity,
            events,
            active: None,
        }
    }

    /// Open a provider feed for a newly confirmed utterance. An utterance
    /// already in progress is abandoned first.
    pub fn begin_utterance(&mut self) {
        if let Some(stale) = self.active.take() {
            warn!("new utterance before previous feed closed, abandoning it");
            stale.consumer.abort();
        }

        let (feed, rx) = mpsc::channel(self.feed_capacity);
        let mut deltas = self
            .transcriber
            .transcribe(Box::pin(ReceiverStream::new(rx)));

        let timeout = self.delta_timeout;
        let events = self.events.clone();
        let consumer = tokio::spawn(async move {
            loop {
                let next = tokio::time::timeout(timeout, deltas.next())
                    .await
                    .map_err(|_| Error::ProviderTimeout(timeout))?;
                match next {
                    Some(Ok(delta)) if delta.is_final => {
                        debug!(confidence = delta.confidence, "final transcript");
                        return Ok(delta);
                    }
                    Some(Ok(delta)) => {
                        events.emit(PipelineEvent::PartialTranscript { text: delta.text });
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(Error::ProviderRejected(
                            "transcript stream ended without a final result".to_string(),
                        ))
                    }
                }
            }
        });

        self.active = Some(ActiveUtterance { feed, consumer });
    }

    /// Forward one chunk of utterance audio into the open feed.
    pub async fn push_audio(&mut self, chunk: AudioChunk) {
        if let Some(active) = &self.active {
            // Send fails only if the consumer already finished or died;
            // end_utterance surfaces that outcome.
            let _ = active.feed.send(chunk).await;
        }
    }

    /// Close the feed and wait for the provider's final result.
    pub async fn end_utterance(&mut self) -> Result<TranscriptDelta> {
        let active = self.active.take().ok_or_else(|| {
            Error::ProviderRejected("utterance ended without an open feed".to_string())
        })?;

        drop(active.feed);
        let delta = active
            .consumer
            .await
            .map_err(|err| Error::ProviderRejected(format!("transcription task died: {err}")))??;

        self.events.emit(PipelineEvent::FinalTranscript {
            text: delta.text.clone(),
        });
        Ok(delta)
    }

    /// Abandon any in-flight utterance during teardown.
    pub fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            active.consumer.abort();
        }
    }
}
