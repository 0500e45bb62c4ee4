//! Outbound audio streaming
//!
//! A single writer task owns the call sink. Synthesized audio arrives on a
//! bounded bus stamped with its turn token; frames from turns aborted by
//! barge-in are dropped at dequeue, which is the last defense against a
//! slow synthesis stream sneaking stale audio past cancellation.

use callpipe_core::{AudioChunk, Error, Result, TurnToken};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::{BusReceiver, BusSender};
use crate::events::{EventBus, PipelineEvent};

/// One synthesized chunk headed for the caller, stamped with its turn.
pub struct OutboundFrame {
    pub token: TurnToken,
    pub chunk: AudioChunk,
}

/// Enqueue side of the outbound queue, held by the synthesis stage.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: BusSender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

impl OutboundHandle {
    /// Enqueue one frame, waiting for queue capacity. Fails with
    /// `StreamClosed` once the session is tearing down.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.push(frame).await.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::StreamClosed);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.tx.close();
    }
}

/// Writer over the caller's sink.
pub struct OutboundStreamer {
    rx: BusReceiver<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    min_live_turn: Arc<AtomicU64>,
    events: EventBus,
}

impl OutboundStreamer {
    pub fn new(
        capacity: usize,
        pending: Arc<AtomicUsize>,
        min_live_turn: Arc<AtomicU64>,
        events: EventBus,
    ) -> (OutboundHandle, Self) {
        let (tx, rx) = crate::bus::bounded(capacity);
        (
            OutboundHandle {
                tx,
                pending: pending.clone(),
            },
            Self {
                rx,
                pending,
                min_live_turn,
                events,
            },
        )
    }

    /// Drain the queue into the sink until the queue closes or the sink
    /// breaks. Runs as the session's writer task.
    pub async fn run(mut self, mut sink: Box<dyn callpipe_core::CallSink>) -> Result<()> {
        let mut written: u64 = 0;
        let mut dropped: u64 = 0;

        while let Some(frame) = self.rx.pull().await {
            self.pending.fetch_sub(1, Ordering::AcqRel);

            if frame.token.turn() < self.min_live_turn.load(Ordering::Acquire) {
                dropped += 1;
                continue;
            }

            if let Err(err) = sink.write_chunk(&frame.chunk).await {
                warn!(error = %err, "outbound sink write failed");
                return Err(err);
            }
            written += 1;
            self.events.emit(PipelineEvent::AudioOut {
                turn: frame.token.turn(),
            });
        }

        debug!(written, dropped, "outbound streamer finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpipe_core::{CallSink, Channels, SampleRate, TurnSequence};
    use parking_lot::Mutex;

    struct RecordingSink {
        chunks: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait::async_trait]
    impl CallSink for RecordingSink {
        async fn write_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
            self.chunks.lock().push(chunk.sequence);
            Ok(())
        }
    }

    fn chunk(seq: u64) -> AudioChunk {
        AudioChunk::new(vec![0.1; 160], SampleRate::Hz8000, Channels::Mono, seq)
    }

    #[tokio::test]
    async fn test_stale_frames_dropped_at_dequeue() {
        let seq = TurnSequence::new();
        let old = seq.mint();
        seq.advance();
        let live = seq.mint();

        let pending = Arc::new(AtomicUsize::new(0));
        let min_live = Arc::new(AtomicU64::new(1));
        let (handle, streamer) =
            OutboundStreamer::new(8, pending.clone(), min_live, EventBus::new(16));

        handle
            .send(OutboundFrame {
                token: old,
                chunk: chunk(100),
            })
            .await
            .unwrap();
        handle
            .send(OutboundFrame {
                token: live,
                chunk: chunk(200),
            })
            .await
            .unwrap();
        handle.close();

        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(RecordingSink {
            chunks: written.clone(),
        });
        streamer.run(sink).await.unwrap();

        // Only the live turn's chunk reached the caller
        assert_eq!(*written.lock(), vec![200]);
        assert_eq!(pending.load(Ordering::Acquire), 0);
    }
}
