//! Caller-facing stream interfaces
//!
//! The transport glue (websocket/telephony framing) is outside the core; it
//! hands the pipeline these two halves of the call's audio stream at session
//! open. The sink is owned exclusively by the outbound streamer; no other
//! component writes to it.

use crate::audio::AudioChunk;
use crate::error::Result;
use async_trait::async_trait;

/// Inbound audio from the caller, in the stream's native PCM format.
#[async_trait]
pub trait CallSource: Send + 'static {
    /// Next inbound chunk. `Ok(None)` means the caller's stream ended
    /// cleanly; errors mean the stream broke.
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>>;
}

/// Outbound audio to the caller.
#[async_trait]
pub trait CallSink: Send + 'static {
    /// Write one chunk. Blocking here applies backpressure upstream; the
    /// pipeline never drops outbound audio to compensate.
    async fn write_chunk(&mut self, chunk: &AudioChunk) -> Result<()>;
}
