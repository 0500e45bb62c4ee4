//! Provider interfaces
//!
//! Every provider call is a potentially long-latency network operation.
//! Providers return owned streams; dropping a stream is the cancellation
//! signal for the in-flight call, and the pipeline additionally discards any
//! late results by turn-token staleness, so providers need no stronger
//! guarantee than best-effort cancellation on drop.

use crate::audio::AudioChunk;
use crate::conversation::Message;
use crate::error::Result;
use crate::transcript::TranscriptDelta;
use futures::Stream;
use std::pin::Pin;

/// Audio handed to a transcription provider, one utterance per feed
pub type AudioFeed = Pin<Box<dyn Stream<Item = AudioChunk> + Send>>;

/// Transcript deltas produced by a transcription provider
pub type TranscriptStream = Pin<Box<dyn Stream<Item = Result<TranscriptDelta>> + Send>>;

/// Text token deltas produced by a reply model
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Audio chunks produced by a synthesis provider
pub type SynthesisStream = Pin<Box<dyn Stream<Item = Result<AudioChunk>> + Send>>;

/// Speech-to-text provider.
///
/// For each utterance the pipeline opens one feed of speech-tagged audio.
/// The provider emits zero or more non-final deltas followed by exactly one
/// final delta once the feed ends.
pub trait Transcriber: Send + Sync + 'static {
    /// Transcribe one utterance's audio feed
    fn transcribe(&self, audio: AudioFeed) -> TranscriptStream;

    /// Provider/model name for logging
    fn model_name(&self) -> &str;
}

/// Language-model provider.
///
/// Takes an immutable snapshot of the conversation history and streams back
/// generated text token deltas.
pub trait ReplyModel: Send + Sync + 'static {
    /// Generate a reply for the given history snapshot
    fn generate(&self, history: Vec<Message>) -> TokenStream;

    /// Provider/model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-speech provider.
///
/// Synthesis is requested per text segment (the pipeline batches reply
/// deltas to sentence boundaries); each call streams back audio chunks.
pub trait Synthesizer: Send + Sync + 'static {
    /// Synthesize one text segment to audio
    fn synthesize(&self, text: &str) -> SynthesisStream;

    /// Provider/model name for logging
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    // Mock implementation for testing
    struct MockTranscriber;

    impl Transcriber for MockTranscriber {
        fn transcribe(&self, audio: AudioFeed) -> TranscriptStream {
            Box::pin(audio.map(|_| Ok(TranscriptDelta::partial("..."))))
        }

        fn model_name(&self) -> &str {
            "mock-transcriber"
        }
    }

    #[tokio::test]
    async fn test_mock_transcriber_streams() {
        use crate::audio::{Channels, SampleRate};

        let transcriber = MockTranscriber;
        let feed: AudioFeed = Box::pin(futures::stream::iter(vec![AudioChunk::new(
            vec![0.0; 160],
            SampleRate::Hz8000,
            Channels::Mono,
            0,
        )]));
        let deltas: Vec<_> = transcriber.transcribe(feed).collect().await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(transcriber.model_name(), "mock-transcriber");
    }
}
