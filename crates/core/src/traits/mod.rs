//! Core traits for the call pipeline
//!
//! All external collaborators are behind these traits to enable:
//! - Pluggable providers (swap vendors without touching the pipeline)
//! - Testing with scripted mocks
//!
//! # Trait Hierarchy
//!
//! ```text
//! Providers:
//!   - Transcriber: speech audio -> transcript deltas
//!   - ReplyModel: conversation history -> reply text deltas
//!   - Synthesizer: reply text -> audio chunks
//!
//! Transport:
//!   - CallSource: inbound byte-chunk stream from the caller
//!   - CallSink: outbound byte-chunk stream to the caller
//! ```

mod provider;
mod transport;

pub use provider::{
    AudioFeed, ReplyModel, SynthesisStream, Synthesizer, TokenStream, Transcriber,
    TranscriptStream,
};
pub use transport::{CallSink, CallSource};
