//! Core traits and types for the call pipeline
//!
//! This crate provides the foundational types used across the workspace:
//! - Frame types passed between pipeline stages
//! - Audio chunk types and PCM16 conversion
//! - Conversation history with controlled mutation
//! - Turn tokens (the cancellation mechanism)
//! - Provider and transport traits
//! - Error taxonomy

pub mod audio;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod traits;
pub mod transcript;
pub mod turn;

pub use audio::{AudioChunk, Channels, SampleRate};
pub use conversation::{ConversationHistory, Message, Role};
pub use error::{Error, Result};
pub use frame::{ControlSignal, Frame};
pub use transcript::TranscriptDelta;
pub use turn::{TurnSequence, TurnToken};

pub use traits::{
    AudioFeed, CallSink, CallSource, ReplyModel, SynthesisStream, Synthesizer, TokenStream,
    Transcriber, TranscriptStream,
};
