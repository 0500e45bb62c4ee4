//! Real-time call pipeline
//!
//! Wires a caller's full-duplex audio stream through voice activity
//! detection, streaming transcription, reply generation and speech
//! synthesis, back out to the caller. Stages run as concurrent tasks
//! connected by bounded channels; a shared turn sequence provides
//! cooperative cancellation so barge-in can invalidate everything
//! in flight for the interrupted turn.
//!
//! Entry point is [`session::Session`], which owns the stage tasks for
//! one call and drives its lifecycle from connect to teardown.

pub mod bus;
pub mod events;
pub mod interrupt;
pub mod outbound;
pub mod reply;
pub mod session;
pub mod synth;
pub mod transcription;
pub mod vad;

pub use bus::{bounded, BusReceiver, BusSender};
pub use events::{EventBus, PipelineEvent};
pub use interrupt::InterruptionController;
pub use outbound::{OutboundFrame, OutboundHandle, OutboundStreamer};
pub use session::{
    CallDirection, LifecycleState, Providers, Session, SessionMetadata,
};
pub use vad::VoiceActivityGate;

use thiserror::Error;

/// Errors raised while assembling a pipeline. Provider and turn-level
/// failures flow through [`callpipe_core::Error`] instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("VAD error: {0}")]
    Vad(String),
}
