//! Centralized constants for the call pipeline
//!
//! Single source of truth for timing, sizing and persona defaults used
//! across the crates. Settings fall back to these when a field is not
//! provided by file or environment.

/// Audio framing defaults (narrowband telephony)
pub mod audio {
    /// Duration of one inbound audio frame
    pub const FRAME_MS: u64 = 20;

    /// Default sample rate for telephony calls (Hz)
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 8_000;

    /// Samples per 20ms frame at the default rate
    pub const SAMPLES_PER_FRAME: usize =
        (DEFAULT_SAMPLE_RATE_HZ as u64 * FRAME_MS / 1000) as usize;
}

/// Voice activity detection tuning
pub mod vad {
    /// Energy (dBFS) below which a frame is treated as silence
    pub const ENERGY_FLOOR_DB: f32 = -50.0;

    /// Speech must persist this long before an utterance is confirmed
    pub const MIN_SPEECH_MS: u64 = 100;

    /// Trailing silence required before an utterance is considered ended
    pub const HOLD_OFF_MS: u64 = 400;

    /// Frames of leading audio kept so confirmed utterances include
    /// the onset that triggered detection
    pub const ONSET_BUFFER_FRAMES: usize = 10;
}

/// Per-stage provider timeouts
pub mod timeouts {
    /// Max wait for the next transcript delta from the transcriber
    pub const TRANSCRIBE_MS: u64 = 10_000;

    /// Max wait for the next token from the reply model
    pub const REPLY_MS: u64 = 30_000;

    /// Max wait for the next synthesized chunk
    pub const SYNTH_MS: u64 = 15_000;

    /// Deadline for stage tasks to drain and exit during teardown
    pub const TEARDOWN_MS: u64 = 5_000;
}

/// Session-level sizing and policy
pub mod session {
    /// Consecutive failed turns before the session is closed
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

    /// Capacity of the bounded inter-stage frame channels
    pub const BUS_CAPACITY: usize = 64;

    /// Capacity of the outbound audio queue
    pub const OUTBOUND_QUEUE: usize = 32;

    /// Capacity of the pipeline event broadcast channel
    pub const EVENT_CAPACITY: usize = 256;
}

/// Default persona prompts and greetings by call direction
pub mod persona {
    pub const OUTBOUND_SYSTEM_PROMPT: &str =
        "You are an AI assistant making an outbound call.";

    pub const INBOUND_SYSTEM_PROMPT: &str =
        "You are an AI assistant handling an inbound call.";

    pub const OUTBOUND_GREETING: &str =
        "Hello, this is an AI assistant calling. How may I assist you today?";

    pub const INBOUND_GREETING: &str =
        "Hello, thank you for calling. How may I assist you today?";

    /// Spoken instead of silence when a turn fails, if enabled
    pub const FAILURE_FALLBACK: &str =
        "I'm sorry, I'm having trouble right now. Could you say that again?";
}
