//! Typed frames passed between pipeline stages

use crate::audio::AudioChunk;
use crate::transcript::TranscriptDelta;
use crate::turn::TurnToken;

/// The unit of data passed between pipeline stages.
///
/// Frames are immutable once created. Ordering within a single stage's
/// output is the only ordering guarantee; cross-stage ordering is managed by
/// the bus that carries them.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Raw or speech-tagged audio
    Audio(AudioChunk),
    /// Incremental or final transcription output
    Transcript(TranscriptDelta),
    /// First sustained speech detected in an utterance
    UtteranceStart,
    /// Sustained trailing silence after an utterance
    UtteranceEnd,
    /// One increment of generated reply text, stamped with its turn
    ReplyText { token: TurnToken, text: String },
    /// Out-of-band control
    Control(ControlSignal),
}

/// Control signals carried alongside data frames
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// The reply stream for the current turn completed; synthesis should
    /// flush any buffered tail.
    EndOfReply,
    /// A provider failed while handling the identified turn; the utterance or
    /// reply was dropped without committing partial state.
    TurnFailed { turn: u64, reason: String },
    /// The session is closing; stages should drain and exit.
    Shutdown,
}

impl Frame {
    /// The audio payload if this is an audio frame
    pub fn as_audio(&self) -> Option<&AudioChunk> {
        match self {
            Frame::Audio(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Control(_))
    }
}
