//! Transcript result types

use serde::{Deserialize, Serialize};

/// One increment of transcription output.
///
/// A transcription provider emits zero or more non-final deltas followed by
/// exactly one final delta per utterance. The final delta carries the full
/// text of the utterance, not just the tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptDelta {
    /// Transcribed text
    pub text: String,
    /// Whether this is the final result for the utterance
    pub is_final: bool,
    /// Provider confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TranscriptDelta {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: 0.0,
        }
    }

    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
        }
    }
}

impl Default for TranscriptDelta {
    fn default() -> Self {
        Self {
            text: String::new(),
            is_final: false,
            confidence: 0.0,
        }
    }
}
