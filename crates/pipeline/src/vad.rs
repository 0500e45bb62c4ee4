//! Energy-based voice activity detection
//!
//! A state machine over per-chunk energy. Speech must persist for a
//! confirmation window before an utterance starts, and trailing silence
//! must persist for a hold-off window before it ends, so short noise
//! bursts and natural pauses do not toggle utterances.
//!
//! A small onset buffer of recent chunks is kept during silence so a
//! confirmed utterance includes the audio that triggered detection.

use callpipe_config::VadSettings;
use callpipe_core::{AudioChunk, Frame};
use std::collections::VecDeque;
use tracing::trace;

use crate::PipelineError;

const ONSET_BUFFER_FRAMES: usize = callpipe_config::constants::vad::ONSET_BUFFER_FRAMES;

/// Detection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GateState {
    /// No speech detected
    #[default]
    Silence,
    /// Potential speech start (accumulating confirmation)
    SpeechStart,
    /// Active speech confirmed
    Speech,
    /// Potential speech end (accumulating hold-off silence)
    SpeechEnd,
}

/// Gates raw inbound audio into utterance-tagged speech.
pub struct VoiceActivityGate {
    settings: VadSettings,
    state: GateState,
    /// Recent chunks kept while silent, replayed on confirmation
    onset: VecDeque<AudioChunk>,
    /// Chunks accumulated while confirming a potential start
    pending: Vec<AudioChunk>,
    speech_ms: u64,
    silence_ms: u64,
}

impl VoiceActivityGate {
    pub fn new(settings: VadSettings) -> Result<Self, PipelineError> {
        if settings.energy_floor_db >= 0.0 {
            return Err(PipelineError::Vad(format!(
                "energy floor must be negative dBFS, got {}",
                settings.energy_floor_db
            )));
        }
        Ok(Self {
            settings,
            state: GateState::Silence,
            onset: VecDeque::with_capacity(ONSET_BUFFER_FRAMES),
            pending: Vec::new(),
            speech_ms: 0,
            silence_ms: 0,
        })
    }

    /// Map chunk energy to a speech probability, then threshold it.
    fn is_speech(&self, chunk: &AudioChunk) -> bool {
        let energy_threshold = self.settings.energy_floor_db + 10.0;
        let prob = if chunk.energy_db > energy_threshold {
            ((chunk.energy_db - energy_threshold) / 30.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        prob >= 0.5
    }

    /// Process one inbound chunk, returning zero or more frames:
    /// `UtteranceStart`, speech-tagged `Audio`, and `UtteranceEnd`.
    pub fn process(&mut self, chunk: AudioChunk) -> Vec<Frame> {
        let is_speech = self.is_speech(&chunk);
        let chunk_ms = chunk.duration_ms().max(1);

        trace!(
            state = ?self.state,
            energy_db = chunk.energy_db,
            is_speech,
            "vad frame"
        );

        match (self.state, is_speech) {
            (GateState::Silence, false) => {
                self.buffer_onset(chunk);
                vec![]
            }
            (GateState::Silence, true) => {
                self.state = GateState::SpeechStart;
                self.speech_ms = chunk_ms;
                self.pending = self.onset.drain(..).collect();
                self.pending.push(chunk);
                self.maybe_confirm()
            }
            (GateState::SpeechStart, true) => {
                self.speech_ms += chunk_ms;
                self.pending.push(chunk);
                self.maybe_confirm()
            }
            (GateState::SpeechStart, false) => {
                // Burst too short; fold the pending audio back into onset
                self.state = GateState::Silence;
                self.speech_ms = 0;
                for buffered in self.pending.drain(..) {
                    Self::push_bounded(&mut self.onset, buffered);
                }
                self.buffer_onset(chunk);
                vec![]
            }
            (GateState::Speech, true) => vec![Frame::Audio(chunk)],
            (GateState::Speech, false) => {
                self.state = GateState::SpeechEnd;
                self.silence_ms = chunk_ms;
                // Forward the tail so transcription sees the trailing context
                self.end_if_held(chunk)
            }
            (GateState::SpeechEnd, true) => {
                self.state = GateState::Speech;
                self.silence_ms = 0;
                vec![Frame::Audio(chunk)]
            }
            (GateState::SpeechEnd, false) => {
                self.silence_ms += chunk_ms;
                self.end_if_held(chunk)
            }
        }
    }

    /// Whether the gate is mid-utterance (confirmed speech or hold-off).
    pub fn in_utterance(&self) -> bool {
        matches!(self.state, GateState::Speech | GateState::SpeechEnd)
    }

    fn maybe_confirm(&mut self) -> Vec<Frame> {
        if self.speech_ms < self.settings.min_speech_ms {
            return vec![];
        }
        self.state = GateState::Speech;
        let mut frames = Vec::with_capacity(self.pending.len() + 1);
        frames.push(Frame::UtteranceStart);
        frames.extend(self.pending.drain(..).map(Frame::Audio));
        frames
    }

    fn end_if_held(&mut self, chunk: AudioChunk) -> Vec<Frame> {
        let mut frames = vec![Frame::Audio(chunk)];
        if self.silence_ms >= self.settings.hold_off_ms {
            self.state = GateState::Silence;
            self.speech_ms = 0;
            self.silence_ms = 0;
            frames.push(Frame::UtteranceEnd);
        }
        frames
    }

    fn buffer_onset(&mut self, chunk: AudioChunk) {
        Self::push_bounded(&mut self.onset, chunk);
    }

    fn push_bounded(buf: &mut VecDeque<AudioChunk>, chunk: AudioChunk) {
        if buf.len() == ONSET_BUFFER_FRAMES {
            buf.pop_front();
        }
        buf.push_back(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpipe_core::{Channels, SampleRate};

    fn loud_chunk(seq: u64) -> AudioChunk {
        // ~ -6 dBFS, 20ms at 8kHz
        AudioChunk::new(vec![0.5; 160], SampleRate::Hz8000, Channels::Mono, seq)
    }

    fn quiet_chunk(seq: u64) -> AudioChunk {
        AudioChunk::new(vec![0.0; 160], SampleRate::Hz8000, Channels::Mono, seq)
    }

    fn gate() -> VoiceActivityGate {
        VoiceActivityGate::new(VadSettings {
            energy_floor_db: -50.0,
            min_speech_ms: 100,
            hold_off_ms: 400,
        })
        .unwrap()
    }

    #[test]
    fn test_short_burst_does_not_start_utterance() {
        let mut gate = gate();
        // Two loud frames (40ms) is below the 100ms confirmation window
        assert!(gate.process(loud_chunk(0)).is_empty());
        assert!(gate.process(loud_chunk(1)).is_empty());
        assert!(gate.process(quiet_chunk(2)).is_empty());
        assert!(!gate.in_utterance());
    }

    #[test]
    fn test_sustained_speech_confirms_with_onset() {
        let mut gate = gate();
        gate.process(quiet_chunk(0));
        for seq in 1..5 {
            assert!(gate.process(loud_chunk(seq)).is_empty());
        }

        // Fifth loud frame reaches 100ms; confirmation fires here
        let events = gate.process(loud_chunk(5));
        assert!(matches!(events[0], Frame::UtteranceStart));
        // Onset silence plus all five pending loud frames are replayed
        let speech = events
            .iter()
            .filter(|e| matches!(e, Frame::Audio(_)))
            .count();
        assert_eq!(speech, 6);
        assert!(gate.in_utterance());
    }

    #[test]
    fn test_pause_shorter_than_hold_off_continues_utterance() {
        let mut gate = gate();
        for seq in 0..6 {
            gate.process(loud_chunk(seq));
        }
        assert!(gate.in_utterance());

        // 200ms of silence, below the 400ms hold-off
        for seq in 6..16 {
            let events = gate.process(quiet_chunk(seq));
            assert!(!events
                .iter()
                .any(|e| matches!(e, Frame::UtteranceEnd)));
        }
        assert!(gate.in_utterance());

        // Speech resumes inside the same utterance
        let events = gate.process(loud_chunk(16));
        assert!(matches!(events[0], Frame::Audio(_)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, Frame::UtteranceStart)));
    }

    #[test]
    fn test_hold_off_ends_utterance() {
        let mut gate = gate();
        for seq in 0..6 {
            gate.process(loud_chunk(seq));
        }

        let mut ended = false;
        for seq in 6..30 {
            let events = gate.process(quiet_chunk(seq));
            if events
                .iter()
                .any(|e| matches!(e, Frame::UtteranceEnd))
            {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert!(!gate.in_utterance());

        // Next sustained speech starts a fresh utterance
        let mut started = false;
        for seq in 30..40 {
            let events = gate.process(loud_chunk(seq));
            if events
                .iter()
                .any(|e| matches!(e, Frame::UtteranceStart))
            {
                started = true;
                break;
            }
        }
        assert!(started);
    }
}
