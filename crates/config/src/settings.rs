//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{session, timeouts, vad};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Stage timeouts and channel sizing
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Voice activity detection tuning
    #[serde(default)]
    pub vad: VadSettings,

    /// Session-level policy
    #[serde(default)]
    pub session: SessionSettings,
}

/// Per-stage timeouts and channel capacities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Max wait (ms) for the next transcript delta
    #[serde(default = "default_transcribe_timeout_ms")]
    pub transcribe_timeout_ms: u64,

    /// Max wait (ms) for the next reply token
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Max wait (ms) for the next synthesized audio chunk
    #[serde(default = "default_synth_timeout_ms")]
    pub synth_timeout_ms: u64,

    /// Capacity of the bounded inter-stage channels
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Capacity of the outbound audio queue
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_transcribe_timeout_ms() -> u64 {
    timeouts::TRANSCRIBE_MS
}

fn default_reply_timeout_ms() -> u64 {
    timeouts::REPLY_MS
}

fn default_synth_timeout_ms() -> u64 {
    timeouts::SYNTH_MS
}

fn default_bus_capacity() -> usize {
    session::BUS_CAPACITY
}

fn default_outbound_queue() -> usize {
    session::OUTBOUND_QUEUE
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            transcribe_timeout_ms: default_transcribe_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            synth_timeout_ms: default_synth_timeout_ms(),
            bus_capacity: default_bus_capacity(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Voice activity detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Energy floor (dBFS); frames below this are silence
    #[serde(default = "default_energy_floor_db")]
    pub energy_floor_db: f32,

    /// Speech must persist this long (ms) to confirm an utterance
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,

    /// Trailing silence (ms) that ends an utterance
    #[serde(default = "default_hold_off_ms")]
    pub hold_off_ms: u64,
}

fn default_energy_floor_db() -> f32 {
    vad::ENERGY_FLOOR_DB
}

fn default_min_speech_ms() -> u64 {
    vad::MIN_SPEECH_MS
}

fn default_hold_off_ms() -> u64 {
    vad::HOLD_OFF_MS
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_floor_db: default_energy_floor_db(),
            min_speech_ms: default_min_speech_ms(),
            hold_off_ms: default_hold_off_ms(),
        }
    }
}

/// Session-level policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Consecutive failed turns before the session is closed
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Deadline (ms) for stage tasks to exit during teardown
    #[serde(default = "default_teardown_deadline_ms")]
    pub teardown_deadline_ms: u64,

    /// Speak a short apology instead of silence when a turn fails
    #[serde(default)]
    pub speak_fallback_on_failure: bool,
}

fn default_max_consecutive_failures() -> u32 {
    session::MAX_CONSECUTIVE_FAILURES
}

fn default_teardown_deadline_ms() -> u64 {
    timeouts::TEARDOWN_MS
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            teardown_deadline_ms: default_teardown_deadline_ms(),
            speak_fallback_on_failure: false,
        }
    }
}

impl Settings {
    /// Validate cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.bus_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.outbound_queue == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.outbound_queue".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.session.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_consecutive_failures".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.vad.hold_off_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.hold_off_ms".to_string(),
                message: "must be nonzero or every frame gap ends the utterance".to_string(),
            });
        }
        if self.vad.energy_floor_db >= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.energy_floor_db".to_string(),
                message: "must be negative dBFS".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from optional files and the environment
///
/// Order of precedence (later wins): `config/default`, `config/{env}`,
/// then `CALLPIPE__` environment variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("CALLPIPE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.pipeline.transcribe_timeout_ms, 10_000);
        assert_eq!(settings.session.max_consecutive_failures, 3);
        assert_eq!(settings.vad.hold_off_ms, 400);
        assert!(!settings.session.speak_fallback_on_failure);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.pipeline.bus_capacity = 0;
        assert!(settings.validate().is_err());

        settings.pipeline.bus_capacity = 64;
        assert!(settings.validate().is_ok());

        settings.vad.energy_floor_db = 3.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            "[pipeline]\nreply_timeout_ms = 5000\n\n[session]\nmax_consecutive_failures = 5\n",
        )
        .unwrap();

        let config = Config::builder()
            .add_source(File::from(path))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        assert_eq!(settings.pipeline.reply_timeout_ms, 5_000);
        assert_eq!(settings.session.max_consecutive_failures, 5);
        // Untouched fields keep their defaults
        assert_eq!(settings.pipeline.synth_timeout_ms, 15_000);
        assert!(settings.validate().is_ok());
    }
}
