//! Configuration for the talkdub pipeline.
//!
//! Configuration is environment-first: every knob has a default and an
//! environment key that overrides it. [`Config::from_env`] collects every
//! problem it finds instead of stopping at the first one, so an operator
//! fixes a misconfigured deployment in one pass.
//!
//! Credentials are looked up by environment-variable *name* kept in the
//! config; values are read once at startup by the components that need
//! them and never logged.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment key for the LLM API credential.
pub const LLM_API_KEY_ENV: &str = "TALKDUB_LLM_API_KEY";
/// Environment key for the speech-model credential (diarization).
pub const SPEECH_MODEL_TOKEN_ENV: &str = "TALKDUB_HF_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("configuration validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

/// Paths and broker endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the on-disk data layout.
    pub data_root: Utf8PathBuf,
    /// Queue broker / keyed-store URL.
    pub broker_url: String,
    /// Public base URL used in user-facing links.
    pub public_url: String,
}

/// LLM provider knobs for the translation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint (OpenAI-compatible).
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Model identifier.
    pub model: String,
    /// Requests-per-minute ceiling granted by the provider.
    pub rpm_limit: u32,
    /// Fraction of the ceiling the limiter actually spends (headroom for
    /// the limiter's documented race window).
    pub rpm_buffer_factor: f64,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Translation pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Joint chunking ceilings.
    pub chunk_char_limit: usize,
    pub chunk_seg_limit: usize,
    /// Per-chunk retry budget.
    pub max_retries: u32,
    /// Base of the exponential backoff between chunk retries.
    pub backoff_base: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Length-ratio band for quality validation.
    pub min_length_ratio: f64,
    pub max_length_ratio: f64,
}

/// Phase runner knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts.
    pub retry_delay_base: Duration,
    /// Overall wall-clock budget for a whole job.
    pub job_time_limit: Duration,
}

/// Retention windows for artifacts and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub pin: Duration,
    pub delivery: Duration,
    pub failed_job: Duration,
    pub temp: Duration,
}

/// Delivery gate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub max_downloads: u32,
    pub max_pin_attempts: u32,
}

/// Program names of the external audio engines.
///
/// Each engine is a separate executable driven through the subprocess
/// runner; the contract per tool is documented at its call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub separator: String,
    pub recognizer: String,
    pub vad: String,
    pub synthesizer: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            separator: "demucs".to_string(),
            recognizer: "whisperx".to_string(),
            vad: "silero-vad".to_string(),
            synthesizer: "qwen-tts".to_string(),
        }
    }
}

/// Fixed pipeline tunables copied into every new job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefaults {
    pub max_atempo: f64,
    pub max_overlap_sec: f64,
    pub max_overlap_ratio: f64,
    pub overlap_duck_db: f64,
}

/// Complete talkdub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub translation: TranslationConfig,
    pub phase: PhaseConfig,
    pub retention: RetentionConfig,
    pub delivery: DeliveryConfig,
    pub engines: EngineConfig,
    pub pipeline: PipelineDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_root: Utf8PathBuf::from("data"),
                broker_url: "redis://localhost:6379/0".to_string(),
                public_url: "http://localhost:8000".to_string(),
            },
            llm: LlmConfig {
                base_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                api_key_env: LLM_API_KEY_ENV.to_string(),
                model: "llama-3.3-70b-versatile".to_string(),
                rpm_limit: 30,
                rpm_buffer_factor: 0.9,
                temperature: 0.3,
                max_tokens: 8000,
            },
            translation: TranslationConfig {
                chunk_char_limit: 2000,
                chunk_seg_limit: 30,
                max_retries: 3,
                backoff_base: Duration::from_secs(2),
                cache_enabled: true,
                cache_ttl: Duration::from_secs(72 * 3600),
                min_length_ratio: 0.1,
                max_length_ratio: 5.0,
            },
            phase: PhaseConfig {
                max_retries: 3,
                retry_delay_base: Duration::from_secs(5),
                job_time_limit: Duration::from_secs(24 * 3600),
            },
            retention: RetentionConfig {
                pin: Duration::from_secs(72 * 3600),
                delivery: Duration::from_secs(72 * 3600),
                failed_job: Duration::from_secs(7 * 24 * 3600),
                temp: Duration::from_secs(48 * 3600),
            },
            delivery: DeliveryConfig {
                max_downloads: 5,
                max_pin_attempts: 5,
            },
            engines: EngineConfig::default(),
            pipeline: PipelineDefaults {
                max_atempo: 1.3,
                max_overlap_sec: 2.0,
                max_overlap_ratio: 0.25,
                overlap_duck_db: -6.0,
            },
        }
    }
}

impl Config {
    /// Load configuration from the environment on top of the defaults,
    /// collecting every problem rather than stopping at the first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut errors = Vec::new();

        if let Ok(v) = std::env::var("TALKDUB_DATA_DIR") {
            config.storage.data_root = Utf8PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TALKDUB_BROKER_URL") {
            config.storage.broker_url = v;
        }
        if let Ok(v) = std::env::var("TALKDUB_PUBLIC_URL") {
            config.storage.public_url = v;
        }
        if let Ok(v) = std::env::var("TALKDUB_LLM_BASE_URL") {
            config.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("TALKDUB_LLM_MODEL") {
            config.llm.model = v;
        }

        parse_env("TALKDUB_LLM_RPM_LIMIT", &mut config.llm.rpm_limit, &mut errors);
        parse_env(
            "TALKDUB_LLM_RPM_BUFFER",
            &mut config.llm.rpm_buffer_factor,
            &mut errors,
        );
        parse_env(
            "TALKDUB_TRANSLATION_TEMPERATURE",
            &mut config.llm.temperature,
            &mut errors,
        );
        parse_env(
            "TALKDUB_CHUNK_CHAR_LIMIT",
            &mut config.translation.chunk_char_limit,
            &mut errors,
        );
        parse_env(
            "TALKDUB_CHUNK_SEG_LIMIT",
            &mut config.translation.chunk_seg_limit,
            &mut errors,
        );
        parse_env(
            "TALKDUB_TRANSLATION_MAX_RETRIES",
            &mut config.translation.max_retries,
            &mut errors,
        );
        parse_env(
            "TALKDUB_PHASE_MAX_RETRIES",
            &mut config.phase.max_retries,
            &mut errors,
        );
        parse_env_secs(
            "TALKDUB_PHASE_BACKOFF_BASE_SEC",
            &mut config.phase.retry_delay_base,
            &mut errors,
        );
        parse_env_hours("TALKDUB_PIN_RETENTION_HOURS", &mut config.retention.pin, &mut errors);
        parse_env_hours(
            "TALKDUB_DELIVERY_RETENTION_HOURS",
            &mut config.retention.delivery,
            &mut errors,
        );
        parse_env_hours(
            "TALKDUB_TEMP_RETENTION_HOURS",
            &mut config.retention.temp,
            &mut errors,
        );
        parse_env(
            "TALKDUB_MAX_DOWNLOADS",
            &mut config.delivery.max_downloads,
            &mut errors,
        );
        parse_env(
            "TALKDUB_MAX_PIN_ATTEMPTS",
            &mut config.delivery.max_pin_attempts,
            &mut errors,
        );

        config.collect_validation_errors(&mut errors);

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    fn collect_validation_errors(&self, errors: &mut Vec<String>) {
        if !(0.0..=1.0).contains(&self.llm.rpm_buffer_factor) {
            errors.push(format!(
                "rpm_buffer_factor must be within [0, 1], got {}",
                self.llm.rpm_buffer_factor
            ));
        }
        if self.llm.rpm_limit == 0 {
            errors.push("rpm_limit must be positive".to_string());
        }
        if self.translation.chunk_char_limit == 0 {
            errors.push("chunk_char_limit must be positive".to_string());
        }
        if self.translation.chunk_seg_limit == 0 {
            errors.push("chunk_seg_limit must be positive".to_string());
        }
        if self.phase.max_retries == 0 {
            errors.push("phase max_retries must be at least 1".to_string());
        }
        if self.delivery.max_downloads == 0 {
            errors.push("max_downloads must be at least 1".to_string());
        }
    }

    /// A configuration suitable for tests: defaults, no environment reads.
    #[must_use]
    pub fn minimal_for_testing() -> Self {
        Self::default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, slot: &mut T, errors: &mut Vec<String>) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => errors.push(format!("{key} has unparsable value '{raw}'")),
        }
    }
}

fn parse_env_secs(key: &str, slot: &mut Duration, errors: &mut Vec<String>) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<u64>() {
            Ok(v) => *slot = Duration::from_secs(v),
            Err(_) => errors.push(format!("{key} has unparsable value '{raw}'")),
        }
    }
}

fn parse_env_hours(key: &str, slot: &mut Duration, errors: &mut Vec<String>) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<u64>() {
            Ok(v) => *slot = Duration::from_secs(v * 3600),
            Err(_) => errors.push(format!("{key} has unparsable value '{raw}'")),
        }
    }
}
