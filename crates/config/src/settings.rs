//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// UDP endpoint and registry limits
    #[serde(default)]
    pub server: ServerConfig,

    /// Audio framing and trigger thresholds
    #[serde(default)]
    pub audio: AudioConfig,

    /// Outbound fragmentation and pacing
    #[serde(default)]
    pub transport: TransportConfig,

    /// Dialogue and interruption behavior
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// External collaborator endpoints
    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// UDP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP listen port (inbound and outbound share the socket)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// WebSocket observer port
    #[serde(default = "default_observer_port")]
    pub observer_port: u16,

    /// Soft cap on concurrent logical clients; new IPs are rejected past it
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Inactivity window before a client is reaped (ms)
    #[serde(default = "default_reap_idle_ms")]
    pub reap_idle_ms: u64,

    /// Reaper sweep interval (ms)
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

fn default_listen_port() -> u16 {
    31000
}
fn default_observer_port() -> u16 {
    31001
}
fn default_max_clients() -> usize {
    256
}
fn default_reap_idle_ms() -> u64 {
    120_000
}
fn default_reap_interval_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            observer_port: default_observer_port(),
            max_clients: default_max_clients(),
            reap_idle_ms: default_reap_idle_ms(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

/// Audio framing and trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz. The wire protocol fixes this at 16000.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples per VAD block. The wire protocol fixes this at 512.
    #[serde(default = "default_block_samples")]
    pub block_samples: usize,

    /// Sustained silence that flushes a collecting utterance (ms)
    #[serde(default = "default_silence_ms_for_flush")]
    pub silence_ms_for_flush: u64,

    /// Hard cap on one utterance (ms)
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u64,

    /// Blocks of pre-roll kept ahead of detected speech
    #[serde(default = "default_preroll_blocks")]
    pub preroll_blocks: usize,

    /// Energy threshold for the default VAD (dBFS)
    #[serde(default = "default_vad_threshold_db")]
    pub vad_threshold_db: f32,

    /// Blocks the VAD stays hot after the last loud block
    #[serde(default = "default_vad_hangover_blocks")]
    pub vad_hangover_blocks: usize,
}

fn default_sample_rate() -> u32 {
    16_000
}
fn default_block_samples() -> usize {
    512
}
fn default_silence_ms_for_flush() -> u64 {
    900
}
fn default_max_utterance_ms() -> u64 {
    15_000
}
fn default_preroll_blocks() -> usize {
    8
}
fn default_vad_threshold_db() -> f32 {
    -40.0
}
fn default_vad_hangover_blocks() -> usize {
    4
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_samples: default_block_samples(),
            silence_ms_for_flush: default_silence_ms_for_flush(),
            max_utterance_ms: default_max_utterance_ms(),
            preroll_blocks: default_preroll_blocks(),
            vad_threshold_db: default_vad_threshold_db(),
            vad_hangover_blocks: default_vad_hangover_blocks(),
        }
    }
}

/// Outbound fragmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum datagram size on the wire (bytes)
    #[serde(default = "default_fragment_max_bytes")]
    pub fragment_max_bytes: usize,

    /// Inter-fragment pacing gap (ms)
    #[serde(default = "default_fragment_gap_ms")]
    pub fragment_gap_ms: u64,

    /// Client-side reassembly timeout for incomplete chunks (ms)
    #[serde(default = "default_reassembly_timeout_ms")]
    pub reassembly_timeout_ms: u64,
}

fn default_fragment_max_bytes() -> usize {
    1400
}
fn default_fragment_gap_ms() -> u64 {
    2
}
fn default_reassembly_timeout_ms() -> u64 {
    5_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fragment_max_bytes: default_fragment_max_bytes(),
            fragment_gap_ms: default_fragment_gap_ms(),
            reassembly_timeout_ms: default_reassembly_timeout_ms(),
        }
    }
}

/// Dialogue and interruption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Debounce window after an interruption (ms)
    #[serde(default = "default_interrupt_cooldown_ms")]
    pub interrupt_cooldown_ms: u64,

    /// Dialogue turns retained per client
    #[serde(default = "default_dialogue_history_limit")]
    pub dialogue_history_limit: usize,

    /// Voice passed to the synthesizer
    #[serde(default = "default_tts_voice_id")]
    pub tts_voice_id: String,

    /// Language hint passed to the recognizer
    #[serde(default = "default_language_hint")]
    pub language_hint: String,
}

fn default_interrupt_cooldown_ms() -> u64 {
    500
}
fn default_dialogue_history_limit() -> usize {
    50
}
fn default_tts_voice_id() -> String {
    "en-US-JennyNeural".to_string()
}
fn default_language_hint() -> String {
    "en".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interrupt_cooldown_ms: default_interrupt_cooldown_ms(),
            dialogue_history_limit: default_dialogue_history_limit(),
            tts_voice_id: default_tts_voice_id(),
            language_hint: default_language_hint(),
        }
    }
}

/// External collaborator endpoints and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Speech recognizer base URL
    #[serde(default = "default_asr_endpoint")]
    pub asr_endpoint: String,

    /// Language model base URL (Ollama-compatible chat API)
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,

    /// Language model name
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// System prompt prefixed to every dialogue
    #[serde(default = "default_llm_system_prompt")]
    pub llm_system_prompt: String,

    /// Speech synthesizer base URL
    #[serde(default = "default_tts_endpoint")]
    pub tts_endpoint: String,

    /// Per-request timeout for all collaborators (ms)
    #[serde(default = "default_collaborator_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_asr_endpoint() -> String {
    "http://127.0.0.1:8090".to_string()
}
fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_llm_model() -> String {
    "qwen2.5:7b-instruct-q4_K_M".to_string()
}
fn default_llm_system_prompt() -> String {
    "You are a calm fraud-prevention assistant on a phone line. \
     Keep replies short and conversational."
        .to_string()
}
fn default_tts_endpoint() -> String {
    "http://127.0.0.1:8091".to_string()
}
fn default_collaborator_timeout_ms() -> u64 {
    30_000
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            asr_endpoint: default_asr_endpoint(),
            llm_endpoint: default_llm_endpoint(),
            llm_model: default_llm_model(),
            llm_system_prompt: default_llm_system_prompt(),
            tts_endpoint: default_tts_endpoint(),
            timeout_ms: default_collaborator_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Interval between metrics snapshots in the log (ms, 0 disables)
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_interval_ms() -> u64 {
    60_000
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_interval_ms: default_metrics_interval_ms(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings; bad values are fatal at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.listen_port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.max_clients == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_clients".to_string(),
                message: "Must allow at least 1 client".to_string(),
            });
        }

        // The codec and VAD contracts are defined on 16 kHz / 512-sample
        // blocks; these fields exist so the values are visible in config
        // dumps, not so they can be changed.
        if self.audio.sample_rate != 16_000 {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: format!("Fixed at 16000, got {}", self.audio.sample_rate),
            });
        }

        if self.audio.block_samples != 512 {
            return Err(ConfigError::InvalidValue {
                field: "audio.block_samples".to_string(),
                message: format!("Fixed at 512, got {}", self.audio.block_samples),
            });
        }

        if self.audio.silence_ms_for_flush == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.silence_ms_for_flush".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if self.audio.max_utterance_ms <= self.audio.silence_ms_for_flush {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_utterance_ms".to_string(),
                message: "Must exceed silence_ms_for_flush".to_string(),
            });
        }

        // Below 64 bytes a datagram cannot fit a fragment header plus any
        // payload; above 1400 it risks IP-level fragmentation.
        if self.transport.fragment_max_bytes < 64 || self.transport.fragment_max_bytes > 1400 {
            return Err(ConfigError::InvalidValue {
                field: "transport.fragment_max_bytes".to_string(),
                message: format!(
                    "Must be in 64..=1400, got {}",
                    self.transport.fragment_max_bytes
                ),
            });
        }

        if self.pipeline.dialogue_history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.dialogue_history_limit".to_string(),
                message: "Must retain at least 1 turn".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICE_GATEWAY__ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_GATEWAY")
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
    fn test_default_settings_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.listen_port, 31000);
        assert_eq!(settings.audio.block_samples, 512);
        assert_eq!(settings.pipeline.dialogue_history_limit, 50);
    }

    #[test]
    fn test_sample_rate_is_fixed() {
        let mut settings = Settings::default();
        settings.audio.sample_rate = 48_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_fragment_size_bounds() {
        let mut settings = Settings::default();
        settings.transport.fragment_max_bytes = 65_000;
        assert!(settings.validate().is_err());

        settings.transport.fragment_max_bytes = 32;
        assert!(settings.validate().is_err());

        settings.transport.fragment_max_bytes = 1200;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_utterance_cap_exceeds_silence_window() {
        let mut settings = Settings::default();
        settings.audio.max_utterance_ms = 500;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut settings = Settings::default();
        settings.server.listen_port = 0;
        assert!(settings.validate().is_err());
    }
}
