//! Audio pipeline building blocks
//!
//! This crate provides the stages between raw decoded audio and the
//! outbound synthesized reply:
//! - Energy-based voice activity detection
//! - The utterance trigger buffer (speech framing + flush conditions)
//! - Sentence splitting of streaming LLM output for early TTS dispatch
//! - HTTP-backed reference adapters for ASR, LLM, and TTS
//! - The canned error utterance cache

pub mod backends;
pub mod canned;
pub mod sentence;
pub mod trigger;
pub mod vad;

pub use backends::{HttpRecognizer, HttpSynthesizer, StreamingChatModel};
pub use canned::CannedUtteranceCache;
pub use sentence::{SentenceSplitter, SentenceSplitterConfig};
pub use trigger::{TriggerBuffer, TriggerConfig, TriggerState};
pub use vad::{EnergyVad, EnergyVadConfig, EnergyVadFactory};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("ASR error: {0}")]
    Asr(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for voice_gateway_core::Error {
    fn from(err: PipelineError) -> Self {
        use voice_gateway_core::Error;
        match err {
            PipelineError::Asr(msg) => Error::Asr(msg),
            PipelineError::Llm(msg) => Error::Llm(msg),
            PipelineError::Tts(msg) => Error::Tts(msg),
            PipelineError::Http(msg) => Error::Io(msg),
            PipelineError::ChannelClosed => Error::ChannelClosed,
        }
    }
}
