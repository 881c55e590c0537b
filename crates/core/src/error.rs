//! Error types shared by collaborator contracts

use thiserror::Error;

/// Errors surfaced by external collaborators and the pipeline
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("ASR error: {0}")]
    Asr(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
