//! Core traits and types for the voice gateway
//!
//! This crate provides foundational types used across all other crates:
//! - Collaborator traits for pluggable backends (VAD, ASR, LLM, TTS)
//! - Audio block helpers
//! - Dialogue history types
//! - Session identifiers
//! - Error types

pub mod audio;
pub mod dialogue;
pub mod error;
pub mod session;
pub mod traits;

pub use audio::{energy_db, BLOCK_SAMPLES, SAMPLE_RATE};
pub use dialogue::{DialogueHistory, Turn, TurnRole};
pub use error::{Error, Result};
pub use session::SessionId;
pub use traits::{
    LanguageModel, SpeechRecognizer, SpeechSynthesizer, VadFactory, VoiceDetector,
};
