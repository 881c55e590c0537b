//! Collaborator traits
//!
//! The gateway treats the speech recognizer, language model, and speech
//! synthesizer as opaque transformers behind these traits; implementations
//! are injected at startup, never discovered. VAD is also pluggable but
//! stateful, so it is built per client through a factory.

mod llm;
mod speech;
mod vad;

pub use llm::LanguageModel;
pub use speech::{SpeechRecognizer, SpeechSynthesizer};
pub use vad::{VadFactory, VoiceDetector};
