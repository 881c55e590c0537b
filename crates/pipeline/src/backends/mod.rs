//! HTTP-backed reference collaborators
//!
//! The gateway treats ASR, LLM, and TTS as sidecar services. These
//! adapters implement the core traits against plain HTTP endpoints so a
//! deployment can point at whatever serves the models.

mod asr;
mod llm;
mod tts;

pub use asr::HttpRecognizer;
pub use llm::StreamingChatModel;
pub use tts::HttpSynthesizer;
