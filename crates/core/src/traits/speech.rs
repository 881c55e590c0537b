//! Speech processing traits

use async_trait::async_trait;

use crate::Result;

/// Speech-to-text interface
///
/// One shared instance serves every client; implementations must be safe
/// to call concurrently.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Transcribe a complete utterance of 16 kHz mono float32 samples.
    ///
    /// An empty string means no speech was recognized; the caller stays
    /// silent rather than surfacing an error to the user.
    async fn transcribe(&self, samples: &[f32], language_hint: &str) -> Result<String>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-speech interface
///
/// Returns complete MP3 bytes for one piece of text. Must be invocable
/// concurrently across clients.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
