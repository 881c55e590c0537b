//! Canned error utterance cache
//!
//! When synthesis hard-fails mid-dialogue the gateway still owes the
//! caller an audible response. The cache synthesizes a short apology once
//! and replays those bytes on every later failure, so a broken TTS
//! backend costs one extra request total.

use std::sync::Arc;

use tokio::sync::Mutex;

use voice_gateway_core::SpeechSynthesizer;

const APOLOGY_TEXT: &str = "Sorry, I had trouble speaking just now. Could you say that again?";

/// Lazily-built cache of the apology MP3
pub struct CannedUtteranceCache {
    bytes: Mutex<Option<Arc<Vec<u8>>>>,
}

impl CannedUtteranceCache {
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(None),
        }
    }

    /// Return the cached apology, synthesizing it on first use.
    ///
    /// `None` means the synthesizer is down entirely; the caller skips
    /// the reply rather than erroring the session.
    pub async fn get_or_synthesize(
        &self,
        synthesizer: &dyn SpeechSynthesizer,
        voice_id: &str,
    ) -> Option<Arc<Vec<u8>>> {
        let mut cached = self.bytes.lock().await;
        if let Some(bytes) = cached.as_ref() {
            return Some(bytes.clone());
        }

        match synthesizer.synthesize(APOLOGY_TEXT, voice_id).await {
            Ok(mp3) => {
                let bytes = Arc::new(mp3);
                *cached = Some(bytes.clone());
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!(error = %e, "canned utterance synthesis failed");
                None
            }
        }
    }
}

impl Default for CannedUtteranceCache {
    fn default() -> Self {
        Self::new()
    }
}
