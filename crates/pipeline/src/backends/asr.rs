//! HTTP speech recognizer adapter
//!
//! Posts raw PCM16 to a transcription sidecar and reads back JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use voice_gateway_config::CollaboratorConfig;
use voice_gateway_core::{Error, Result, SpeechRecognizer};

use crate::PipelineError;

/// Response from the transcription service
#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    error: Option<String>,
}

/// Speech recognizer backed by an HTTP sidecar
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecognizer {
    pub fn new(config: &CollaboratorConfig) -> std::result::Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.asr_endpoint.clone(),
        })
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn transcribe(&self, samples: &[f32], language_hint: &str) -> Result<String> {
        let pcm_bytes: Vec<u8> = samples
            .iter()
            .flat_map(|&s| ((s.clamp(-1.0, 1.0) * 32767.0) as i16).to_le_bytes())
            .collect();

        let response = self
            .client
            .post(format!("{}/transcribe", self.endpoint))
            .header("Content-Type", "audio/pcm")
            .header("X-Language", language_hint)
            .body(pcm_bytes)
            .send()
            .await
            .map_err(|e| Error::Asr(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Asr(format!(
                "service returned {}",
                response.status()
            )));
        }

        let result: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::Asr(format!("bad response: {e}")))?;

        if let Some(error) = result.error {
            tracing::warn!(error = %error, "transcription service reported an error");
        }

        Ok(result.text)
    }

    fn model_name(&self) -> &str {
        "http-asr"
    }
}
