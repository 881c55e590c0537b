//! HTTP speech synthesizer adapter
//!
//! Posts text and reads back raw MP3 bytes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use voice_gateway_config::CollaboratorConfig;
use voice_gateway_core::{Error, Result, SpeechSynthesizer};

use crate::PipelineError;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Speech synthesizer backed by an HTTP sidecar
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSynthesizer {
    pub fn new(config: &CollaboratorConfig) -> std::result::Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.tts_endpoint.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.endpoint))
            .json(&SynthesizeRequest {
                text,
                voice: voice_id,
            })
            .send()
            .await
            .map_err(|e| Error::Tts(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Tts(format!(
                "service returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(format!("bad response body: {e}")))?;

        if bytes.is_empty() {
            return Err(Error::Tts("empty synthesis result".to_string()));
        }

        Ok(bytes.to_vec())
    }

    fn model_name(&self) -> &str {
        "http-tts"
    }
}
