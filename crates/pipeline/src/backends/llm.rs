//! Streaming chat language model adapter
//!
//! Speaks the Ollama-compatible `/api/chat` NDJSON protocol. Tokens are
//! forwarded to the caller as they arrive; a dropped receiver cancels
//! generation cleanly.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use voice_gateway_config::CollaboratorConfig;
use voice_gateway_core::{Error, LanguageModel, Result, Turn, TurnRole};

use crate::PipelineError;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    message: ChunkMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    content: String,
}

/// Language model backed by a streaming chat endpoint
pub struct StreamingChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: String,
}

impl StreamingChatModel {
    pub fn new(config: &CollaboratorConfig) -> std::result::Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.llm_endpoint.clone(),
            model: config.llm_model.clone(),
            system_prompt: config.llm_system_prompt.clone(),
        })
    }

    fn messages_for(&self, history: &[Turn], user_text: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: self.system_prompt.clone(),
        });

        for turn in history {
            messages.push(ChatMessage {
                role: match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }

        if let Some(text) = user_text {
            messages.push(ChatMessage {
                role: "user",
                content: text.to_string(),
            });
        }

        messages
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        tokens: mpsc::Sender<String>,
    ) -> Result<()> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Llm(format!(
                "service returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut line_buf = String::new();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| Error::Llm(format!("stream failed: {e}")))?;
            line_buf.push_str(&String::from_utf8_lossy(&bytes));

            // NDJSON: one chunk per line, lines may span network reads
            while let Some(newline) = line_buf.find('\n') {
                let line = line_buf[..newline].trim().to_string();
                line_buf.drain(..=newline);

                if line.is_empty() {
                    continue;
                }

                let chunk: ChatStreamChunk = match serde_json::from_str(&line) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unparseable stream line");
                        continue;
                    }
                };

                if !chunk.message.content.is_empty()
                    && tokens.send(chunk.message.content).await.is_err()
                {
                    // Receiver dropped: generation was cancelled
                    return Ok(());
                }

                if chunk.done {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LanguageModel for StreamingChatModel {
    async fn stream_reply(
        &self,
        history: &[Turn],
        user_text: &str,
        tokens: mpsc::Sender<String>,
    ) -> Result<()> {
        self.stream_chat(self.messages_for(history, Some(user_text)), tokens)
            .await
    }

    async fn opening_statement(&self, tokens: mpsc::Sender<String>) -> Result<()> {
        let messages = self.messages_for(
            &[],
            Some("Greet the caller and offer your help, in one short sentence."),
        );
        self.stream_chat(messages, tokens).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
