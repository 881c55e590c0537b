//! Language model trait

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Result, Turn};

/// Streaming language model interface
///
/// Replies are delivered token by token over the provided channel so the
/// caller can start synthesis before the full reply exists. Dropping the
/// receiving half cancels generation; implementations return `Ok` in that
/// case rather than an error.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Stream a reply to `user_text` given the dialogue so far.
    async fn stream_reply(
        &self,
        history: &[Turn],
        user_text: &str,
        tokens: mpsc::Sender<String>,
    ) -> Result<()>;

    /// Stream the opening statement spoken to a newly connected client.
    async fn opening_statement(&self, tokens: mpsc::Sender<String>) -> Result<()>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
