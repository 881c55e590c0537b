//! Session identifiers
//!
//! A session id names one dialogue epoch of a logical client. It travels
//! on the wire as 16 raw bytes inside TTS fragment headers, so the type
//! wraps the bytes directly rather than a formatted string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 16-byte session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generate a fresh random session id
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Wrap raw wire bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes for the wire
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).simple())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::generate()
    }
}
