//! Voice activity detection traits

/// Per-block voice activity classifier
///
/// Stateful: one instance per client, fed consecutive 512-sample blocks
/// from that client only.
pub trait VoiceDetector: Send {
    /// Classify one 512-sample block as speech or not
    fn is_speech(&mut self, block: &[f32]) -> bool;

    /// Drop accumulated state (session reset)
    fn reset(&mut self);
}

/// Builds a fresh detector for each new client
pub trait VadFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn VoiceDetector>;
}
