//! Energy-based voice activity detection
//!
//! A per-block RMS energy gate with hangover smoothing. Not a model-grade
//! detector, but stable on telephone-bandwidth speech and cheap enough to
//! run inline in the receive path. One instance per client; the hangover
//! counter is the only state.

use voice_gateway_config::AudioConfig;
use voice_gateway_core::{audio, VadFactory, VoiceDetector};

/// Energy VAD configuration
#[derive(Debug, Clone)]
pub struct EnergyVadConfig {
    /// Speech threshold in dBFS
    pub threshold_db: f32,
    /// Blocks the detector stays hot after the last loud block
    pub hangover_blocks: usize,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            threshold_db: -40.0,
            hangover_blocks: 4,
        }
    }
}

impl From<&AudioConfig> for EnergyVadConfig {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            threshold_db: audio.vad_threshold_db,
            hangover_blocks: audio.vad_hangover_blocks,
        }
    }
}

/// RMS energy gate with hangover
pub struct EnergyVad {
    config: EnergyVadConfig,
    hangover: usize,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            config,
            hangover: 0,
        }
    }
}

impl VoiceDetector for EnergyVad {
    fn is_speech(&mut self, block: &[f32]) -> bool {
        if audio::energy_db(block) >= self.config.threshold_db {
            self.hangover = self.config.hangover_blocks;
            return true;
        }

        if self.hangover > 0 {
            self.hangover -= 1;
            return true;
        }

        false
    }

    fn reset(&mut self) {
        self.hangover = 0;
    }
}

/// Builds an [`EnergyVad`] per client
pub struct EnergyVadFactory {
    config: EnergyVadConfig,
}

impl EnergyVadFactory {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self { config }
    }
}

impl VadFactory for EnergyVadFactory {
    fn create(&self) -> Box<dyn VoiceDetector> {
        Box::new(EnergyVad::new(self.config.clone()))
    }
}
