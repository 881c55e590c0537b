//! Utterance trigger buffer
//!
//! Accumulates speech-framed blocks and decides when a complete utterance
//! exists. Two flush conditions: sustained trailing silence, or the
//! maximum utterance length. A short pre-roll of blocks preceding the
//! first speech block is included so word onsets are not clipped.

use std::collections::VecDeque;

use voice_gateway_config::AudioConfig;
use voice_gateway_core::audio::BLOCK_MS;

/// Trigger buffer configuration, all in blocks
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Consecutive silent blocks that flush a collecting utterance
    pub silence_blocks_for_flush: usize,
    /// Maximum blocks in one utterance before a forced flush
    pub max_utterance_blocks: usize,
    /// Blocks of pre-roll retained ahead of detected speech
    pub preroll_blocks: usize,
}

impl TriggerConfig {
    /// Derive block counts from millisecond settings
    pub fn from_audio(audio: &AudioConfig) -> Self {
        Self {
            silence_blocks_for_flush: (audio.silence_ms_for_flush / BLOCK_MS).max(1) as usize,
            max_utterance_blocks: (audio.max_utterance_ms / BLOCK_MS).max(2) as usize,
            preroll_blocks: audio.preroll_blocks,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::from_audio(&AudioConfig::default())
    }
}

/// Buffer state visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    /// No speech in progress; blocks feed the pre-roll ring only
    #[default]
    Idle,
    /// Speech detected; blocks accumulate until a flush condition
    Collecting,
}

/// Speech-framed utterance accumulator
pub struct TriggerBuffer {
    config: TriggerConfig,
    state: TriggerState,
    preroll: VecDeque<Vec<f32>>,
    collected: Vec<f32>,
    collected_blocks: usize,
    silent_blocks: usize,
}

impl TriggerBuffer {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            preroll: VecDeque::with_capacity(config.preroll_blocks + 1),
            config,
            state: TriggerState::Idle,
            collected: Vec::new(),
            collected_blocks: 0,
            silent_blocks: 0,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Feed one block with its VAD verdict.
    ///
    /// Returns the full utterance samples on the collecting-to-flushing
    /// transition, `None` otherwise. Trailing silence stays in the
    /// utterance so the recognizer sees a natural sentence end.
    pub fn push(&mut self, block: &[f32], is_speech: bool) -> Option<Vec<f32>> {
        match self.state {
            TriggerState::Idle => {
                if is_speech {
                    self.state = TriggerState::Collecting;
                    self.silent_blocks = 0;
                    for preroll_block in self.preroll.drain(..) {
                        self.collected_blocks += 1;
                        self.collected.extend(preroll_block);
                    }
                    self.collect(block);
                    None
                } else {
                    if self.preroll.len() == self.config.preroll_blocks {
                        self.preroll.pop_front();
                    }
                    if self.config.preroll_blocks > 0 {
                        self.preroll.push_back(block.to_vec());
                    }
                    None
                }
            }
            TriggerState::Collecting => {
                self.collect(block);

                if is_speech {
                    self.silent_blocks = 0;
                } else {
                    self.silent_blocks += 1;
                    if self.silent_blocks > self.config.silence_blocks_for_flush {
                        return Some(self.flush());
                    }
                }

                if self.collected_blocks >= self.config.max_utterance_blocks {
                    return Some(self.flush());
                }

                None
            }
        }
    }

    /// Drop everything and return to idle (session reset)
    pub fn reset(&mut self) {
        self.state = TriggerState::Idle;
        self.preroll.clear();
        self.collected.clear();
        self.collected_blocks = 0;
        self.silent_blocks = 0;
    }

    fn collect(&mut self, block: &[f32]) {
        self.collected.extend_from_slice(block);
        self.collected_blocks += 1;
    }

    fn flush(&mut self) -> Vec<f32> {
        self.state = TriggerState::Idle;
        self.collected_blocks = 0;
        self.silent_blocks = 0;
        std::mem::take(&mut self.collected)
    }
}
