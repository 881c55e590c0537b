//! Streaming IMA-ADPCM codec
//!
//! Each 16-bit PCM sample encodes to a 4-bit delta against a running
//! predictor, giving 4:1 compression. Encoder and decoder each hold a
//! two-field state (predicted sample + step table index) that persists
//! across datagrams from the same peer; resetting mid-stream produces an
//! audible click for several frames, so state is only dropped on explicit
//! session reset or client reap.
//!
//! Nibble order: the first sample of a byte occupies the high four bits.

use crate::CodecError;

/// Quantizer step sizes indexed by state.step_index
const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Step index adjustment per 3-bit code magnitude
const INDEX_TABLE: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];

const MAX_STEP_INDEX: i32 = 88;
const PCM_SCALE: f32 = 32767.0;

/// Predictor + step index pair shared by both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct AdpcmState {
    predictor: i32,
    step_index: i32,
}

impl AdpcmState {
    /// Reconstruct one sample from a 4-bit code, advancing the state.
    /// This is the shared core: the encoder runs it too so both sides
    /// track the identical predictor.
    fn step(&mut self, code: u8) -> i16 {
        let step = STEP_TABLE[self.step_index as usize];

        let mut diff = step >> 3;
        if code & 4 != 0 {
            diff += step;
        }
        if code & 2 != 0 {
            diff += step >> 1;
        }
        if code & 1 != 0 {
            diff += step >> 2;
        }

        if code & 8 != 0 {
            self.predictor -= diff;
        } else {
            self.predictor += diff;
        }
        self.predictor = self.predictor.clamp(i16::MIN as i32, i16::MAX as i32);

        self.step_index = (self.step_index + INDEX_TABLE[(code & 7) as usize])
            .clamp(0, MAX_STEP_INDEX);

        self.predictor as i16
    }

    /// Quantize one sample to a 4-bit code, advancing the state
    fn encode_sample(&mut self, sample: i16) -> u8 {
        let step = STEP_TABLE[self.step_index as usize];
        let mut diff = sample as i32 - self.predictor;

        let mut code = 0u8;
        if diff < 0 {
            code |= 8;
            diff = -diff;
        }

        if diff >= step {
            code |= 4;
            diff -= step;
        }
        if diff >= step >> 1 {
            code |= 2;
            diff -= step >> 1;
        }
        if diff >= step >> 2 {
            code |= 1;
        }

        self.step(code);
        code
    }
}

/// Streaming encoder, one per outbound direction per peer
#[derive(Debug, Clone, Default)]
pub struct AdpcmEncoder {
    state: AdpcmState,
}

impl AdpcmEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress float32 samples in [-1, 1] to packed 4-bit codes.
    ///
    /// The sample count must be even so every byte is fully populated;
    /// the 512-sample block framing guarantees this on the hot path.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>, CodecError> {
        if samples.is_empty() || samples.len() % 2 != 0 {
            return Err(CodecError::BadAdpcmPayload(samples.len()));
        }

        let mut encoded = Vec::with_capacity(samples.len() / 2);
        for pair in samples.chunks_exact(2) {
            let high = self.state.encode_sample(quantize(pair[0]));
            let low = self.state.encode_sample(quantize(pair[1]));
            encoded.push((high << 4) | low);
        }

        Ok(encoded)
    }

    /// Drop predictor state (session reset only)
    pub fn reset(&mut self) {
        self.state = AdpcmState::default();
    }
}

/// Streaming decoder, one per inbound direction per peer
#[derive(Debug, Clone, Default)]
pub struct AdpcmDecoder {
    state: AdpcmState,
}

impl AdpcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompress packed codes to float32 samples in [-1, 1].
    ///
    /// Malformed input (empty or odd-length) leaves the state untouched
    /// so the stream stays decodable after the packet is dropped.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(CodecError::BadAdpcmPayload(data.len()));
        }

        let mut samples = Vec::with_capacity(data.len() * 2);
        for &byte in data {
            samples.push(self.state.step(byte >> 4) as f32 / PCM_SCALE);
            samples.push(self.state.step(byte & 0x0f) as f32 / PCM_SCALE);
        }

        Ok(samples)
    }

    /// Drop predictor state (session reset only)
    pub fn reset(&mut self) {
        self.state = AdpcmState::default();
    }
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM_SCALE) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mixed-tone signal resembling voiced speech energy
    fn test_signal(seconds: usize) -> Vec<f32> {
        let rate = 16_000usize;
        (0..rate * seconds)
            .map(|i| {
                let t = i as f32 / rate as f32;
                0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                    + 0.2 * (2.0 * std::f32::consts::PI * 880.0 * t).sin()
                    + 0.1 * (2.0 * std::f32::consts::PI * 1320.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_compression_ratio() {
        let mut encoder = AdpcmEncoder::new();
        let encoded = encoder.encode(&vec![0.1; 512]).unwrap();
        assert_eq!(encoded.len(), 256);
    }

    #[test]
    fn test_roundtrip_error_bound_over_persistent_state() {
        let signal = test_signal(10);
        let mut encoder = AdpcmEncoder::new();
        let mut decoder = AdpcmDecoder::new();

        let mut decoded = Vec::with_capacity(signal.len());
        for block in signal.chunks_exact(512) {
            let compressed = encoder.encode(block).unwrap();
            decoded.extend(decoder.decode(&compressed).unwrap());
        }

        let mse: f32 = signal
            .iter()
            .zip(decoded.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            / decoded.len() as f32;

        assert!(mse < 0.01, "round-trip MSE too high: {mse}");
    }

    #[test]
    fn test_state_persists_across_blocks() {
        let signal = test_signal(1);

        // Continuous decode vs a decoder reset between blocks: the
        // continuous one must track the encoder much more closely.
        let encode = |signal: &[f32]| {
            let mut encoder = AdpcmEncoder::new();
            signal
                .chunks_exact(512)
                .map(|b| encoder.encode(b).unwrap())
                .collect::<Vec<_>>()
        };

        let blocks = encode(&signal);

        let mut continuous = AdpcmDecoder::new();
        let continuous_out: Vec<f32> = blocks
            .iter()
            .flat_map(|b| continuous.decode(b).unwrap())
            .collect();

        let resetting_out: Vec<f32> = blocks
            .iter()
            .flat_map(|b| AdpcmDecoder::new().decode(b).unwrap())
            .collect();

        let mse = |out: &[f32]| {
            signal
                .iter()
                .zip(out.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                / out.len() as f32
        };

        assert!(mse(&continuous_out) < mse(&resetting_out));
    }

    #[test]
    fn test_malformed_input_preserves_state() {
        let mut decoder = AdpcmDecoder::new();
        let mut encoder = AdpcmEncoder::new();

        let block = encoder.encode(&test_signal(1)[..512]).unwrap();
        decoder.decode(&block).unwrap();
        let state_before = decoder.state;

        assert!(decoder.decode(&[]).is_err());
        assert!(decoder.decode(&[0x12, 0x34, 0x56]).is_err());
        assert_eq!(decoder.state, state_before);
    }

    #[test]
    fn test_odd_sample_count_rejected() {
        let mut encoder = AdpcmEncoder::new();
        assert!(encoder.encode(&[0.0; 511]).is_err());
        assert!(encoder.encode(&[]).is_err());
    }

    #[test]
    fn test_clipping_input_survives() {
        let mut encoder = AdpcmEncoder::new();
        let mut decoder = AdpcmDecoder::new();

        let hot: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 2.0 } else { -2.0 }).collect();
        let compressed = encoder.encode(&hot).unwrap();
        let decoded = decoder.decode(&compressed).unwrap();

        assert!(decoded.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}
