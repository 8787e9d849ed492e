use base64::Engine;
use gemini_live_types::audio::pcm_mime_type;
use gemini_live_types::Blob;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::AudioError;

/// Samples per outbound frame: 64 ms at 16 kHz.
pub const CAPTURE_FRAME_SIZE: usize = 1024;

/// Level (0-100) at or above which a frame counts as speech.
pub const DEFAULT_VAD_THRESHOLD: u8 = 30;

/// Dynamic range mapped onto the 0-100 level scale.
const LEVEL_FLOOR_DB: f32 = -60.0;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))
}

/// A mono resampler that accepts arbitrary slice lengths and carries the
/// remainder over to the next call instead of padding it with silence.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self, AudioError> {
        Ok(Self {
            inner: create_resampler(from_rate as f64, to_rate as f64, chunk_size)?,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.inner.process(&[chunk.as_slice()], None) {
                Ok(resampled) => {
                    if let Some(channel) = resampled.first() {
                        out.extend_from_slice(channel);
                    }
                }
                Err(e) => tracing::warn!("failed to resample chunk: {}", e),
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size.max(1))
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

pub fn decode_pcm16(pcm16: &[u8]) -> Vec<f32> {
    pcm16
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
        })
        .collect()
}

pub fn decode(fragment: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(fragment) {
        Ok(pcm16) => decode_pcm16(&pcm16),
        Err(e) => {
            tracing::error!("failed to decode base64 fragment: {}", e);
            Vec::new()
        }
    }
}

pub fn encode_pcm16(pcm32: &[f32]) -> Vec<u8> {
    pcm32
        .iter()
        .flat_map(|&sample| {
            ((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes()
        })
        .collect()
}

pub fn encode(pcm32: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(encode_pcm16(pcm32))
}

/// Encodes one frame as an outbound chunk announcing `sample_rate`.
pub fn encode_chunk(pcm32: &[f32], sample_rate: u32) -> Blob {
    Blob::new(pcm_mime_type(sample_rate), encode(pcm32))
}

/// RMS level of a frame on a 0-100 scale covering the top 60 dB below full scale.
pub fn level(samples: &[f32]) -> u8 {
    if samples.is_empty() {
        return 0;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = mean_square.sqrt();
    if rms <= f32::EPSILON {
        return 0;
    }
    let db = 20.0 * rms.log10();
    let normalized = ((db - LEVEL_FLOOR_DB) / -LEVEL_FLOOR_DB).clamp(0.0, 1.0);
    (normalized * 100.0).round() as u8
}

/// Level-over-threshold voice detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vad {
    threshold: u8,
}

impl Default for Vad {
    fn default() -> Self {
        Self::new(DEFAULT_VAD_THRESHOLD)
    }
}

impl Vad {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.min(100),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn is_voice(&self, level: u8) -> bool {
        level >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 16_000.0).sin())
            .collect()
    }

    #[test]
    fn test_pcm16_codec() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -i16::MAX);
        // out-of-range input is clipped, not wrapped
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), i16::MAX);

        let decoded = decode(&encode(&[0.5, -0.25]));
        assert!((decoded[0] - 0.5).abs() < 1e-3);
        assert!((decoded[1] + 0.25).abs() < 1e-3);
        assert!(decode("%%%").is_empty());
    }

    #[test]
    fn test_encode_chunk_mime() {
        let chunk = encode_chunk(&[0.0; 4], 16_000);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert!(chunk.is_audio());
    }

    #[test]
    fn test_level_scale() {
        assert_eq!(level(&[]), 0);
        assert_eq!(level(&[0.0; 256]), 0);
        // full scale sine is about -3 dBFS
        let loud = level(&sine(1.0, 1024));
        assert!((93..=97).contains(&loud), "loud = {}", loud);
        // -60 dBFS and below bottom out
        assert_eq!(level(&sine(0.0005, 1024)), 0);

        let vad = Vad::default();
        assert!(vad.is_voice(loud));
        assert!(!vad.is_voice(level(&sine(0.002, 1024))));
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_stream_resampler_carries_remainder() {
        let mut resampler = StreamResampler::new(48_000, 16_000, 480).unwrap();
        let mut produced = 0;
        for _ in 0..10 {
            produced += resampler.process(&[0.0; 300]).len();
        }
        // 3000 input samples, 2880 of them in whole chunks -> about 960 out
        assert!((940..=980).contains(&produced), "produced = {}", produced);
    }
}
