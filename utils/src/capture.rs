use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use gemini_live_types::audio::INPUT_SAMPLE_RATE;
use gemini_live_types::Blob;
use tokio::sync::mpsc;

use crate::audio::{self, StreamResampler, Vad};
use crate::pipeline::AudioEvent;
use crate::AudioError;

/// One outbound frame with its meter reading.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub chunk: Blob,
    pub level: u8,
    pub voice: bool,
}

/// Turns device-rate mono audio into fixed-size 16 kHz PCM16 chunks.
pub struct ChunkEncoder {
    resampler: Option<StreamResampler>,
    pending: Vec<f32>,
    frame_size: usize,
    vad: Vad,
}

impl ChunkEncoder {
    pub fn new(device_rate: u32, frame_size: usize, vad: Vad) -> Result<Self, AudioError> {
        let resampler = if device_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            Some(StreamResampler::new(device_rate, INPUT_SAMPLE_RATE, frame_size)?)
        };
        Ok(Self {
            resampler,
            pending: Vec::with_capacity(frame_size * 2),
            frame_size: frame_size.max(1),
            vad,
        })
    }

    pub fn push(&mut self, mono: &[f32]) -> Vec<CapturedFrame> {
        match self.resampler.as_mut() {
            Some(resampler) => {
                let resampled = resampler.process(mono);
                self.pending.extend_from_slice(&resampled);
            }
            None => self.pending.extend_from_slice(mono),
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            let level = audio::level(&frame);
            frames.push(CapturedFrame {
                chunk: audio::encode_chunk(&frame, INPUT_SAMPLE_RATE),
                level,
                voice: self.vad.is_voice(level),
            });
        }
        frames
    }
}

/// Builds and starts an input stream that reports chunks and levels on `events`.
pub(crate) fn start_capture(
    device: &Device,
    frame_size: usize,
    vad: Vad,
    events: mpsc::Sender<AudioEvent>,
) -> Result<Stream, AudioError> {
    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channel_count = config.channels as usize;
    tracing::info!("Input stream config: {:?}", &config);

    let mut encoder = ChunkEncoder::new(config.sample_rate.0, frame_size, vad)?;
    let data_events = events.clone();
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let mono = audio::downmix(data, channel_count);
        for frame in encoder.push(&mono) {
            if let Err(e) = data_events.try_send(AudioEvent::Level(frame.level)) {
                tracing::trace!("dropping level reading: {:?}", e);
            }
            if let Err(e) = data_events.try_send(AudioEvent::Chunk(frame.chunk)) {
                tracing::warn!("failed to send audio chunk: {}", e);
            }
        }
    };

    let stream = device
        .build_input_stream(
            &config,
            input_data_fn,
            move |err| {
                tracing::error!("an error occurred on input stream: {}", err);
                let _ = events.try_send(AudioEvent::Error(AudioError::Stream(err.to_string())));
            },
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    Ok(stream)
}
