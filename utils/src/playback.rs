use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use gemini_live_types::audio::OUTPUT_SAMPLE_RATE;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapProd;
use tokio::sync::mpsc;

use crate::audio::{self, StreamResampler};
use crate::pipeline::AudioEvent;
use crate::AudioError;

/// Seconds of output audio the ring buffer can hold.
pub const PLAYBACK_BUFFER_SECS: usize = 30;

const RESAMPLER_CHUNK: usize = 480;

/// Samples queued for playback but not yet handed to the device.
///
/// The producer reserves before pushing so the device callback can never
/// release more than was counted.
#[derive(Debug, Default)]
pub struct PendingSamples {
    count: AtomicUsize,
}

impl PendingSamples {
    pub fn reserve(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Gives back samples that never made it into the buffer.
    pub fn cancel(&self, n: usize) {
        self.release(n);
    }

    /// Returns true when this release empties a previously non-empty queue.
    pub fn release(&self, n: usize) -> bool {
        if n == 0 {
            return false;
        }
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(n)))
            .unwrap_or_else(|c| c);
        previous > 0 && previous <= n
    }

    pub fn clear(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// An open output stream plus the producer side of its buffer.
///
/// Created on first playback and kept until the pipeline is disposed.
pub(crate) struct Playback {
    _stream: Stream,
    producer: HeapProd<f32>,
    resampler: Option<StreamResampler>,
    pending: Arc<PendingSamples>,
    flush: Arc<AtomicBool>,
}

impl Playback {
    pub(crate) fn open(device: &Device, events: mpsc::Sender<AudioEvent>) -> Result<Self, AudioError> {
        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let channel_count = config.channels as usize;
        let sample_rate = config.sample_rate.0;
        tracing::info!("Output stream config: {:?}", &config);

        let buffer = audio::shared_buffer(sample_rate as usize * PLAYBACK_BUFFER_SECS);
        let (producer, mut consumer) = buffer.split();
        let pending = Arc::new(PendingSamples::default());
        let flush = Arc::new(AtomicBool::new(false));

        let callback_pending = pending.clone();
        let callback_flush = flush.clone();
        let drained_events = events.clone();
        let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if callback_flush.swap(false, Ordering::AcqRel) {
                consumer.clear();
                callback_pending.clear();
            }

            let mut played = 0;
            for frame in data.chunks_mut(channel_count.max(1)) {
                let sample = match consumer.try_pop() {
                    Some(sample) => {
                        played += 1;
                        sample
                    }
                    None => 0.0,
                };
                // mono source, same sample on every channel
                frame.fill(sample);
            }

            if callback_pending.release(played) && consumer.is_empty() {
                if let Err(e) = drained_events.try_send(AudioEvent::PlaybackDrained) {
                    tracing::warn!("failed to send playback drained event: {:?}", e);
                }
            }
        };

        let stream = device
            .build_output_stream(
                &config,
                output_data_fn,
                move |err| {
                    tracing::error!("an error occurred on output stream: {}", err);
                    let _ = events.try_send(AudioEvent::Error(AudioError::Stream(err.to_string())));
                },
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let resampler = if sample_rate == OUTPUT_SAMPLE_RATE {
            None
        } else {
            Some(StreamResampler::new(OUTPUT_SAMPLE_RATE, sample_rate, RESAMPLER_CHUNK)?)
        };

        Ok(Self {
            _stream: stream,
            producer,
            resampler,
            pending,
            flush,
        })
    }

    /// Queues 24 kHz PCM16 bytes; the device starts playing them on its next callback.
    pub(crate) fn enqueue(&mut self, pcm16: &[u8]) {
        let samples = audio::decode_pcm16(pcm16);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&samples),
            None => samples,
        };
        if samples.is_empty() {
            return;
        }

        self.pending.reserve(samples.len());
        let pushed = self.producer.push_slice(&samples);
        if pushed < samples.len() {
            tracing::warn!("playback buffer full, dropped {} samples", samples.len() - pushed);
            self.pending.cancel(samples.len() - pushed);
        }
    }

    pub(crate) fn stop(&mut self) {
        self.flush.store(true, Ordering::Release);
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.pending.get() > 0 && !self.flush.load(Ordering::Acquire)
    }
}
