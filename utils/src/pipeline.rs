use cpal::traits::DeviceTrait;
use cpal::{Device, Stream};
use gemini_live_types::audio::PermissionState;
use gemini_live_types::Blob;
use tokio::sync::mpsc;

use crate::audio::{Vad, CAPTURE_FRAME_SIZE};
use crate::capture::start_capture;
use crate::device;
use crate::playback::Playback;
use crate::AudioError;

/// Everything the pipeline reports from the audio callbacks.
#[derive(Debug)]
pub enum AudioEvent {
    /// A wire-ready capture chunk.
    Chunk(Blob),
    /// Meter reading for the chunk that follows, 0-100.
    Level(u8),
    /// The playback buffer ran dry after having played audio.
    PlaybackDrained,
    Error(AudioError),
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub vad_threshold: Option<u8>,
}

/// Microphone capture and speaker playback on the default cpal host.
///
/// Errors from the device callbacks arrive as [`AudioEvent::Error`]; the
/// methods here only fail for problems detected synchronously.
pub struct AudioPipeline {
    options: PipelineOptions,
    vad: Vad,
    events: mpsc::Sender<AudioEvent>,
    permission: PermissionState,
    input: Option<Device>,
    capture: Option<Stream>,
    playback: Option<Playback>,
    disposed: bool,
}

impl AudioPipeline {
    pub fn new(options: PipelineOptions, events: mpsc::Sender<AudioEvent>) -> Self {
        let vad = options.vad_threshold.map(Vad::new).unwrap_or_default();
        Self {
            options,
            vad,
            events,
            permission: PermissionState::Unknown,
            input: None,
            capture: None,
            playback: None,
            disposed: false,
        }
    }

    pub fn vad(&self) -> Vad {
        self.vad
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    fn report(&self, error: AudioError) {
        if let Err(e) = self.events.try_send(AudioEvent::Error(error)) {
            tracing::warn!("failed to report audio error: {:?}", e);
        }
    }

    /// Opens the input device. A denial sticks until [`Self::reset_permission`].
    pub fn request_permission(&mut self) -> PermissionState {
        if self.permission != PermissionState::Unknown {
            return self.permission;
        }

        let opened = device::get_or_default_input(self.options.input_device.as_deref())
            .and_then(|device| {
                device
                    .default_input_config()
                    .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
                Ok(device)
            });

        match opened {
            Ok(device) => {
                tracing::info!("Using input device: {:?}", device.name().ok());
                self.input = Some(device);
                self.permission = PermissionState::Granted;
            }
            Err(e) => {
                tracing::warn!("microphone unavailable: {}", e);
                self.permission = PermissionState::Denied;
                self.report(AudioError::PermissionDenied(e.to_string()));
            }
        }
        self.permission
    }

    pub fn reset_permission(&mut self) {
        self.permission = PermissionState::Unknown;
        self.input = None;
    }

    pub fn start_recording(&mut self) -> Result<(), AudioError> {
        if self.disposed {
            return Err(AudioError::Disposed);
        }
        if self.capture.is_some() {
            return Ok(());
        }
        if self.request_permission() != PermissionState::Granted {
            return Err(AudioError::PermissionDenied(
                "microphone permission was denied".to_string(),
            ));
        }
        let Some(input) = self.input.as_ref() else {
            return Err(AudioError::Device("no input device".to_string()));
        };

        let stream = start_capture(input, CAPTURE_FRAME_SIZE, self.vad, self.events.clone())?;
        self.capture = Some(stream);
        tracing::info!("recording started");
        Ok(())
    }

    /// Releases the input stream.
    pub fn stop_recording(&mut self) {
        if self.capture.take().is_some() {
            tracing::info!("recording stopped");
        }
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_some()
    }

    /// Queues 24 kHz PCM16 for playback, opening the output stream on first use.
    pub fn play(&mut self, pcm16: &[u8]) -> Result<(), AudioError> {
        if self.disposed {
            return Err(AudioError::Disposed);
        }
        if self.playback.is_none() {
            let output = device::get_or_default_output(self.options.output_device.as_deref())?;
            tracing::info!("Using output device: {:?}", output.name().ok());
            self.playback = Some(Playback::open(&output, self.events.clone())?);
        }
        if let Some(playback) = self.playback.as_mut() {
            playback.enqueue(pcm16);
        }
        Ok(())
    }

    /// Drops queued audio; the output stream stays open for reuse.
    pub fn stop_playback(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(Playback::is_playing)
    }

    /// Releases every device. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop_recording();
        self.playback = None;
        self.input = None;
        self.disposed = true;
        tracing::debug!("audio pipeline disposed");
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_is_idempotent_and_blocks_further_use() {
        let (tx, _rx) = mpsc::channel(8);
        let mut pipeline = AudioPipeline::new(PipelineOptions::default(), tx);

        pipeline.dispose();
        pipeline.dispose();

        assert!(!pipeline.is_recording());
        assert!(!pipeline.is_playing());
        assert!(matches!(pipeline.start_recording(), Err(AudioError::Disposed)));
        assert!(matches!(pipeline.play(&[0, 0]), Err(AudioError::Disposed)));
    }

    #[test]
    fn test_denied_permission_is_sticky_until_reset() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut pipeline = AudioPipeline::new(
            PipelineOptions {
                input_device: Some("no such microphone".to_string()),
                ..Default::default()
            },
            tx,
        );

        assert_eq!(pipeline.request_permission(), PermissionState::Denied);
        assert!(matches!(rx.try_recv(), Ok(AudioEvent::Error(AudioError::PermissionDenied(_)))));
        assert!(pipeline.start_recording().is_err());
        assert_eq!(pipeline.permission(), PermissionState::Denied);

        pipeline.reset_permission();
        assert_eq!(pipeline.permission(), PermissionState::Unknown);
    }

    #[test]
    fn test_vad_threshold_option() {
        let (tx, _rx) = mpsc::channel(1);
        let pipeline = AudioPipeline::new(
            PipelineOptions {
                vad_threshold: Some(55),
                ..Default::default()
            },
            tx,
        );
        assert_eq!(pipeline.vad().threshold(), 55);
    }
}
