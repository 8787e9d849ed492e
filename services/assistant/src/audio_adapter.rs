use anyhow::Result;
use assistant_core::{AudioIo, AudioSignal};
use gemini_live::types::audio::PermissionState;
use gemini_live::utils::{AudioEvent, AudioPipeline, PipelineOptions};
use tokio::sync::mpsc;

const EVENT_CAPACITY: usize = 256;

/// Microphone and speakers through cpal.
pub struct CpalAudio {
    pipeline: AudioPipeline,
}

impl CpalAudio {
    /// Must be called inside a tokio runtime; a task forwards device events as [`AudioSignal`]s.
    pub fn new(options: PipelineOptions) -> (Self, mpsc::Receiver<AudioSignal>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let pipeline = AudioPipeline::new(options, events_tx);
        (Self { pipeline }, forward(events_rx))
    }
}

fn to_signal(event: AudioEvent) -> AudioSignal {
    match event {
        AudioEvent::Chunk(blob) => AudioSignal::Chunk(blob),
        AudioEvent::Level(level) => AudioSignal::Level(level),
        AudioEvent::PlaybackDrained => AudioSignal::PlaybackDrained,
        AudioEvent::Error(e) => AudioSignal::Error(e.to_string()),
    }
}

fn forward(mut events: mpsc::Receiver<AudioEvent>) -> mpsc::Receiver<AudioSignal> {
    let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if tx.send(to_signal(event)).await.is_err() {
                break;
            }
        }
        tracing::debug!("audio event forwarder stopped");
    });
    rx
}

impl AudioIo for CpalAudio {
    fn request_permission(&mut self) -> PermissionState {
        self.pipeline.request_permission()
    }

    fn reset_permission(&mut self) {
        self.pipeline.reset_permission();
    }

    fn permission(&self) -> PermissionState {
        self.pipeline.permission()
    }

    fn start_recording(&mut self) -> Result<()> {
        self.pipeline.start_recording()?;
        Ok(())
    }

    fn stop_recording(&mut self) {
        self.pipeline.stop_recording();
    }

    fn is_recording(&self) -> bool {
        self.pipeline.is_recording()
    }

    fn play(&mut self, pcm16: &[u8]) -> Result<()> {
        self.pipeline.play(pcm16)?;
        Ok(())
    }

    fn stop_playback(&mut self) {
        self.pipeline.stop_playback();
    }

    fn is_playing(&self) -> bool {
        self.pipeline.is_playing()
    }

    fn dispose(&mut self) {
        self.pipeline.dispose();
    }
}
