use anyhow::Result;
use gemini_live_types::Blob;
use gemini_live_types::audio::PermissionState;
#[cfg(test)]
use mockall::automock;

/// Reports from the audio hardware, delivered to the orchestrator on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSignal {
    Chunk(Blob),
    Level(u8),
    PlaybackDrained,
    Error(String),
}

/// Capture and playback as the orchestrator drives them.
///
/// Methods never block on the device; failures inside the device callbacks are
/// reported as [`AudioSignal::Error`].
#[cfg_attr(test, automock)]
pub trait AudioIo {
    fn request_permission(&mut self) -> PermissionState;

    fn reset_permission(&mut self);

    fn permission(&self) -> PermissionState;

    fn start_recording(&mut self) -> Result<()>;

    fn stop_recording(&mut self);

    fn is_recording(&self) -> bool;

    /// Queues 24 kHz PCM16 for streamed playback.
    fn play(&mut self, pcm16: &[u8]) -> Result<()>;

    fn stop_playback(&mut self);

    fn is_playing(&self) -> bool;

    fn dispose(&mut self);
}

/// Stand-in for hosts without audio hardware; the microphone is always refused.
#[derive(Debug, Default)]
pub struct NoAudio;

impl AudioIo for NoAudio {
    fn request_permission(&mut self) -> PermissionState {
        PermissionState::Denied
    }

    fn reset_permission(&mut self) {}

    fn permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    fn start_recording(&mut self) -> Result<()> {
        anyhow::bail!("audio is disabled")
    }

    fn stop_recording(&mut self) {}

    fn is_recording(&self) -> bool {
        false
    }

    fn play(&mut self, _pcm16: &[u8]) -> Result<()> {
        Ok(())
    }

    fn stop_playback(&mut self) {}

    fn is_playing(&self) -> bool {
        false
    }

    fn dispose(&mut self) {}
}
