#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("audio pipeline has been disposed")]
    Disposed,
}
