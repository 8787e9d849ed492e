pub mod audio;
pub mod capture;
pub mod device;
pub mod playback;
mod error;
mod pipeline;

pub use error::AudioError;
pub use pipeline::{AudioEvent, AudioPipeline, PipelineOptions};
