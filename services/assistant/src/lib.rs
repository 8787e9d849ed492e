pub mod audio_adapter;
pub mod config;
pub mod console;
