mod client;
mod event;

pub use gemini_live_types as types;
pub use client::{Client, ClientTx, Config, ConfigBuilder, ConnectionStatus, Error, EventRx, Stats};
pub use client::consts::{BASE_URL, DEFAULT_MODEL};
pub use event::{translate, LiveEvent};

#[cfg(feature = "utils")]
pub use gemini_live_utils as utils;
