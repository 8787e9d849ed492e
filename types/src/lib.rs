pub mod session;
pub mod tools;
pub mod audio;
pub mod events;
mod content;

pub use content::message::{Content, Role};
pub use content::parts::{Blob, Part};
pub use events::{ClientMessage, ServerMessage};
pub use session::{LiveConnectConfig, Modality};
