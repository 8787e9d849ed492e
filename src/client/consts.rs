pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

pub const BASE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

pub const DEFAULT_CAPACITY: usize = 1024;

/// How long a closing connection may take to flush its close frame.
pub const CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
