use std::time::Duration;

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

pub const BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws";
pub const BIDI_SERVICE_PATH: &str =
    "google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CAPACITY: usize = 1024;
