mod audio;
mod client;
mod error;
mod transcribe;

pub use gemini_live_types as types;
pub use gemini_live_utils as utils;

pub use audio::AudioStreamer;
pub use client::config::{Config, ConfigBuilder};
pub use client::{connect, connect_with_config, Client, ConnectionState, EventRx, LiveEvent};
pub use error::LiveError;
pub use transcribe::{TranscribeConfig, Transcriber, TranscriptFragment, TranscriptSource};
