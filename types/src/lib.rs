pub mod config;
pub mod logging;
pub mod messages;
pub mod tools;

pub use config::{GenerationConfig, LiveConfig, Modality, SpeechConfig};
pub use logging::StreamingLog;
pub use messages::{
    ClientContent, ClientMessage, Content, FunctionCall, FunctionResponse, MediaChunk, ModelTurn,
    Part, RealtimeInput, ServerContent, ServerMessage, SetupComplete, ToolCall,
    ToolCallCancellation, ToolResponse,
};
pub use tools::{FunctionDeclaration, Tool};
