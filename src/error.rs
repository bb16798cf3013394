use thiserror::Error;

/// Every failure crossing a component boundary is one of these kinds; raw
/// transport and device errors never escape unclassified.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Transport open/send/close failure
    #[error("connection error: {0}")]
    Connection(String),

    /// The transport never acknowledged the open within the configured bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// A device or credential is missing; the feature degrades, the session
    /// survives
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Malformed or unexpected frame; logged, never fatal
    #[error("protocol error: {0}")]
    Protocol(String),
}
