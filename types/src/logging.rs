use chrono::{DateTime, Utc};

/// One entry for the streaming log sink: a timestamped, kind-tagged message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamingLog {
    date: DateTime<Utc>,
    kind: String,
    message: String,
}

impl StreamingLog {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entries_round_trip() {
        let entry = StreamingLog::new("server.audio", "buffer (4096)");
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: StreamingLog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), "server.audio");
        assert_eq!(parsed.message(), "buffer (4096)");
        assert_eq!(parsed.date(), entry.date());
    }
}
