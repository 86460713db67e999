//! Error types for the slotwatch service

/// Errors that can occur in the slotwatch service
#[derive(Debug, thiserror::Error)]
pub enum SlotwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Upstream rejected the session (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No working query operation found ({attempted} candidates attempted)")]
    NoWorkingOperations { attempted: usize },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Dashboard error: {0}")]
    Dashboard(String),
}

impl SlotwatchError {
    /// The upstream refused the current credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, SlotwatchError::Unauthorized { .. })
    }

    /// Failures expected to clear up on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SlotwatchError::Http(_)
                | SlotwatchError::Timeout(_)
                | SlotwatchError::MalformedResponse(_)
                | SlotwatchError::Json(_)
        )
    }
}

/// Result type alias for slotwatch operations
pub type Result<T> = std::result::Result<T, SlotwatchError>;
