use thiserror::Error;

/// Failure taxonomy shared by the REST client, the live feed and the view.
#[derive(Debug, Error)]
pub enum AppError {
    /// Fetch or transport failure. Retried, or surfaced as a status change.
    #[error("network error: {0}")]
    Network(String),

    /// Bad address or other user input. Surfaced immediately, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed server message. Logged; the connection is kept.
    #[error("decode error: {0}")]
    Decode(String),

    /// A dashboard panel failed to build. Contained to that panel.
    #[error("render error in {panel}: {message}")]
    Render { panel: String, message: String },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Network(_))
    }

    pub fn render(panel: &str, message: impl Into<String>) -> Self {
        AppError::Render {
            panel: panel.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AppError::Decode(e.to_string())
        } else {
            AppError::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Decode(e.to_string())
    }
}
