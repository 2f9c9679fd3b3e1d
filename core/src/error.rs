/// Error types for the client sync layer
use thiserror::Error;

const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-2xx response; `message` is the server-provided text when there was one
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    /// A newer request superseded this one
    #[error("request aborted")]
    Aborted,

    #[error("not authenticated")]
    NotAuthenticated,
}

impl SyncError {
    /// Build an API error, falling back to a generic message when the server gave none
    pub fn api(status: u16, message: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_MESSAGE.to_string());
        SyncError::Api { status, message }
    }

    /// Cancellation of a superseded request, never shown to the user
    pub fn is_abort(&self) -> bool {
        matches!(self, SyncError::Aborted)
    }

    /// Text for the dismissible error banner
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Api { message, .. } => message.clone(),
            SyncError::Validation(msg) => msg.clone(),
            SyncError::Http(_) | SyncError::Io(_) | SyncError::Timeout(_) => {
                "Error connecting to the server".to_string()
            }
            SyncError::Connection(_) => "Failed to connect to chat server".to_string(),
            SyncError::NotAuthenticated => "Please log in to continue".to_string(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
