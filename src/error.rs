use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("gateway returned status {status}: {message}")]
    GatewayStatus { status: u16, message: String },

    #[error("capture error: {0}")]
    Capture(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
