#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay protocol error: {0}")]
    Protocol(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node has no lines: {0}")]
    EmptyNode(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Request canceled")]
    Canceled,
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Transport(e.to_string())
    }
}
