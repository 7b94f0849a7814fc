use agent_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("agent runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("websocket error: {0}")]
    Socket(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
