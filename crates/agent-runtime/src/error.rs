use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed model response: {0}")]
    Decode(String),
    #[error("model client misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("live request queue is closed")]
    QueueClosed,
    #[error("event consumer went away")]
    EventsClosed,
    #[error("agent runtime unavailable: {0}")]
    Unavailable(String),
    #[error("turn did not finish within {0} model rounds")]
    TooManyRounds(usize),
    #[error(transparent)]
    Model(#[from] ModelError),
}
