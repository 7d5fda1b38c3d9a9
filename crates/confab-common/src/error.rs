use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the whole workspace.
///
/// `Config` and `Model` abort the current turn. Expected tool failures are
/// folded back into conversation history as error payloads by the session
/// loop instead of surfacing here.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (e.g. a required credential).
    #[error("config error: {0}")]
    Config(String),

    /// Model invocation failure: network, auth, rate limit, malformed reply.
    #[error("model error: {0}")]
    Model(String),

    /// Storage failure in the thread store.
    #[error("database error: {0}")]
    Database(String),

    /// Turn-loop failure outside the model boundary (e.g. iteration cap).
    #[error("agent error: {0}")]
    Agent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
