/// Core error type for the council bot.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can decide what the acting chat sees (re-prompt, rejection, guidance or a
/// generic failure message).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Failures of the store or the transport (as opposed to user mistakes).
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::Transport(_) | Error::Io(_) | Error::Json(_) | Error::External(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
