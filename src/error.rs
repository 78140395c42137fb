use thiserror::Error;

/// Errors surfaced through the typed core API.
///
/// Pattern compilation failures are reported synchronously from
/// `SearchWorker::search`; I/O and interruption are normally reported
/// asynchronously through the observer stream instead, and only appear
/// here when a caller invokes a blocking operation directly.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid search pattern: {0}")]
    BadPattern(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl From<regex::Error> for CoreError {
    fn from(err: regex::Error) -> Self {
        CoreError::BadPattern(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
