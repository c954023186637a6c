use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid thread id: {0:?}")]
    InvalidThreadId(String),
    #[error("not a thread url: {0}")]
    NotAThreadUrl(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::HttpError(e) if e.is_timeout())
    }

    /// The thread was pruned, deleted or never existed.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::NOT_FOUND)
    }

    /// The HTTP status for a non-success response, if that's what this error is.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Error::Status(status) => Some(*status),
            Error::HttpError(e) => e.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
