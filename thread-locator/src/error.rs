//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Only startup and hand-off paths produce these. Polling failures inside the
/// engine are plain values and never surface as errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("API error: {0}")]
    Api(#[from] imageboard_api::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Prompt error: {0}")]
    Prompt(#[from] inquire::InquireError),

    #[error("Failed to open {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn navigation(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Navigation {
            url: url.into(),
            source,
        }
    }
}
