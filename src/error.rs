//! Error types for imapveil

use std::io;

/// Main error type for the proxy
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Dial error: {0}")]
    Dial(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Proxy error: {0}")]
    Proxy(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn pattern(msg: impl Into<String>) -> Self {
        Error::Pattern(msg.into())
    }

    pub fn dial(msg: impl Into<String>) -> Self {
        Error::Dial(msg.into())
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Error::Tls(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Error::Proxy(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
