//! Error types for the relay service

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur in the relay service
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid SNI or hostname
    #[error("Invalid SNI: {0}")]
    InvalidSni(String),

    /// Plaintext request head could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Relay channel failed to take a socket
    #[error("Relay channel error: {0}")]
    Channel(String),

    /// Relay channel is already closed
    #[error("Relay channel closed")]
    ChannelClosed,

    /// Credential store query failed
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Stored secret hash could not be checked
    #[error("Secret verification error: {0}")]
    SecretVerification(String),

    /// DNS resolution or record update failed
    #[error("DNS error: {0}")]
    Dns(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// HTTP serving error on an internal handler
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<config::ConfigError> for RelayError {
    fn from(e: config::ConfigError) -> Self {
        RelayError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Dns(e.to_string())
    }
}

impl From<tokio_rustls::rustls::Error> for RelayError {
    fn from(e: tokio_rustls::rustls::Error) -> Self {
        RelayError::Tls(e.to_string())
    }
}
