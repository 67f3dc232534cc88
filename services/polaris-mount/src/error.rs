//! Error types for the Benro Polaris mount driver

/// Errors that can occur when interacting with the Polaris mount head
#[derive(Debug, thiserror::Error)]
pub enum PolarisError {
    #[error("Not connected to Polaris")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Failed to send request: {0}")]
    SendError(String),

    #[error("Device communication error: {0}")]
    Communication(String),
}

/// Result type alias for Polaris mount operations
pub type Result<T> = std::result::Result<T, PolarisError>;
