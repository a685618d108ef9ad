use std::error::Error;
use std::fmt;

/// Unified error type for the gateway core
#[derive(Debug)]
pub enum GatewayError {
    /// HTTP failure or timeout
    Transport(String),
    /// Malformed JSON or missing required field
    Protocol(String),
    /// HMAC, hash, or size mismatch
    Integrity(String),
    /// Configuration value out of bounds or unknown register
    Validation(String),
    /// Filesystem, partition, or memory failure
    Resource(String),
    /// Operation not valid in the current state
    State(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            GatewayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            GatewayError::Integrity(msg) => write!(f, "Integrity error: {}", msg),
            GatewayError::Validation(msg) => write!(f, "Validation error: {}", msg),
            GatewayError::Resource(msg) => write!(f, "Resource error: {}", msg),
            GatewayError::State(msg) => write!(f, "State error: {}", msg),
        }
    }
}

impl Error for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Resource(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Protocol(err.to_string())
    }
}

impl From<crate::codec::CodecError> for GatewayError {
    fn from(err: crate::codec::CodecError) -> Self {
        GatewayError::Protocol(err.to_string())
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::Integrity("hash mismatch".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Integrity error"));
        assert!(msg.contains("hash mismatch"));
    }

    #[test]
    fn test_io_error_maps_to_resource() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: GatewayError = io.into();
        assert!(matches!(err, GatewayError::Resource(_)));
    }
}
