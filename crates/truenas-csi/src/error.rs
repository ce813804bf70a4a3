//! Driver-level error taxonomy.

use thiserror::Error;
use truenas_client::ClientError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors produced by the orchestration layer.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Appliance client failure; inspect with the client's kind predicates.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The caller supplied an invalid name, size, or parameter. Permanent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation is outside what the driver supports.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DriverError {
    /// Whether the underlying cause is an absent appliance entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::Client(e) if e.is_not_found())
    }

    /// Whether the underlying cause is a transport failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DriverError::Client(e) if e.is_connection_error())
    }

    /// Whether the error is a permanent caller-side mistake (bad argument,
    /// unsupported operation, or invalid configuration).
    pub fn is_permanent(&self) -> bool {
        match self {
            DriverError::InvalidArgument(_) | DriverError::Unsupported(_) => true,
            DriverError::Client(e) => e.is_config_error() || e.is_auth_failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_delegates_to_client() {
        let err = DriverError::Client(ClientError::NotFound);
        assert!(err.is_not_found());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_invalid_argument_is_permanent() {
        let err = DriverError::InvalidArgument("bad protocol".to_string());
        assert!(err.is_permanent());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_config_error_is_permanent() {
        let err = DriverError::Client(ClientError::Config("empty URL".to_string()));
        assert!(err.is_permanent());
    }
}
