use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Malformed aggregate key: {0}")]
    MalformedKey(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl ArchiveError {
    /// Only transport-level failures are worth resubmitting; input defects
    /// fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ArchiveError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_unavailable_is_retryable() {
        assert!(ArchiveError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!ArchiveError::InvalidDimension("a-b".into()).is_retryable());
        assert!(!ArchiveError::MalformedKey("nokey".into()).is_retryable());
        assert!(!ArchiveError::Config("missing table".into()).is_retryable());
    }

    #[test]
    fn test_io_error_maps_to_store_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ArchiveError = io.into();
        assert!(matches!(err, ArchiveError::StoreUnavailable(msg) if msg.contains("pipe closed")));
    }
}
