//! Error handling for the Face Tracking Service

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is missing or invalid; carries the offending field
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Camera source could not be opened
    #[error("Camera open failed: {0}")]
    CameraOpen(String),

    /// Frame read exceeded its deadline
    #[error("Camera read timed out")]
    CameraReadTimeout,

    /// Inference model failed to load
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// No face found in the submitted image
    #[error("No face detected in image")]
    NoFace,

    /// More than one face found where exactly one is required
    #[error("Multiple faces detected in image")]
    MultipleFaces,

    /// Embedding vector has the wrong dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Identity already enrolled
    #[error("Duplicate identity: {0}")]
    Duplicate(String),

    /// Durable attendance store is unreachable after retries
    #[error("Attendance store unavailable: {0}")]
    StoreUnavailable(String),

    /// Spill file could not absorb an event; fatal to the recorder
    #[error("Attendance spill failed: {0}")]
    SpillFull(String),

    /// Lifecycle operation on a stopped service
    #[error("Service is not running")]
    NotRunning,

    /// Lifecycle operation on a running service
    #[error("Service is already running")]
    AlreadyRunning,

    /// Global discovery deadline fired
    #[error("Camera discovery timed out")]
    DiscoveryTimeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code, used in status reports and logs
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConfigInvalid(_) => "CONFIG_INVALID",
            Error::NotFound(_) => "NOT_FOUND",
            Error::CameraOpen(_) => "CAMERA_OPEN",
            Error::CameraReadTimeout => "CAMERA_READ_TIMEOUT",
            Error::ModelLoad(_) => "MODEL_LOAD",
            Error::NoFace => "NO_FACE",
            Error::MultipleFaces => "MULTIPLE_FACES",
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::Duplicate(_) => "DUPLICATE",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::SpillFull(_) => "SPILL_FULL",
            Error::NotRunning => "NOT_RUNNING",
            Error::AlreadyRunning => "ALREADY_RUNNING",
            Error::DiscoveryTimeout => "DISCOVERY_TIMEOUT",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_names_field() {
        let err = Error::ConfigInvalid("models.detector_path".to_string());
        assert!(err.to_string().contains("models.detector_path"));
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = Error::DimensionMismatch {
            expected: 512,
            actual: 128,
        };
        assert!(err.to_string().contains("512"));
        assert!(err.to_string().contains("128"));
    }
}
