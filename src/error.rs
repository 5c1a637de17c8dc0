use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("invalid catalog record: {0}")]
    InvalidRecord(String),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("unsupported URL scheme (not http): {0}")]
    InvalidScheme(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("gave up on {url} after {attempts} attempts: {message}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("download of {url} truncated: expected {expected} bytes, got {received}")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("object store request failed: {0}")]
    ObjectStoreHttp(String),

    #[error("cannot sanitize value of type {0}")]
    SanitizeType(String),

    #[error("structural violation in {path}: {message}")]
    StructuralViolation { path: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown catalog instance: {0}")]
    UnknownInstance(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to encode {0}")]
    Encode(String),

    #[error("worker panicked while processing {0}")]
    WorkerPanic(String),
}

impl HarvestError {
    /// Failures that skip one resource but leave the rest of the dataset running.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            HarvestError::InvalidScheme(_)
                | HarvestError::Http(_)
                | HarvestError::Status { .. }
                | HarvestError::RetriesExhausted { .. }
                | HarvestError::Truncated { .. }
                | HarvestError::ObjectStoreHttp(_)
        )
    }
}
