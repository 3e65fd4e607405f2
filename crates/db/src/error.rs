use thiserror::Error;
use uuid::Uuid;

/// Error surface shared by every store operation. Database failures are
/// carried verbatim; the enclosing transaction has already been rolled
/// back by the time a caller sees one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{resource} {uuid} not found")]
    NotFound { resource: &'static str, uuid: Uuid },
    #[error("etag mismatch: expected {expected}, actual {actual}")]
    ETagMismatch { expected: i64, actual: i64 },
    #[error("container still has {0} dependent rows")]
    NotEmpty(i64),
    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn not_found(resource: &'static str, uuid: Uuid) -> Self {
        Self::NotFound { resource, uuid }
    }
}
