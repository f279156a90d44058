use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("conflict")]
    Conflict,
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
}
