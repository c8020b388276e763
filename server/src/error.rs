use crate::style_cache::StoreError;
use retroweb_model::{FeedbackError, FingerprintError, TransitionError};
use thiserror::Error;

/// Errors returned by engine commands
///
/// Cloneable so that every caller coalesced onto one generation receives the
/// same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("invalid feedback: {0}")]
    InvalidFeedback(#[from] FeedbackError),

    #[error("no cached style for {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::StorageUnavailable(e.to_string())
    }
}

impl From<FingerprintError> for EngineError {
    fn from(e: FingerprintError) -> Self {
        EngineError::InvalidRequest(e.to_string())
    }
}
