//! Style generation seam
//!
//! The engine treats the model that writes CSS as an opaque collaborator. It
//! only sees [`StyleGenerator::generate`], bounded by the coordinator's
//! deadline, and never trusts its output without [`sanitize::clean_css`].

pub mod sanitize;
pub mod template;

use async_trait::async_trait;
use retroweb_model::{Era, Feedback, Fingerprint};
use std::time::Duration;
use thiserror::Error;

/// Why a generation produced no usable stylesheet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generated css rejected: {0}")]
    Invalid(String),
}

/// Everything the generator gets to see about a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub domain: String,
    pub era: Era,
    pub fingerprint: Fingerprint,
    /// Text digest of the page layout, when the caller has one
    pub dom_summary: Option<String>,
    /// Most recent feedback on this entry, used to bias the next attempt
    pub feedback: Option<Feedback>,
}

/// Trait for the external style model
#[async_trait]
pub trait StyleGenerator: Send + Sync {
    /// Produce CSS text for the request
    async fn generate(&self, request: GenerationRequest) -> Result<String, GeneratorError>;

    /// Short identifier used in logs
    fn name(&self) -> &str;
}
