//! Pipeline-level error taxonomy.
//!
//! Every adapter error collapses into one of four kinds. The worker retries
//! only [`PipelineError::Transient`]; the HTTP layer maps each kind to a
//! status code.

use thiserror::Error;

use admod_core::DomainError;
use admod_events::QueueError;
use admod_scoring::ScoringError;

use crate::cache::CacheError;
use crate::directory::DirectoryError;
use crate::result_store::StoreError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A referenced subject, principal or task does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Input rejected by validation or by the scoring model.
    #[error("validation error: {0}")]
    Validation(String),

    /// Infrastructure failure; the same operation may succeed later.
    #[error("transient error: {0}")]
    Transient(String),

    /// A queue payload that could not be decoded.
    #[error("unparseable message: {0}")]
    Unparseable(String),
}

impl PipelineError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<DomainError> for PipelineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(what) => PipelineError::not_found(what),
            other => PipelineError::Validation(other.to_string()),
        }
    }
}

impl From<ScoringError> for PipelineError {
    fn from(err: ScoringError) -> Self {
        PipelineError::Validation(err.to_string())
    }
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Deserialization(msg) => PipelineError::Unparseable(msg),
            other => PipelineError::Transient(other.to_string()),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

impl From<DirectoryError> for PipelineError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Invalid(msg) => PipelineError::Validation(msg),
            other => PipelineError::Transient(other.to_string()),
        }
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_failures_are_transient() {
        assert!(PipelineError::from(StoreError::Connection("down".into())).is_transient());
        assert!(PipelineError::from(QueueError::Connection("down".into())).is_transient());
        assert!(!PipelineError::from(ScoringError::InvalidInput("neg".into())).is_transient());
        assert!(!PipelineError::not_found("ad 9").is_transient());
        assert!(matches!(
            PipelineError::from(QueueError::Deserialization("eof".into())),
            PipelineError::Unparseable(_)
        ));
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(PipelineError::not_found("seller 5").to_string(), "seller 5 not found");
        assert_eq!(
            PipelineError::from(DomainError::not_found("ad 3")).to_string(),
            "ad 3 not found"
        );
    }
}
