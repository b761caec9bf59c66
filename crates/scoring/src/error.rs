use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// The subject attributes cannot be turned into a feature vector.
    #[error("invalid scoring input: {0}")]
    InvalidInput(String),

    /// The model failed to produce a probability.
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}
