use crate::error::ScoringError;
use crate::features::{FEATURE_COUNT, FeatureVector};

/// The opaque scoring seam: `score(features) -> probability`.
///
/// Implementations must be deterministic for a given feature vector so that a
/// redelivered task converges on the same terminal write, and must return a
/// value in `[0, 1]`.
pub trait Scorer: Send + Sync + 'static {
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError>;

    /// Model name reported in logs.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Logistic-regression scorer with fixed coefficients.
///
/// The default coefficients encode the listing heuristics the moderation team
/// started from: unverified sellers posting without photos are likely
/// violations, verified sellers with photos are not.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticScorer {
    weights: [f64; FEATURE_COUNT],
    bias: f64,
}

impl LogisticScorer {
    pub fn new(weights: [f64; FEATURE_COUNT], bias: f64) -> Self {
        Self { weights, bias }
    }
}

impl Default for LogisticScorer {
    fn default() -> Self {
        Self::new([-3.0, -2.5, -0.5, 0.1], 1.5)
    }
}

impl Scorer for LogisticScorer {
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let z = self
            .weights
            .iter()
            .zip(features.as_slice())
            .fold(self.bias, |acc, (w, x)| acc + w * x);

        if !z.is_finite() {
            return Err(ScoringError::InferenceFailed(format!(
                "non-finite logit {z}"
            )));
        }

        Ok(1.0 / (1.0 + (-z).exp()))
    }

    fn name(&self) -> &str {
        "logistic-v1"
    }
}
