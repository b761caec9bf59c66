use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;
use crate::features::{AdAttributes, prepare_features};
use crate::scorer::Scorer;

/// Default violation threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// A scored prediction for one subject.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub is_violation: bool,
    pub probability: f64,
}

/// Decision policy applied on top of a probability.
///
/// `is_violation = probability > threshold` (strict: a probability equal to
/// the threshold is not a violation).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ModerationPolicy {
    threshold: f64,
}

impl ModerationPolicy {
    pub fn new(threshold: f64) -> Result<Self, ScoringError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ScoringError::InvalidInput(format!(
                "threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_violation(&self, probability: f64) -> bool {
        probability > self.threshold
    }
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Scorer + policy: the full `attributes -> prediction` step.
#[derive(Clone)]
pub struct ModerationModel {
    scorer: Arc<dyn Scorer>,
    policy: ModerationPolicy,
}

impl core::fmt::Debug for ModerationModel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModerationModel")
            .field("scorer", &self.scorer.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ModerationModel {
    pub fn new(scorer: Arc<dyn Scorer>, policy: ModerationPolicy) -> Self {
        Self { scorer, policy }
    }

    pub fn policy(&self) -> ModerationPolicy {
        self.policy
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub fn predict(&self, attrs: &AdAttributes) -> Result<Prediction, ScoringError> {
        let features = prepare_features(attrs)?;
        let probability = self.scorer.score(&features)?;

        if !(0.0..=1.0).contains(&probability) {
            return Err(ScoringError::InferenceFailed(format!(
                "scorer {} returned {probability}, outside [0, 1]",
                self.scorer.name()
            )));
        }

        Ok(Prediction {
            is_violation: self.policy.is_violation(probability),
            probability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use proptest::prelude::*;

    struct Fixed(f64);

    impl Scorer for Fixed {
        fn score(&self, _features: &FeatureVector) -> Result<f64, ScoringError> {
            Ok(self.0)
        }
    }

    fn attrs() -> AdAttributes {
        AdAttributes {
            is_verified_seller: false,
            images_qty: 0,
            description: "desc".to_string(),
            category: 1,
        }
    }

    #[test]
    fn threshold_boundary_is_not_a_violation() {
        let policy = ModerationPolicy::default();
        assert!(!policy.is_violation(0.5));
        assert!(policy.is_violation(0.5000001));
    }

    #[test]
    fn rejects_threshold_outside_unit_interval() {
        assert!(ModerationPolicy::new(1.2).is_err());
        assert!(ModerationPolicy::new(-0.1).is_err());
        assert!(ModerationPolicy::new(0.7).is_ok());
    }

    #[test]
    fn model_applies_policy_to_scorer_output() {
        let model = ModerationModel::new(Arc::new(Fixed(0.9)), ModerationPolicy::default());
        let p = model.predict(&attrs()).unwrap();
        assert!(p.is_violation);
        assert_eq!(p.probability, 0.9);

        let model = ModerationModel::new(Arc::new(Fixed(0.1)), ModerationPolicy::default());
        assert!(!model.predict(&attrs()).unwrap().is_violation);
    }

    #[test]
    fn model_rejects_out_of_range_scores() {
        let model = ModerationModel::new(Arc::new(Fixed(1.7)), ModerationPolicy::default());
        assert!(matches!(
            model.predict(&attrs()),
            Err(ScoringError::InferenceFailed(_))
        ));
    }

    #[test]
    fn model_propagates_feature_errors() {
        let model = ModerationModel::new(Arc::new(Fixed(0.9)), ModerationPolicy::default());
        let mut bad = attrs();
        bad.images_qty = -1;
        assert!(matches!(model.predict(&bad), Err(ScoringError::InvalidInput(_))));
    }

    proptest! {
        /// For every probability: violation iff strictly above the threshold.
        #[test]
        fn violation_iff_strictly_above_threshold(p in 0.0f64..=1.0, t in 0.0f64..=1.0) {
            let policy = ModerationPolicy::new(t).unwrap();
            prop_assert_eq!(policy.is_violation(p), p > t);
        }
    }
}
