//! `admod-scoring`
//!
//! **Responsibility:** the ML boundary of the moderation pipeline.
//!
//! This crate is intentionally storage-agnostic:
//! - It never reads ads or sellers itself; callers pass attributes in.
//! - It never persists results; it returns a [`Prediction`].

pub mod error;
pub mod features;
pub mod policy;
pub mod scorer;

pub use error::ScoringError;
pub use features::{AdAttributes, FeatureVector, prepare_features};
pub use policy::{DEFAULT_THRESHOLD, ModerationModel, ModerationPolicy, Prediction};
pub use scorer::{LogisticScorer, Scorer};
