//! Feature extraction from subject + principal attributes.

use serde::{Deserialize, Serialize};

use admod_core::{Ad, Seller};

use crate::error::ScoringError;

/// Number of features produced by [`prepare_features`].
pub const FEATURE_COUNT: usize = 4;

/// Raw attributes a prediction is computed from.
///
/// This is the flattened view of an ad plus its seller's trust attributes, so
/// callers that already hold a full payload (e.g. `POST /predict`) can score
/// without a directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdAttributes {
    pub is_verified_seller: bool,
    pub images_qty: i32,
    pub description: String,
    pub category: i32,
}

impl AdAttributes {
    pub fn from_subject(ad: &Ad, seller: &Seller) -> Self {
        Self {
            is_verified_seller: seller.is_verified_seller,
            images_qty: ad.images_qty,
            description: ad.description.clone(),
            category: ad.category,
        }
    }
}

/// Normalized feature vector:
/// `[is_verified, images_qty_norm, description_len_norm, category_norm]`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Build the normalized feature vector.
///
/// - image count is capped at 10 and scaled to `[0, 1]`
/// - description length is measured in characters, scaled by 1000
/// - category is scaled by 100
pub fn prepare_features(attrs: &AdAttributes) -> Result<FeatureVector, ScoringError> {
    if attrs.images_qty < 0 {
        return Err(ScoringError::InvalidInput(
            "images_qty must not be negative".to_string(),
        ));
    }
    if attrs.category < 0 {
        return Err(ScoringError::InvalidInput(
            "category must not be negative".to_string(),
        ));
    }

    let is_verified = if attrs.is_verified_seller { 1.0 } else { 0.0 };
    let images_qty_norm = f64::from(attrs.images_qty.min(10)) / 10.0;
    let description_len_norm = attrs.description.chars().count() as f64 / 1000.0;
    let category_norm = f64::from(attrs.category) / 100.0;

    Ok(FeatureVector([
        is_verified,
        images_qty_norm,
        description_len_norm,
        category_norm,
    ]))
}
