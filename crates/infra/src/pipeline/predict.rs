use std::sync::Arc;

use tracing::{debug, instrument, warn};

use admod_core::SubjectId;
use admod_scoring::{AdAttributes, ModerationModel, Prediction};

use crate::cache::PredictionCache;
use crate::directory::SubjectDirectory;
use crate::error::PipelineError;

/// Synchronous scoring, read-through the prediction cache.
pub struct PredictionService {
    directory: Arc<dyn SubjectDirectory>,
    cache: Arc<dyn PredictionCache>,
    model: ModerationModel,
}

impl PredictionService {
    pub fn new(
        directory: Arc<dyn SubjectDirectory>,
        cache: Arc<dyn PredictionCache>,
        model: ModerationModel,
    ) -> Self {
        Self {
            directory,
            cache,
            model,
        }
    }

    pub fn model(&self) -> &ModerationModel {
        &self.model
    }

    /// Score explicit attributes; no lookup, no caching.
    pub fn predict(&self, attrs: &AdAttributes) -> Result<Prediction, PipelineError> {
        Ok(self.model.predict(attrs)?)
    }

    /// Score a stored subject.
    ///
    /// A cache hit is returned as-is. On a miss the subject and its seller
    /// are resolved, scored, and the result cached. Cache errors count as a
    /// miss and never fail the call.
    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    pub async fn simple_predict(&self, subject_id: SubjectId) -> Result<Prediction, PipelineError> {
        match self.cache.get(subject_id).await {
            Ok(Some(hit)) => {
                debug!("prediction cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "cache read failed, scoring directly"),
        }

        let ad = self
            .directory
            .get_ad(subject_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("ad {subject_id}")))?;
        let seller = self
            .directory
            .get_seller(ad.seller_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("seller {}", ad.seller_id)))?;

        let prediction = self.predict(&AdAttributes::from_subject(&ad, &seller))?;
        self.remember(subject_id, &prediction).await;
        Ok(prediction)
    }

    /// Cache `prediction` unless the ad was closed while it was being scored.
    ///
    /// Close marks the ad before deleting the cache entry, so re-reading the
    /// ad after the write catches a close whose delete ran first.
    async fn remember(&self, subject_id: SubjectId, prediction: &Prediction) {
        if let Err(err) = self.cache.set(subject_id, prediction).await {
            warn!(error = %err, "cache write failed");
            return;
        }

        match self.directory.get_ad(subject_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("ad closed while scoring, evicting");
                if let Err(err) = self.cache.delete(subject_id).await {
                    warn!(error = %err, "cache delete failed; entry will expire");
                }
            }
            Err(err) => warn!(error = %err, "could not re-check ad after cache write"),
        }
    }
}
