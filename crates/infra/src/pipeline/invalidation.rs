use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use admod_core::SubjectId;

use crate::cache::PredictionCache;
use crate::directory::{CloseOutcome, SubjectDirectory};
use crate::error::PipelineError;
use crate::result_store::ResultStore;

/// Closes a subject and removes everything derived from it.
pub struct SubjectCloser {
    directory: Arc<dyn SubjectDirectory>,
    results: Arc<dyn ResultStore>,
    cache: Arc<dyn PredictionCache>,
}

impl SubjectCloser {
    pub fn new(
        directory: Arc<dyn SubjectDirectory>,
        results: Arc<dyn ResultStore>,
        cache: Arc<dyn PredictionCache>,
    ) -> Self {
        Self {
            directory,
            results,
            cache,
        }
    }

    /// Close the ad, then delete its tasks, then its cached prediction.
    ///
    /// Safe to call again after a partial failure: an ad that is already
    /// closed still has its tasks and cache entry removed. A cache failure
    /// is logged only: the stale entry expires with its TTL and closed ads
    /// are no longer resolvable for a fresh score.
    #[instrument(skip(self), fields(subject_id = %subject_id), err)]
    pub async fn close(&self, subject_id: SubjectId) -> Result<(), PipelineError> {
        match self.directory.close_ad(subject_id).await? {
            CloseOutcome::Missing => {
                return Err(PipelineError::not_found(format!("ad {subject_id}")));
            }
            CloseOutcome::AlreadyClosed => debug!("ad already closed, repeating cleanup"),
            CloseOutcome::Closed => {}
        }

        let removed = self.results.delete_by_subject(subject_id).await?;

        if let Err(err) = self.cache.delete(subject_id).await {
            warn!(error = %err, "cache delete failed; entry will expire");
        }

        info!(removed_tasks = removed, "subject closed");
        Ok(())
    }
}
