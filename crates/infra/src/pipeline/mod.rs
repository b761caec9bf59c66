//! Request-side pipeline operations.
//!
//! - [`TaskProducer`]: submit a subject for asynchronous scoring
//! - [`StatusQuery`]: read a task, warming the cache on completion
//! - [`PredictionService`]: synchronous, cache-first scoring
//! - [`SubjectCloser`]: close a subject and invalidate derived state
//!
//! [`ModerationService`] bundles the four over one set of backends.

mod invalidation;
mod predict;
mod producer;
mod status;

pub use invalidation::SubjectCloser;
pub use predict::PredictionService;
pub use producer::{SubmittedTask, TaskProducer};
pub use status::StatusQuery;

use std::sync::Arc;

use admod_events::Publisher;
use admod_scoring::ModerationModel;

use crate::cache::PredictionCache;
use crate::directory::SubjectDirectory;
use crate::result_store::ResultStore;

/// Backends shared by every pipeline operation.
#[derive(Clone)]
pub struct Backends {
    pub directory: Arc<dyn SubjectDirectory>,
    pub results: Arc<dyn ResultStore>,
    pub cache: Arc<dyn PredictionCache>,
}

pub struct ModerationService {
    pub producer: TaskProducer,
    pub status: StatusQuery,
    pub predictions: PredictionService,
    pub closer: SubjectCloser,
    pub directory: Arc<dyn SubjectDirectory>,
}

impl ModerationService {
    pub fn new(
        backends: Backends,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
        model: ModerationModel,
    ) -> Self {
        let Backends {
            directory,
            results,
            cache,
        } = backends;

        Self {
            producer: TaskProducer::new(
                Arc::clone(&directory),
                Arc::clone(&results),
                publisher,
                topic,
            ),
            status: StatusQuery::new(Arc::clone(&results), Arc::clone(&cache)),
            predictions: PredictionService::new(Arc::clone(&directory), Arc::clone(&cache), model),
            closer: SubjectCloser::new(Arc::clone(&directory), results, cache),
            directory,
        }
    }
}
