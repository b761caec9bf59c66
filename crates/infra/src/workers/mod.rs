//! Background workers.

pub mod moderation_worker;
pub mod retry;

pub use moderation_worker::{
    HandleOutcome, ModerationWorker, WorkerHandle, WorkerSettings, WorkerStats,
};
pub use retry::RetryPolicy;
