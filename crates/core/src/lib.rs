//! `admod-core`: domain building blocks for the moderation pipeline.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod subject;
pub mod task;

pub use error::{DomainError, DomainResult};
pub use id::{PrincipalId, SubjectId, TaskId};
pub use subject::{Ad, NewAd, Seller};
pub use task::{ModerationTask, TaskOutcome, TaskStatus};
