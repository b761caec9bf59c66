//! Infrastructure layer: storage, cache and broker adapters, the request-side
//! pipeline, and the moderation worker.

pub mod cache;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod result_store;
pub mod workers;


pub use config::{ConfigError, PipelineConfig};
pub use error::PipelineError;
