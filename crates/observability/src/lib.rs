//! Process-wide tracing setup shared by the API and worker binaries.

pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
