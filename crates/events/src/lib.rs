//! Task queue messages and broker mechanics.
//!
//! The broker abstraction lives here as pure mechanics; infrastructure-backed
//! implementations (Redis Streams) live in `admod-infra`.

pub mod in_memory;
pub mod message;
pub mod queue;

pub use in_memory::InMemoryBroker;
pub use message::{DlqMessage, QueueMessage};
pub use queue::{Consumer, Delivery, Publisher, PublisherExt, QueueError, TaskQueue, partition_for};
