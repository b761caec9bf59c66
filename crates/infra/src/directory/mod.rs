//! Subject directory: ads and their sellers.
//!
//! The pipeline only reads from the directory (plus `close_ad`); the create
//! operations exist so that demos and tests can seed data.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryDirectory;
pub use postgres::PostgresDirectory;

use async_trait::async_trait;
use thiserror::Error;

use admod_core::{Ad, NewAd, PrincipalId, Seller, SubjectId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("directory connection error: {0}")]
    Connection(String),

    #[error("directory query error: {0}")]
    Query(String),

    /// Rejected input, e.g. an ad referencing an unknown seller.
    #[error("{0}")]
    Invalid(String),
}

/// What [`SubjectDirectory::close_ad`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The ad was open and is now closed.
    Closed,
    /// The ad exists but an earlier call had closed it.
    AlreadyClosed,
    /// No ad with this id.
    Missing,
}

#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn create_seller(&self, is_verified_seller: bool) -> Result<Seller, DirectoryError>;

    async fn create_ad(&self, ad: NewAd) -> Result<Ad, DirectoryError>;

    /// Open ad by id; closed ads are reported as absent.
    async fn get_ad(&self, id: SubjectId) -> Result<Option<Ad>, DirectoryError>;

    async fn get_seller(&self, id: PrincipalId) -> Result<Option<Seller>, DirectoryError>;

    /// Close an ad. Closing an already closed ad is not an error.
    async fn close_ad(&self, id: SubjectId) -> Result<CloseOutcome, DirectoryError>;
}
