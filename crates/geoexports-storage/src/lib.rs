//! # geoexports-storage
//!
//! Storage abstraction layer for geoexports.
//!
//! Two traits separate the export machinery from where data lives:
//!
//! - [`MetadataStore`] holds export definitions, their grants and the users
//!   asking for them.
//! - [`QueryBackend`] introspects an export relation and runs one filtered,
//!   ordered, optionally paginated read over it.
//!
//! Implementations live in separate crates (`geoexports-db-postgres`,
//! `geoexports-db-memory`).
//!
//! ```ignore
//! use geoexports_storage::{DatasetQuery, QueryBackend, StorageError};
//!
//! async fn count(backend: &dyn QueryBackend, descriptor: &DatasetDescriptor) -> Result<u64, StorageError> {
//!     let page = backend.query(&DatasetQuery::new(descriptor)).await?;
//!     Ok(page.total)
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::StorageError;
pub use traits::{DynMetadataStore, DynQueryBackend, MetadataStore, QueryBackend};
pub use types::{DatasetQuery, Pagination, QueryPage, SortOrder, SortSpec};

/// Prelude for storage implementations.
pub mod prelude {
    pub use crate::{
        DatasetQuery, MetadataStore, Pagination, QueryBackend, QueryPage, SortOrder, SortSpec,
        StorageError,
    };
    pub use async_trait::async_trait;
}
