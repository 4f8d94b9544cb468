//! In-memory storage backend for geoexports.
//!
//! Implements [`MetadataStore`] and [`QueryBackend`] over `dashmap` tables,
//! evaluating filter clauses directly on JSON rows. Used by tests and local
//! demos; semantics follow the PostgreSQL backend.
//!
//! ```ignore
//! use geoexports_db_memory::{InMemoryDatasets, InMemoryMetadataStore};
//!
//! let store = InMemoryMetadataStore::new();
//! store.insert_export(ExportDefinition::new(1, "Obs", "gn_exports", "v_obs").with_public(true))?;
//!
//! let datasets = InMemoryDatasets::new();
//! datasets.insert_relation("gn_exports", "v_obs", columns, rows);
//! ```

mod datasets;
mod eval;
mod metadata;

pub use datasets::InMemoryDatasets;
pub use geoexports_storage::{MetadataStore, QueryBackend, StorageError};
pub use metadata::InMemoryMetadataStore;
