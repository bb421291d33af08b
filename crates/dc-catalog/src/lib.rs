//! PostgreSQL-backed datacube catalog.
//!
//! Provides:
//! - the catalog index itself (add/update/archive datasets, product lookup)
//! - change classification for update safety checks
//! - the document-to-dataset resolver (product matching, lineage checks)

pub mod catalog;
pub mod changes;
pub mod resolver;

pub use catalog::{Catalog, StoredDataset};
pub use changes::{doc_changes, unsafe_changes, Change};
pub use resolver::{DatasetResolver, ResolverOptions};
