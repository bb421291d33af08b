//! Common types shared across the datacube indexing tools.

pub mod document;
pub mod error;
pub mod product;

pub use document::{Dataset, DatasetDoc, GridDoc, MeasurementDoc, ProductRef};
pub use error::{DcError, DcResult};
pub use product::Product;
