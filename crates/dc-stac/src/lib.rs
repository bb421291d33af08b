//! STAC support: item-to-EO3 transformation and a minimal search client.

pub mod search;
pub mod transform;

pub use search::{SearchParams, StacSearch};
pub use transform::{guess_location, stac_to_eo3, stac_to_eo3_absolute};
