//! EO3 dataset document model.
//!
//! A dataset document describes a single remote sensing product instance:
//! its footprint, the grids its bands are stored on, and the measurement
//! files themselves. Documents arrive as JSON (SQS/STAC) or YAML
//! (`*.odc-metadata.yaml`) and are stored verbatim in the catalog.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{DcError, DcResult};

/// Reference to the product a dataset belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRef {
    pub name: String,
}

/// Grid geometry for one or more measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridDoc {
    /// Raster shape as (rows, columns).
    pub shape: Vec<usize>,
    /// Affine transform, 6 or 9 elements (row-major).
    pub transform: Vec<f64>,
}

/// A single measurement (band) within a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementDoc {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    /// Grid name; measurements without one use the "default" grid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
}

/// An EO3 dataset document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDoc {
    #[serde(
        rename = "$schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub schema: Option<String>,

    pub id: Uuid,

    pub product: ProductRef,

    pub crs: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,

    #[serde(default)]
    pub grids: BTreeMap<String, GridDoc>,

    #[serde(default)]
    pub measurements: BTreeMap<String, MeasurementDoc>,

    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Source datasets keyed by classifier, e.g. {"ard": [uuid, ...]}.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lineage: BTreeMap<String, Vec<Uuid>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl DatasetDoc {
    /// Parse and validate a dataset document from raw JSON.
    pub fn from_json(value: &Value) -> DcResult<Self> {
        let doc: DatasetDoc = serde_json::from_value(value.clone())?;
        doc.validate()?;
        Ok(doc)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> DcResult<()> {
        if self.id.is_nil() {
            return Err(DcError::InvalidDocument("dataset id is nil".to_string()));
        }

        if self.product.name.is_empty() {
            return Err(DcError::InvalidDocument(
                "product name is empty".to_string(),
            ));
        }

        for (name, grid) in &self.grids {
            if grid.shape.len() != 2 {
                return Err(DcError::InvalidDocument(format!(
                    "grid '{}' shape must have 2 elements, got {}",
                    name,
                    grid.shape.len()
                )));
            }
            if grid.transform.len() != 6 && grid.transform.len() != 9 {
                return Err(DcError::InvalidDocument(format!(
                    "grid '{}' transform must have 6 or 9 elements, got {}",
                    name,
                    grid.transform.len()
                )));
            }
        }

        for (name, measurement) in &self.measurements {
            let grid = measurement.grid.as_deref().unwrap_or("default");
            if !self.grids.is_empty() && !self.grids.contains_key(grid) {
                return Err(DcError::InvalidDocument(format!(
                    "measurement '{}' references unknown grid '{}'",
                    name, grid
                )));
            }
        }

        Ok(())
    }

    /// Names of all measurements in the document.
    pub fn measurement_names(&self) -> Vec<&str> {
        self.measurements.keys().map(|k| k.as_str()).collect()
    }

    /// All source dataset ids, flattened across classifiers.
    pub fn source_ids(&self) -> Vec<Uuid> {
        self.lineage.values().flatten().copied().collect()
    }
}

/// A resolved dataset, ready to be indexed.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: Uuid,
    pub product_name: String,
    pub doc: DatasetDoc,
    /// The document exactly as it will be stored.
    pub raw: Value,
    pub uri: String,
    pub sources: Vec<Uuid>,
}
