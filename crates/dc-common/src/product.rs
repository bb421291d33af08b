//! Product definitions as stored in the catalog.

use serde_json::Value;

use crate::error::{DcError, DcResult};

/// A product definition loaded from the catalog.
#[derive(Debug, Clone)]
pub struct Product {
    pub name: String,
    pub metadata_type: String,
    /// Measurement names, including aliases.
    pub measurements: Vec<String>,
    /// The full definition document.
    pub definition: Value,
}

impl Product {
    /// Build a product from its definition document.
    pub fn from_definition(definition: Value) -> DcResult<Self> {
        let name = definition
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DcError::InvalidDocument("product definition has no name".to_string())
            })?
            .to_string();

        let metadata_type = definition
            .get("metadata_type")
            .and_then(Value::as_str)
            .unwrap_or("eo3")
            .to_string();

        let mut measurements = Vec::new();
        if let Some(entries) = definition.get("measurements").and_then(Value::as_array) {
            for entry in entries {
                if let Some(n) = entry.get("name").and_then(Value::as_str) {
                    measurements.push(n.to_string());
                }
                if let Some(aliases) = entry.get("aliases").and_then(Value::as_array) {
                    for alias in aliases.iter().filter_map(Value::as_str) {
                        measurements.push(alias.to_string());
                    }
                }
            }
        }

        Ok(Self {
            name,
            metadata_type,
            measurements,
            definition,
        })
    }

    /// Canonical (non-alias) measurement names.
    pub fn canonical_measurements(&self) -> Vec<&str> {
        self.definition
            .get("measurements")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_from_definition() {
        let definition = json!({
            "name": "ga_ls8c_ard_3",
            "metadata_type": "eo3",
            "measurements": [
                {"name": "nbart_red", "aliases": ["red"], "dtype": "int16"},
                {"name": "nbart_green", "dtype": "int16"}
            ]
        });

        let product = Product::from_definition(definition).unwrap();
        assert_eq!(product.name, "ga_ls8c_ard_3");
        assert_eq!(
            product.measurements,
            vec!["nbart_red", "red", "nbart_green"]
        );
        assert_eq!(
            product.canonical_measurements(),
            vec!["nbart_red", "nbart_green"]
        );
    }

    #[test]
    fn test_product_requires_name() {
        assert!(Product::from_definition(json!({"measurements": []})).is_err());
    }
}
