//! Document-to-dataset resolution.
//!
//! Turns a raw metadata document plus its URI into a [`Dataset`] ready for
//! indexing: matches the document to a known product, checks that the
//! product's measurements are all present, and resolves lineage against
//! the catalog.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use dc_common::{Dataset, DatasetDoc, DcError, DcResult, Product};

use crate::catalog::Catalog;

/// Options controlling resolution behaviour.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Candidate product names. Empty means any known product.
    pub products: Vec<String>,
    /// Skip lineage handling entirely.
    pub skip_lineage: bool,
    /// Fail when a lineage source is not already indexed. When false,
    /// missing parents are tolerated and logged.
    pub fail_on_missing_lineage: bool,
    /// Additionally verify that indexed parents are still active.
    pub verify_lineage: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            products: Vec::new(),
            skip_lineage: false,
            fail_on_missing_lineage: true,
            verify_lineage: false,
        }
    }
}

/// Resolves raw documents into indexable datasets.
pub struct DatasetResolver<'a> {
    catalog: &'a Catalog,
    options: ResolverOptions,
    known: HashMap<String, Product>,
}

impl<'a> DatasetResolver<'a> {
    /// Create a resolver, loading product definitions from the catalog.
    pub async fn new(catalog: &'a Catalog, options: ResolverOptions) -> DcResult<Self> {
        let mut known = HashMap::new();

        if options.products.is_empty() {
            for product in catalog.list_products().await? {
                known.insert(product.name.clone(), product);
            }
        } else {
            for name in &options.products {
                let product = catalog
                    .get_product(name)
                    .await?
                    .ok_or_else(|| DcError::ProductNotFound(name.clone()))?;
                known.insert(product.name.clone(), product);
            }
        }

        Ok(Self {
            catalog,
            options,
            known,
        })
    }

    /// Resolve a raw document and its URI into a dataset.
    pub async fn resolve(&self, raw: &Value, uri: &str) -> DcResult<Dataset> {
        let doc = DatasetDoc::from_json(raw)?;

        let product = match_product(&doc, &self.known)?;
        check_measurements(product, &doc)?;

        let mut sources = Vec::new();
        if !self.options.skip_lineage {
            for source_id in doc.source_ids() {
                let indexed = if self.options.verify_lineage {
                    match self.catalog.get_dataset(source_id).await? {
                        Some(parent) if !parent.is_active() => {
                            return Err(DcError::InvalidDocument(format!(
                                "lineage source {} is archived",
                                source_id
                            )));
                        }
                        parent => parent.is_some(),
                    }
                } else {
                    self.catalog.has_dataset(source_id).await?
                };

                if !indexed {
                    if self.options.fail_on_missing_lineage {
                        return Err(DcError::MissingLineage(source_id));
                    }
                    warn!(source = %source_id, dataset = %doc.id, "Lineage source not indexed, continuing");
                }
                sources.push(source_id);
            }
        }

        Ok(Dataset {
            id: doc.id,
            product_name: product.name.clone(),
            doc,
            raw: raw.clone(),
            uri: uri.to_string(),
            sources,
        })
    }
}

/// Match a document to one of the known products by name.
pub fn match_product<'p>(
    doc: &DatasetDoc,
    known: &'p HashMap<String, Product>,
) -> DcResult<&'p Product> {
    known
        .get(&doc.product.name)
        .ok_or_else(|| DcError::ProductNotFound(doc.product.name.clone()))
}

/// Check that every canonical product measurement is present in the document.
///
/// The document may carry extra measurements; the product's are mandatory.
pub fn check_measurements(product: &Product, doc: &DatasetDoc) -> DcResult<()> {
    for name in product.canonical_measurements() {
        if !doc.measurements.contains_key(name) {
            return Err(DcError::InvalidDocument(format!(
                "document for product '{}' is missing measurement '{}'",
                product.name, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(name: &str, measurements: &[&str]) -> Product {
        let entries: Vec<Value> = measurements
            .iter()
            .map(|m| json!({"name": m}))
            .collect();
        Product::from_definition(json!({
            "name": name,
            "metadata_type": "eo3",
            "measurements": entries,
        }))
        .unwrap()
    }

    fn doc(product_name: &str, measurements: &[&str]) -> DatasetDoc {
        let mut m = serde_json::Map::new();
        for name in measurements {
            m.insert(name.to_string(), json!({"path": format!("{}.tif", name)}));
        }
        DatasetDoc::from_json(&json!({
            "id": "7d41a4d0-2ab3-4da1-a010-ef48662ae8ef",
            "product": {"name": product_name},
            "crs": "EPSG:32656",
            "measurements": m,
        }))
        .unwrap()
    }

    #[test]
    fn test_match_product_by_name() {
        let mut known = HashMap::new();
        known.insert("ls8".to_string(), product("ls8", &["red"]));

        let matched = match_product(&doc("ls8", &["red"]), &known).unwrap();
        assert_eq!(matched.name, "ls8");
    }

    #[test]
    fn test_unknown_product_is_rejected() {
        let known = HashMap::new();
        let err = match_product(&doc("ls8", &["red"]), &known).unwrap_err();
        assert!(matches!(err, DcError::ProductNotFound(_)));
    }

    #[test]
    fn test_missing_measurement_is_rejected() {
        let p = product("ls8", &["red", "green"]);
        let err = check_measurements(&p, &doc("ls8", &["red"])).unwrap_err();
        assert!(matches!(err, DcError::InvalidDocument(_)));
    }

    #[test]
    fn test_extra_measurements_are_allowed() {
        let p = product("ls8", &["red"]);
        assert!(check_measurements(&p, &doc("ls8", &["red", "green"])).is_ok());
    }
}
