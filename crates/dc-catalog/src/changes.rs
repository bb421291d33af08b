//! Change detection between stored and incoming dataset documents.
//!
//! Updates are refused when they would alter fields the catalog treats as
//! load-bearing (footprint, grids, measurements, lineage, identity) unless
//! the caller explicitly allows unsafe changes.

use serde_json::Value;

/// A single difference between two documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Key path from the document root, e.g. ["properties", "datetime"].
    pub path: Vec<String>,
    /// Value in the stored document; None for additions.
    pub old: Option<Value>,
    /// Value in the incoming document; None for removals.
    pub new: Option<Value>,
}

impl Change {
    /// Dotted rendering of the path, for error messages.
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }

    /// Whether this change may be applied without --allow-unsafe.
    ///
    /// Additions are safe anywhere except identity fields. Modifications
    /// and removals are only safe for labels and storage locations.
    pub fn is_safe(&self) -> bool {
        let root = self.path.first().map(String::as_str).unwrap_or("");

        if matches!(root, "id" | "product") {
            return false;
        }

        if self.old.is_none() {
            // Pure addition.
            return true;
        }

        matches!(root, "label" | "location" | "$schema")
    }
}

/// Compute all differences between two documents.
///
/// Objects are compared key by key; arrays and scalars atomically.
pub fn doc_changes(old: &Value, new: &Value) -> Vec<Change> {
    let mut out = Vec::new();
    collect(&mut Vec::new(), Some(old), Some(new), &mut out);
    out
}

/// The subset of differences that require --allow-unsafe.
pub fn unsafe_changes(old: &Value, new: &Value) -> Vec<Change> {
    doc_changes(old, new)
        .into_iter()
        .filter(|c| !c.is_safe())
        .collect()
}

fn collect(
    path: &mut Vec<String>,
    old: Option<&Value>,
    new: Option<&Value>,
    out: &mut Vec<Change>,
) {
    match (old, new) {
        (Some(Value::Object(old_map)), Some(Value::Object(new_map))) => {
            for (key, old_value) in old_map {
                path.push(key.clone());
                collect(path, Some(old_value), new_map.get(key), out);
                path.pop();
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    path.push(key.clone());
                    collect(path, None, Some(new_value), out);
                    path.pop();
                }
            }
        }
        (Some(o), Some(n)) => {
            if o != n {
                out.push(Change {
                    path: path.clone(),
                    old: Some(o.clone()),
                    new: Some(n.clone()),
                });
            }
        }
        (Some(o), None) => out.push(Change {
            path: path.clone(),
            old: Some(o.clone()),
            new: None,
        }),
        (None, Some(n)) => out.push(Change {
            path: path.clone(),
            old: None,
            new: Some(n.clone()),
        }),
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored() -> Value {
        json!({
            "id": "7d41a4d0-2ab3-4da1-a010-ef48662ae8ef",
            "product": {"name": "ga_ls8c_ard_3"},
            "label": "old-label",
            "crs": "EPSG:32656",
            "properties": {"datetime": "2020-05-25T23:35:47Z"},
            "measurements": {"nbart_red": {"path": "band04.tif"}}
        })
    }

    #[test]
    fn test_identical_documents_have_no_changes() {
        assert!(doc_changes(&stored(), &stored()).is_empty());
    }

    #[test]
    fn test_label_change_is_safe() {
        let mut new = stored();
        new["label"] = json!("new-label");
        let changes = doc_changes(&stored(), &new);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_safe());
        assert!(unsafe_changes(&stored(), &new).is_empty());
    }

    #[test]
    fn test_property_addition_is_safe() {
        let mut new = stored();
        new["properties"]["eo:cloud_cover"] = json!(12.5);
        let changes = doc_changes(&stored(), &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0].path,
            vec!["properties".to_string(), "eo:cloud_cover".to_string()]
        );
        assert!(changes[0].is_safe());
    }

    #[test]
    fn test_measurement_path_change_is_unsafe() {
        let mut new = stored();
        new["measurements"]["nbart_red"]["path"] = json!("other.tif");
        let found = unsafe_changes(&stored(), &new);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dotted_path(), "measurements.nbart_red.path");
    }

    #[test]
    fn test_property_removal_is_unsafe() {
        let mut new = stored();
        new["properties"]
            .as_object_mut()
            .unwrap()
            .remove("datetime");
        let found = unsafe_changes(&stored(), &new);
        assert_eq!(found.len(), 1);
        assert!(found[0].new.is_none());
    }

    #[test]
    fn test_product_rename_is_unsafe() {
        let mut new = stored();
        new["product"]["name"] = json!("other_product");
        assert_eq!(unsafe_changes(&stored(), &new).len(), 1);
    }

    #[test]
    fn test_crs_change_is_unsafe() {
        let mut new = stored();
        new["crs"] = json!("EPSG:4326");
        assert_eq!(unsafe_changes(&stored(), &new).len(), 1);
    }
}
