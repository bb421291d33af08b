//! STAC item to EO3 dataset document transformation.
//!
//! STAC items carry projection information in `proj:*` fields, either on
//! the item properties or per asset. Raster assets become measurements;
//! distinct (shape, transform) pairs become grids, with the most common
//! pair named "default".

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use dc_common::{DatasetDoc, DcError, DcResult, GridDoc, MeasurementDoc, ProductRef};

/// Media types treated as raster measurements.
fn is_raster_asset(asset: &Value) -> bool {
    asset
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t.starts_with("image/tiff"))
        .unwrap_or(false)
}

/// Transform a STAC item into an EO3 document with relative asset paths.
///
/// Use when the metadata document and the data files share a directory.
pub fn stac_to_eo3(item: &Value) -> DcResult<DatasetDoc> {
    transform(item, false)
}

/// Transform a STAC item into an EO3 document keeping absolute asset hrefs.
pub fn stac_to_eo3_absolute(item: &Value) -> DcResult<DatasetDoc> {
    transform(item, true)
}

fn transform(item: &Value, absolute: bool) -> DcResult<DatasetDoc> {
    let id_str = item
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| DcError::TransformError("item has no id".to_string()))?;

    // Non-UUID ids map deterministically so re-indexing is idempotent.
    let id = Uuid::parse_str(id_str)
        .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_URL, id_str.as_bytes()));

    let properties = item
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let product_name = properties
        .get("odc:product")
        .and_then(Value::as_str)
        .or_else(|| item.get("collection").and_then(Value::as_str))
        .ok_or_else(|| {
            DcError::TransformError("item has neither odc:product nor collection".to_string())
        })?
        .to_string();

    let item_proj = ProjFields::from_map(&properties);

    let assets = item
        .get("assets")
        .and_then(Value::as_object)
        .ok_or_else(|| DcError::TransformError("item has no assets".to_string()))?;

    // Group raster assets by their (shape, transform) pair.
    let mut groups: Vec<(GridDoc, Vec<(String, String)>)> = Vec::new();
    let mut epsg = item_proj.epsg;

    for (name, asset) in assets {
        if !is_raster_asset(asset) {
            continue;
        }

        let href = asset.get("href").and_then(Value::as_str).ok_or_else(|| {
            DcError::TransformError(format!("asset '{}' has no href", name))
        })?;

        let asset_proj = asset
            .as_object()
            .map(ProjFields::from_map)
            .unwrap_or_default()
            .or(&item_proj);

        let shape = asset_proj.shape.ok_or_else(|| {
            DcError::TransformError(format!("asset '{}' has no proj:shape", name))
        })?;
        let affine = asset_proj.transform.ok_or_else(|| {
            DcError::TransformError(format!("asset '{}' has no proj:transform", name))
        })?;
        if epsg.is_none() {
            epsg = asset_proj.epsg;
        }

        let path = if absolute {
            href.to_string()
        } else {
            file_name(href).to_string()
        };

        let grid = GridDoc {
            shape,
            transform: affine,
        };

        match groups
            .iter_mut()
            .find(|(g, _)| g.shape == grid.shape && g.transform == grid.transform)
        {
            Some((_, members)) => members.push((name.clone(), path)),
            None => groups.push((grid, vec![(name.clone(), path)])),
        }
    }

    if groups.is_empty() {
        return Err(DcError::TransformError(
            "item has no raster assets".to_string(),
        ));
    }

    let epsg = epsg.ok_or_else(|| {
        DcError::TransformError("item has no proj:epsg anywhere".to_string())
    })?;

    // Largest group becomes the default grid; others are named after
    // their first measurement.
    groups.sort_by_key(|(_, members)| std::cmp::Reverse(members.len()));

    let mut grids = BTreeMap::new();
    let mut measurements = BTreeMap::new();

    for (index, (grid, members)) in groups.into_iter().enumerate() {
        let grid_name = if index == 0 {
            "default".to_string()
        } else {
            members[0].0.clone()
        };

        for (name, path) in members {
            measurements.insert(
                name,
                MeasurementDoc {
                    path,
                    band: None,
                    layer: None,
                    grid: if grid_name == "default" {
                        None
                    } else {
                        Some(grid_name.clone())
                    },
                },
            );
        }
        grids.insert(grid_name, grid);
    }

    let mut properties_out: Map<String, Value> = properties;
    if !properties_out.contains_key("odc:processing_datetime") {
        if let Some(datetime) = properties_out.get("datetime").cloned() {
            properties_out.insert("odc:processing_datetime".to_string(), datetime);
        }
    }

    let doc = DatasetDoc {
        schema: Some("https://schemas.opendatacube.org/dataset".to_string()),
        id,
        product: ProductRef { name: product_name },
        crs: format!("EPSG:{}", epsg),
        label: Some(id_str.to_string()),
        geometry: item.get("geometry").filter(|g| !g.is_null()).cloned(),
        grids,
        measurements,
        properties: properties_out,
        lineage: BTreeMap::new(),
        location: None,
    };

    doc.validate()?;
    Ok(doc)
}

/// Locate a STAC item's document URI and decide relative/absolute paths.
///
/// Returns (self href, relative?). Paths are kept relative only when the
/// metadata document and the raster assets live in the same directory.
pub fn guess_location(item: &Value) -> DcResult<(String, bool)> {
    let self_href = item
        .get("links")
        .and_then(Value::as_array)
        .and_then(|links| {
            links.iter().find_map(|link| {
                (link.get("rel").and_then(Value::as_str) == Some("self"))
                    .then(|| link.get("href").and_then(Value::as_str))
                    .flatten()
            })
        })
        .ok_or(DcError::MissingUri)?;

    let asset_dir = item
        .get("assets")
        .and_then(Value::as_object)
        .and_then(|assets| {
            assets
                .values()
                .filter(|a| is_raster_asset(a))
                .find_map(|a| a.get("href").and_then(Value::as_str))
        })
        .map(dir_name);

    let relative = match asset_dir {
        Some(dir) => dir_name(self_href) == dir,
        None => true,
    };

    Ok((self_href.to_string(), relative))
}

/// Per-item or per-asset projection fields.
#[derive(Debug, Default, Clone)]
struct ProjFields {
    epsg: Option<i64>,
    shape: Option<Vec<usize>>,
    transform: Option<Vec<f64>>,
}

impl ProjFields {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            epsg: map.get("proj:epsg").and_then(Value::as_i64),
            shape: map.get("proj:shape").and_then(|v| {
                v.as_array()?
                    .iter()
                    .map(|n| n.as_u64().map(|n| n as usize))
                    .collect()
            }),
            transform: map.get("proj:transform").and_then(|v| {
                v.as_array()?.iter().map(Value::as_f64).collect()
            }),
        }
    }

    /// Fill missing fields from item-level values.
    fn or(mut self, fallback: &ProjFields) -> Self {
        self.epsg = self.epsg.or(fallback.epsg);
        self.shape = self.shape.or_else(|| fallback.shape.clone());
        self.transform = self.transform.or_else(|| fallback.transform.clone());
        self
    }
}

fn file_name(href: &str) -> &str {
    href.rsplit('/').next().unwrap_or(href)
}

fn dir_name(href: &str) -> &str {
    match href.rfind('/') {
        Some(pos) => &href[..pos],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_item() -> Value {
        json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": "S2B_56JKT_20200525_0_L2A",
            "collection": "sentinel-s2-l2a-cogs",
            "geometry": {"type": "Polygon", "coordinates": [[[150.0, -34.0], [151.0, -34.0], [151.0, -33.0], [150.0, -34.0]]]},
            "properties": {
                "datetime": "2020-05-25T23:35:47Z",
                "proj:epsg": 32756
            },
            "assets": {
                "B04": {
                    "href": "https://example.com/data/56/J/KT/B04.tif",
                    "type": "image/tiff; application=geotiff; profile=cloud-optimized",
                    "proj:shape": [10980, 10980],
                    "proj:transform": [10.0, 0.0, 399960.0, 0.0, -10.0, 6300040.0]
                },
                "B05": {
                    "href": "https://example.com/data/56/J/KT/B05.tif",
                    "type": "image/tiff; application=geotiff; profile=cloud-optimized",
                    "proj:shape": [5490, 5490],
                    "proj:transform": [20.0, 0.0, 399960.0, 0.0, -20.0, 6300040.0]
                },
                "B08": {
                    "href": "https://example.com/data/56/J/KT/B08.tif",
                    "type": "image/tiff; application=geotiff; profile=cloud-optimized",
                    "proj:shape": [10980, 10980],
                    "proj:transform": [10.0, 0.0, 399960.0, 0.0, -10.0, 6300040.0]
                },
                "thumbnail": {
                    "href": "https://example.com/data/56/J/KT/preview.jpg",
                    "type": "image/jpeg"
                }
            },
            "links": [
                {"rel": "self", "href": "https://example.com/data/56/J/KT/item.json"},
                {"rel": "collection", "href": "https://example.com/collections/sentinel-s2-l2a-cogs"}
            ]
        })
    }

    #[test]
    fn test_transform_basic_fields() {
        let doc = stac_to_eo3(&sample_item()).unwrap();
        assert_eq!(doc.product.name, "sentinel-s2-l2a-cogs");
        assert_eq!(doc.crs, "EPSG:32756");
        assert_eq!(doc.label.as_deref(), Some("S2B_56JKT_20200525_0_L2A"));
        assert!(doc.geometry.is_some());
        assert!(doc.lineage.is_empty());
    }

    #[test]
    fn test_non_uuid_id_is_deterministic() {
        let a = stac_to_eo3(&sample_item()).unwrap();
        let b = stac_to_eo3(&sample_item()).unwrap();
        assert_eq!(a.id, b.id);
        assert!(!a.id.is_nil());
    }

    #[test]
    fn test_grids_grouped_by_resolution() {
        let doc = stac_to_eo3(&sample_item()).unwrap();
        // Two 10m bands share the default grid; the 20m band gets its own.
        assert_eq!(doc.grids.len(), 2);
        assert_eq!(doc.grids["default"].shape, vec![10980, 10980]);
        assert!(doc.measurements["B04"].grid.is_none());
        assert_eq!(doc.measurements["B05"].grid.as_deref(), Some("B05"));
    }

    #[test]
    fn test_non_raster_assets_are_skipped() {
        let doc = stac_to_eo3(&sample_item()).unwrap();
        assert!(!doc.measurements.contains_key("thumbnail"));
        assert_eq!(doc.measurements.len(), 3);
    }

    #[test]
    fn test_relative_paths_keep_file_name_only() {
        let doc = stac_to_eo3(&sample_item()).unwrap();
        assert_eq!(doc.measurements["B04"].path, "B04.tif");
    }

    #[test]
    fn test_absolute_paths_keep_full_href() {
        let doc = stac_to_eo3_absolute(&sample_item()).unwrap();
        assert_eq!(
            doc.measurements["B04"].path,
            "https://example.com/data/56/J/KT/B04.tif"
        );
    }

    #[test]
    fn test_processing_datetime_defaults_to_datetime() {
        let doc = stac_to_eo3(&sample_item()).unwrap();
        assert_eq!(
            doc.properties["odc:processing_datetime"],
            json!("2020-05-25T23:35:47Z")
        );
    }

    #[test]
    fn test_missing_projection_fails_item() {
        let mut item = sample_item();
        item["properties"]
            .as_object_mut()
            .unwrap()
            .remove("proj:epsg");
        item["assets"]["B04"]
            .as_object_mut()
            .unwrap()
            .remove("proj:shape");
        assert!(matches!(
            stac_to_eo3(&item).unwrap_err(),
            DcError::TransformError(_)
        ));
    }

    #[test]
    fn test_guess_location_same_directory_is_relative() {
        let (uri, relative) = guess_location(&sample_item()).unwrap();
        assert_eq!(uri, "https://example.com/data/56/J/KT/item.json");
        assert!(relative);
    }

    #[test]
    fn test_guess_location_different_directory_is_absolute() {
        let mut item = sample_item();
        item["links"][0]["href"] = json!("https://metadata.example.com/items/item.json");
        let (_, relative) = guess_location(&item).unwrap();
        assert!(!relative);
    }

    #[test]
    fn test_guess_location_requires_self_link() {
        let mut item = sample_item();
        item["links"] = json!([]);
        assert!(matches!(
            guess_location(&item).unwrap_err(),
            DcError::MissingUri
        ));
    }
}
