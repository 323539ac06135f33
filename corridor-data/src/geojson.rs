//! GeoJSON feature-collection loading.
//!
//! Loads a `FeatureCollection` document into the core feature model. The
//! document's CRS applies to every feature; a per-feature `crs` property
//! that disagrees is fatal, as silent mixed-CRS processing produces
//! garbage geometry. Individually bad features are set aside as skip
//! records up to a configurable ratio of the input.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use corridor_core::{
    geojson::geometry_from_value, AttributeValue, Attributes, Crs, CrsError, Feature,
    FeatureCollection, FeatureCollectionError, FeatureId, GeoEngine, GeometryEngine, SkipRecord,
};

/// Fraction of skipped features above which the whole load fails.
pub const DEFAULT_SKIP_THRESHOLD: f64 = 0.2;

/// Loader tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    /// Maximum tolerated ratio of skipped features, `0.0..=1.0`.
    pub skip_threshold: f64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            skip_threshold: DEFAULT_SKIP_THRESHOLD,
        }
    }
}

/// Fatal loading failure. Per-feature defects become skip records instead.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The input file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Location of the input document.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The input was not a valid GeoJSON document.
    #[error("failed to parse {path}: {source}")]
    Json {
        /// Location of the input document.
        path: Utf8PathBuf,
        /// JSON decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// The document's CRS member was not a recognised EPSG reference.
    #[error("invalid collection CRS: {source}")]
    InvalidCrs {
        /// CRS parse failure.
        #[source]
        source: CrsError,
    },
    /// A feature declared a CRS that differs from the collection's.
    #[error("feature {feature_id} declares CRS {found:?}, collection uses {expected}")]
    CrsMismatch {
        /// The disagreeing feature.
        feature_id: FeatureId,
        /// The CRS the feature declared.
        found: String,
        /// The collection's CRS.
        expected: Crs,
    },
    /// Too many features were skipped to trust the load.
    #[error("skipped {skipped} of {total} features, above the {threshold} threshold")]
    SkipRateExceeded {
        /// Features set aside.
        skipped: usize,
        /// Features in the document.
        total: usize,
        /// The configured ratio limit.
        threshold: f64,
    },
    /// The surviving features did not form a valid collection.
    #[error(transparent)]
    Collection(#[from] FeatureCollectionError),
}

/// A loaded collection together with the features that were set aside.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    /// The accepted features.
    pub collection: FeatureCollection,
    /// Features set aside, with reasons.
    pub skipped: Vec<SkipRecord>,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(default)]
    crs: Option<RawCrs>,
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawCrs {
    properties: RawCrsProperties,
}

#[derive(Debug, Deserialize)]
struct RawCrsProperties {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<FeatureId>,
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<BTreeMap<String, Value>>,
}

/// Load a GeoJSON `FeatureCollection` document from disk.
///
/// # Errors
/// Returns a [`LoadError`] for unreadable or malformed input, a CRS
/// conflict, or a skip ratio above `options.skip_threshold`.
pub fn load_geojson(path: &Utf8Path, options: &LoadOptions) -> Result<LoadReport, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })?;
    let raw: RawCollection = serde_json::from_str(&text).map_err(|source| LoadError::Json {
        path: path.to_owned(),
        source,
    })?;

    let crs = match raw.crs {
        Some(raw_crs) => {
            Crs::new(&raw_crs.properties.name).map_err(|source| LoadError::InvalidCrs { source })?
        }
        None => Crs::wgs84(),
    };

    let engine = GeoEngine::default();
    let total = raw.features.len();
    let mut features = Vec::with_capacity(total);
    let mut skipped = Vec::new();

    for (index, raw_feature) in raw.features.into_iter().enumerate() {
        #[allow(clippy::cast_possible_truncation, reason = "document indices fit u64")]
        let fallback_id = index as FeatureId + 1;
        let id = raw_feature.id.unwrap_or(fallback_id);
        let properties = raw_feature.properties.unwrap_or_default();

        if let Some(declared) = properties.get("crs").and_then(Value::as_str) {
            let matches = Crs::new(declared).map(|c| c == crs).unwrap_or(false);
            if !matches {
                return Err(LoadError::CrsMismatch {
                    feature_id: id,
                    found: declared.to_owned(),
                    expected: crs,
                });
            }
        }

        let Some(geometry_value) = raw_feature.geometry.filter(|v| !v.is_null()) else {
            skipped.push(skip(id, "geometry is null"));
            continue;
        };
        let geometry = match geometry_from_value(&geometry_value) {
            Ok(geometry) => geometry,
            Err(error) => {
                skipped.push(skip(id, &error.to_string()));
                continue;
            }
        };
        if let Err(error) = engine.validate(&geometry) {
            skipped.push(skip(id, &error.to_string()));
            continue;
        }

        features.push(Feature::new(id, geometry, decode_attributes(&properties)));
    }

    for record in &skipped {
        log::warn!("{record}");
    }
    #[allow(clippy::cast_precision_loss, reason = "feature counts are small")]
    if total > 0 && skipped.len() as f64 / total as f64 > options.skip_threshold {
        return Err(LoadError::SkipRateExceeded {
            skipped: skipped.len(),
            total,
            threshold: options.skip_threshold,
        });
    }

    let collection = FeatureCollection::new(features, crs)?;
    log::info!(
        "loaded {} features ({} skipped) from {path}",
        collection.len(),
        skipped.len()
    );
    Ok(LoadReport {
        collection,
        skipped,
    })
}

fn skip(id: FeatureId, reason: &str) -> SkipRecord {
    SkipRecord {
        feature_id: Some(id),
        reason: reason.to_owned(),
    }
}

/// Scalar properties become attributes; structured values are dropped with
/// a warning since nothing downstream can reconcile them.
fn decode_attributes(properties: &BTreeMap<String, Value>) -> Attributes {
    let mut attributes = Attributes::new();
    for (key, value) in properties {
        if key == "crs" {
            continue;
        }
        match value {
            Value::Bool(flag) => {
                attributes.insert(key.clone(), AttributeValue::Bool(*flag));
            }
            Value::Number(number) => {
                if let Some(number) = number.as_f64() {
                    attributes.insert(key.clone(), AttributeValue::Number(number));
                }
            }
            Value::String(text) => {
                attributes.insert(key.clone(), AttributeValue::Text(text.clone()));
            }
            Value::Null => {}
            Value::Array(_) | Value::Object(_) => {
                log::warn!("dropping structured property {key:?}");
            }
        }
    }
    attributes
}
