//! GeoJSON output for buffer and merge results.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{json, Map, Value};
use thiserror::Error;

use corridor_core::{
    geojson::multi_polygon_to_value, AttributeValue, Attributes, BufferPolygon, Crs, MergedRegion,
};

/// Failure while writing an output document.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The output file could not be written.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Destination path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// Write buffer polygons as a GeoJSON `FeatureCollection`.
///
/// Each feature carries its source feature id, the applied distance, and
/// the copied-through attributes.
///
/// # Errors
/// Returns [`WriteError::Io`] when the file cannot be written.
pub fn write_buffers(
    path: &Utf8Path,
    buffers: &[BufferPolygon],
    crs: &Crs,
) -> Result<(), WriteError> {
    let features: Vec<Value> = buffers
        .iter()
        .map(|buffer| {
            let mut properties = attribute_map(&buffer.attributes);
            properties.insert("buffer_distance".to_owned(), json!(buffer.distance));
            json!({
                "type": "Feature",
                "id": buffer.feature_id,
                "geometry": multi_polygon_to_value(&buffer.geometry),
                "properties": properties,
            })
        })
        .collect();
    write_collection(path, features, crs)
}

/// Write merged regions as a GeoJSON `FeatureCollection`.
///
/// Contributing feature ids land in a `contributing_feature_ids` property.
///
/// # Errors
/// Returns [`WriteError::Io`] when the file cannot be written.
pub fn write_regions(
    path: &Utf8Path,
    regions: &[MergedRegion],
    crs: &Crs,
) -> Result<(), WriteError> {
    let features: Vec<Value> = regions
        .iter()
        .map(|region| {
            let mut properties = attribute_map(&region.attributes);
            properties.insert(
                "contributing_feature_ids".to_owned(),
                json!(region.contributing_ids),
            );
            properties.insert("buffer_distance".to_owned(), json!(region.buffer_distance));
            json!({
                "type": "Feature",
                "geometry": multi_polygon_to_value(&region.geometry),
                "properties": properties,
            })
        })
        .collect();
    write_collection(path, features, crs)
}

fn write_collection(path: &Utf8Path, features: Vec<Value>, crs: &Crs) -> Result<(), WriteError> {
    let document = json!({
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": crs.as_str()}},
        "features": features,
    });
    std::fs::write(path, document.to_string()).map_err(|source| WriteError::Io {
        path: path.to_owned(),
        source,
    })?;
    log::info!("wrote {} features to {path}", document["features"].as_array().map_or(0, Vec::len));
    Ok(())
}

fn attribute_map(attributes: &Attributes) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AttributeValue::Bool(flag) => json!(flag),
                AttributeValue::Number(number) => json!(number),
                AttributeValue::Text(text) => json!(text),
            };
            (key.clone(), value)
        })
        .collect()
}
