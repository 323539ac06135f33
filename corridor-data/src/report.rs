//! Plain-text pipeline report loading.
//!
//! Field crews deliver inspection reports as whitespace-separated rows:
//!
//! ```text
//! id name x y date psi material
//! 17 valve-17 431200.5 182344.0 2024-03-12 250 steel
//! ```
//!
//! Each row loads as a point feature; malformed rows are set aside as skip
//! records. Lines that are empty or start with `#` are ignored.

use camino::{Utf8Path, Utf8PathBuf};
use geo::{Geometry, Point};
use thiserror::Error;

use corridor_core::{
    Attributes, Crs, Feature, FeatureCollection, FeatureCollectionError, FeatureId, SkipRecord,
};

use crate::geojson::{LoadOptions, LoadReport};

/// Fatal report-file failure. Malformed rows become skip records instead.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Location of the report file.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Too many rows were malformed to trust the load.
    #[error("skipped {skipped} of {total} rows, above the {threshold} threshold")]
    SkipRateExceeded {
        /// Rows set aside.
        skipped: usize,
        /// Data rows in the file.
        total: usize,
        /// The configured ratio limit.
        threshold: f64,
    },
    /// The surviving rows did not form a valid collection.
    #[error(transparent)]
    Collection(#[from] FeatureCollectionError),
}

/// Load a plain-text pipeline report as point features.
///
/// Coordinates are taken to be in `crs`; the report format carries no CRS
/// of its own.
///
/// # Errors
/// Returns a [`ReportError`] for unreadable input or a skip ratio above
/// `options.skip_threshold`.
pub fn load_report(
    path: &Utf8Path,
    crs: Crs,
    options: &LoadOptions,
) -> Result<LoadReport, ReportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_owned(),
        source,
    })?;

    let mut features = Vec::new();
    let mut skipped = Vec::new();
    let mut total = 0usize;

    for (line_number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        total += 1;
        match parse_row(line) {
            Ok(feature) => features.push(feature),
            Err(reason) => {
                let record = SkipRecord {
                    feature_id: None,
                    reason: format!("line {}: {reason}", line_number + 1),
                };
                log::warn!("{record}");
                skipped.push(record);
            }
        }
    }

    #[allow(clippy::cast_precision_loss, reason = "row counts are small")]
    if total > 0 && skipped.len() as f64 / total as f64 > options.skip_threshold {
        return Err(ReportError::SkipRateExceeded {
            skipped: skipped.len(),
            total,
            threshold: options.skip_threshold,
        });
    }

    let collection = FeatureCollection::new(features, crs)?;
    log::info!(
        "loaded {} report rows ({} skipped) from {path}",
        collection.len(),
        skipped.len()
    );
    Ok(LoadReport {
        collection,
        skipped,
    })
}

fn parse_row(line: &str) -> Result<Feature, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [id, name, x, y, date, psi, material] = fields.as_slice() else {
        return Err(format!("expected 7 fields, found {}", fields.len()));
    };

    let id: FeatureId = id.parse().map_err(|_| format!("bad id {id:?}"))?;
    let x: f64 = x.parse().map_err(|_| format!("bad x coordinate {x:?}"))?;
    let y: f64 = y.parse().map_err(|_| format!("bad y coordinate {y:?}"))?;
    if !x.is_finite() || !y.is_finite() {
        return Err("non-finite coordinate".to_owned());
    }
    let psi: f64 = psi.parse().map_err(|_| format!("bad psi {psi:?}"))?;

    let mut attributes = Attributes::new();
    attributes.insert("name".to_owned(), (*name).into());
    attributes.insert("date".to_owned(), (*date).into());
    attributes.insert("psi".to_owned(), psi.into());
    attributes.insert("material".to_owned(), (*material).into());

    Ok(Feature::new(
        id,
        Geometry::Point(Point::new(x, y)),
        attributes,
    ))
}
