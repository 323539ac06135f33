//! Input loading and output writing for the corridor pipeline.
//!
//! Two input formats are supported: GeoJSON `FeatureCollection` documents
//! and the plain-text pipeline report files field crews deliver. Outputs
//! are written back as GeoJSON. All loading flows into
//! `corridor_core::FeatureCollection`, so the pipeline is format-agnostic
//! from the buffer phase onward.

#![forbid(unsafe_code)]

pub mod geojson;
pub mod report;
pub mod writer;

pub use geojson::{load_geojson, LoadError, LoadOptions, LoadReport, DEFAULT_SKIP_THRESHOLD};
pub use report::{load_report, ReportError};
pub use writer::{write_buffers, write_regions, WriteError};
