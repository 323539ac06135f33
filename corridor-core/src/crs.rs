//! Coordinate reference system identifiers.
//!
//! The pipeline never reprojects: every geometry entering it must share a
//! single validated CRS, and the loader fails the job on a mismatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A validated `EPSG:<code>` coordinate reference system identifier.
///
/// # Examples
/// ```
/// use corridor_core::Crs;
///
/// let crs = Crs::new("EPSG:32633")?;
/// assert_eq!(crs.as_str(), "EPSG:32633");
/// # Ok::<(), corridor_core::CrsError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs(String);

/// Errors returned when parsing a CRS identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrsError {
    /// The identifier did not use the `EPSG:<code>` authority form.
    #[error("CRS {0:?} is not of the form EPSG:<code>")]
    InvalidFormat(String),
    /// The code portion was not a positive integer.
    #[error("CRS {0:?} has a non-numeric EPSG code")]
    InvalidCode(String),
}

impl Crs {
    /// Parse and validate an `EPSG:<code>` identifier (case-insensitive).
    pub fn new(identifier: &str) -> Result<Self, CrsError> {
        let trimmed = identifier.trim();
        let Some(code) = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
        else {
            return Err(CrsError::InvalidFormat(identifier.to_owned()));
        };
        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CrsError::InvalidCode(identifier.to_owned()));
        }
        Ok(Self(format!("EPSG:{code}")))
    }

    /// Construct a CRS directly from a numeric EPSG code.
    #[must_use]
    pub fn from_epsg(code: u32) -> Self {
        Self(format!("EPSG:{code}"))
    }

    /// WGS84 geographic coordinates, the GeoJSON default.
    #[must_use]
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// The normalised identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.0
    }
}
