//! Input feature model.
//!
//! A [`Feature`] is one spatial record: a geometry in a fixed CRS plus an
//! attribute mapping (pipeline id, material, diameter, install date, ...).
//! Features are immutable once loaded; downstream stages only ever copy
//! attribute data forward.

use std::collections::BTreeMap;

use geo::Geometry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crs::Crs;

/// Stable identifier of an input feature.
pub type FeatureId = u64;

/// Attribute mapping carried by features, buffers, and merged regions.
///
/// `BTreeMap` keeps key iteration deterministic, which the merge engine
/// relies on for reproducible reconciliation.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value.
///
/// Numeric fields participate in max-value reconciliation on merge;
/// text and boolean fields are categorical and tie-break by feature id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric value (pressure, diameter, ...).
    Number(f64),
    /// Free-form text (material, name, install date, ...).
    Text(String),
}

impl AttributeValue {
    /// The numeric value, if this attribute is numeric.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// The text value, if this attribute is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Bool(_) | Self::Number(_) => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One input spatial record with geometry and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Unique identifier within the collection.
    pub id: FeatureId,
    /// Geometry expressed in the collection's CRS.
    pub geometry: Geometry<f64>,
    /// Attribute mapping carried through the pipeline.
    pub attributes: Attributes,
}

impl Feature {
    /// Construct a feature with the provided attributes.
    #[must_use]
    pub fn new(id: FeatureId, geometry: Geometry<f64>, attributes: Attributes) -> Self {
        Self {
            id,
            geometry,
            attributes,
        }
    }

    /// Construct a feature without attributes.
    #[must_use]
    pub fn with_empty_attributes(id: FeatureId, geometry: Geometry<f64>) -> Self {
        Self::new(id, geometry, Attributes::new())
    }
}

/// Errors returned by [`FeatureCollection::new`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureCollectionError {
    /// Two features shared the same identifier.
    #[error("duplicate feature id {0} in collection")]
    DuplicateId(FeatureId),
}

/// A set of features sharing one validated CRS.
///
/// # Examples
/// ```
/// use corridor_core::{Crs, Feature, FeatureCollection};
/// use geo::{Geometry, Point};
///
/// let feature = Feature::with_empty_attributes(1, Geometry::Point(Point::new(0.0, 0.0)));
/// let collection = FeatureCollection::new(vec![feature], Crs::wgs84())?;
/// assert_eq!(collection.len(), 1);
/// # Ok::<(), corridor_core::FeatureCollectionError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    features: Vec<Feature>,
    crs: Crs,
}

impl FeatureCollection {
    /// Validates and constructs a collection; feature ids must be unique.
    pub fn new(features: Vec<Feature>, crs: Crs) -> Result<Self, FeatureCollectionError> {
        let mut seen = std::collections::BTreeSet::new();
        for feature in &features {
            if !seen.insert(feature.id) {
                return Err(FeatureCollectionError::DuplicateId(feature.id));
            }
        }
        Ok(Self { features, crs })
    }

    /// The features in load order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// The shared CRS.
    #[must_use]
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the collection holds no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Decompose into features and CRS, handing ownership to the scheduler.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Feature>, Crs) {
        (self.features, self.crs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use rstest::rstest;

    fn point_feature(id: FeatureId) -> Feature {
        Feature::with_empty_attributes(id, Geometry::Point(Point::new(0.0, 0.0)))
    }

    #[rstest]
    fn collection_rejects_duplicate_ids() {
        let result = FeatureCollection::new(vec![point_feature(7), point_feature(7)], Crs::wgs84());
        assert_eq!(result, Err(FeatureCollectionError::DuplicateId(7)));
    }

    #[rstest]
    fn collection_preserves_load_order() {
        let collection =
            FeatureCollection::new(vec![point_feature(2), point_feature(1)], Crs::wgs84())
                .expect("unique ids");
        let ids: Vec<_> = collection.features().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[rstest]
    #[case(serde_json::json!(12.5), AttributeValue::Number(12.5))]
    #[case(serde_json::json!("steel"), AttributeValue::Text("steel".into()))]
    #[case(serde_json::json!(true), AttributeValue::Bool(true))]
    fn attribute_values_deserialize_untagged(
        #[case] raw: serde_json::Value,
        #[case] expected: AttributeValue,
    ) {
        let value: AttributeValue = serde_json::from_value(raw).expect("decode attribute");
        assert_eq!(value, expected);
    }
}
