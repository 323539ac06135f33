//! Buffer generation over feature partitions.
//!
//! The engine operates as a vectorized batch call: distances for an entire
//! partition are resolved before any geometry work starts, so a bad policy
//! fails the job up front instead of midway through a worker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use geo::MultiPolygon;
use thiserror::Error;

use crate::error::ConfigError;
use crate::feature::{Attributes, Feature, FeatureId};
use crate::geometry::{GeometryEngine, GeometryOpError};

/// Feet-to-meters conversion factor.
const FT_TO_M: f64 = 0.3048;

/// Unit the configured distances are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    /// Distances are already in the CRS unit (meters for projected CRS).
    #[default]
    Meters,
    /// Distances convert at 0.3048 m/ft before buffering.
    Feet,
}

impl DistanceUnit {
    /// Convert a configured distance into CRS units.
    #[must_use]
    pub fn to_crs_units(self, distance: f64) -> f64 {
        match self {
            Self::Meters => distance,
            Self::Feet => distance * FT_TO_M,
        }
    }
}

/// How the buffer distance for a feature is determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistancePolicy {
    /// One distance for every feature.
    Fixed(f64),
    /// Distance looked up from a categorical attribute (e.g. material).
    PerAttribute {
        /// Attribute field the lookup keys on.
        field: String,
        /// Mapping from attribute text value to distance.
        values: BTreeMap<String, f64>,
        /// Distance for features whose value has no mapping.
        default: Option<f64>,
    },
}

impl DistancePolicy {
    /// Every distance the policy can produce, for pre-flight validation.
    fn candidate_distances(&self) -> Vec<f64> {
        match self {
            Self::Fixed(distance) => vec![*distance],
            Self::PerAttribute {
                values, default, ..
            } => {
                let mut distances: Vec<f64> = values.values().copied().collect();
                if let Some(distance) = default {
                    distances.push(*distance);
                }
                distances
            }
        }
    }

    /// Resolve the distance for one feature.
    pub fn resolve(&self, feature: &Feature) -> Result<f64, ConfigError> {
        match self {
            Self::Fixed(distance) => Ok(*distance),
            Self::PerAttribute {
                field,
                values,
                default,
            } => {
                let key = feature
                    .attributes
                    .get(field)
                    .and_then(crate::feature::AttributeValue::as_text);
                match key {
                    Some(value) => values.get(value).copied().or(*default).ok_or_else(|| {
                        ConfigError::UnresolvedDistance {
                            feature_id: feature.id,
                            field: field.clone(),
                            reason: "has no mapping",
                        }
                    }),
                    None => default.ok_or_else(|| ConfigError::UnresolvedDistance {
                        feature_id: feature.id,
                        field: field.clone(),
                        reason: "is missing",
                    }),
                }
            }
        }
    }
}

/// Buffer-phase configuration: distance policy plus its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Distance policy applied per feature.
    pub policy: DistancePolicy,
    /// Unit the policy's distances are expressed in.
    #[serde(default)]
    pub unit: DistanceUnit,
}

impl BufferConfig {
    /// A fixed-distance configuration in CRS units.
    #[must_use]
    pub fn fixed(distance: f64) -> Self {
        Self {
            policy: DistancePolicy::Fixed(distance),
            unit: DistanceUnit::Meters,
        }
    }
}

/// Derived buffer geometry for one source feature.
///
/// Retains a back-reference to its source feature id and a copy of the
/// source attributes; never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferPolygon {
    /// Id of the single feature this buffer derives from.
    pub feature_id: FeatureId,
    /// Applied distance, in CRS units.
    pub distance: f64,
    /// Buffer geometry.
    pub geometry: MultiPolygon<f64>,
    /// Attributes copied through from the source feature.
    pub attributes: Attributes,
}

/// Unexpected failure inside a vectorized buffer batch. Fatal for the
/// affected partition; the job-level outcome depends on the failure policy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BufferError {
    /// Distance resolution failed inside the batch. Normally caught during
    /// pre-flight; kept so direct batch callers still fail loudly.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A single feature's geometry could not be buffered.
    #[error("failed to buffer feature {feature_id}: {source}")]
    Geometry {
        /// Feature the batch failed on.
        feature_id: FeatureId,
        /// Underlying geometry failure.
        #[source]
        source: GeometryOpError,
    },
}

/// Computes buffer polygons for feature partitions.
///
/// # Examples
/// ```
/// use corridor_core::{BufferConfig, BufferEngine, Feature, GeoEngine};
/// use geo::{Geometry, Point};
///
/// let engine = BufferEngine::new(GeoEngine::default(), BufferConfig::fixed(25.0))?;
/// let features = vec![Feature::with_empty_attributes(
///     1,
///     Geometry::Point(Point::new(0.0, 0.0)),
/// )];
/// let buffers = engine.buffer_partition(&features).expect("buffer batch");
/// assert_eq!(buffers[0].feature_id, 1);
/// # Ok::<(), corridor_core::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct BufferEngine<E = crate::geometry::GeoEngine> {
    engine: E,
    config: BufferConfig,
    exclusion: Option<MultiPolygon<f64>>,
}

impl<E: GeometryEngine> BufferEngine<E> {
    /// Validate the configuration and construct the engine.
    ///
    /// Any distance the policy can produce must be finite and non-negative;
    /// violations are a [`ConfigError`] raised before any feature work.
    pub fn new(engine: E, config: BufferConfig) -> Result<Self, ConfigError> {
        for distance in config.policy.candidate_distances() {
            if !distance.is_finite() {
                return Err(ConfigError::NonFiniteDistance { distance });
            }
            if distance < 0.0 {
                return Err(ConfigError::NegativeDistance { distance });
            }
        }
        Ok(Self {
            engine,
            config,
            exclusion: None,
        })
    }

    /// Subtract an exclusion layer (e.g. park boundaries) from every buffer.
    ///
    /// A buffer that ends up entirely inside the layer is dropped from the
    /// batch output.
    #[must_use]
    pub fn with_exclusion(mut self, exclusion: MultiPolygon<f64>) -> Self {
        self.exclusion = if exclusion.0.is_empty() {
            None
        } else {
            Some(exclusion)
        };
        self
    }

    /// Resolve the CRS-unit distance for every feature, failing fast if the
    /// policy cannot cover one of them.
    pub fn resolve_distances(&self, features: &[Feature]) -> Result<Vec<f64>, ConfigError> {
        features
            .iter()
            .map(|feature| {
                let distance = self.config.policy.resolve(feature)?;
                Ok(self.config.unit.to_crs_units(distance))
            })
            .collect()
    }

    /// Buffer an entire partition as one batch.
    ///
    /// Distances are resolved for the whole slice before the first geometry
    /// operation runs. With an exclusion layer set, each buffer is clipped
    /// against it; fully excluded buffers are dropped from the output.
    pub fn buffer_partition(&self, features: &[Feature]) -> Result<Vec<BufferPolygon>, BufferError> {
        let distances = self.resolve_distances(features)?;

        let mut buffers = Vec::with_capacity(features.len());
        for (feature, distance) in features.iter().zip(distances) {
            let mut geometry = self
                .engine
                .buffer(&feature.geometry, distance)
                .map_err(|source| BufferError::Geometry {
                    feature_id: feature.id,
                    source,
                })?;
            if let Some(zone) = &self.exclusion {
                if self.engine.intersects(&geometry, zone) {
                    geometry = self.engine.difference(&geometry, zone);
                }
            }
            if geometry.0.is_empty() {
                log::warn!(
                    "buffer for feature {} lies entirely inside the exclusion layer",
                    feature.id
                );
                continue;
            }
            log::debug!("buffered feature {} at distance {distance}", feature.id);
            buffers.push(BufferPolygon {
                feature_id: feature.id,
                distance,
                geometry,
                attributes: feature.attributes.clone(),
            });
        }
        Ok(buffers)
    }
}
