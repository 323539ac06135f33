//! Pre-flight configuration errors shared across pipeline stages.

use thiserror::Error;

use crate::feature::FeatureId;

/// Invalid configuration detected before any feature is processed.
///
/// These are always fatal and are raised up front: a job with a bad
/// distance policy or worker count never starts buffering.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A buffer distance was negative.
    #[error("buffer distance must be non-negative, got {distance}")]
    NegativeDistance {
        /// The offending distance, in the configured unit.
        distance: f64,
    },
    /// A buffer distance was not finite.
    #[error("buffer distance must be finite, got {distance}")]
    NonFiniteDistance {
        /// The offending distance, in the configured unit.
        distance: f64,
    },
    /// A per-attribute policy could not resolve a distance for a feature.
    #[error("no buffer distance for feature {feature_id}: attribute {field:?} {reason}")]
    UnresolvedDistance {
        /// Feature the policy failed to cover.
        feature_id: FeatureId,
        /// Attribute field the policy keys on.
        field: String,
        /// Why resolution failed ("is missing" or "has no mapping").
        reason: &'static str,
    },
    /// The configured worker count was zero.
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
    /// The configured partition cap was zero.
    #[error("partition size cap must be at least 1")]
    InvalidPartitionCap,
}
