//! Error types emitted by the corridor CLI.
//!
//! Every error class maps onto a stable process exit code so batch
//! wrappers can distinguish configuration mistakes from data problems.

use camino::Utf8PathBuf;
use thiserror::Error;

use corridor_core::{
    BufferError, ConfigError, CrsError, JobError, MergeConflictError, PersistenceError,
    SqliteRegionStoreError,
};
use corridor_data::{LoadError, ReportError, WriteError};

/// Exit code for configuration errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for input loading errors.
pub const EXIT_LOAD: i32 = 3;
/// Exit code for geometry errors.
pub const EXIT_GEOMETRY: i32 = 4;
/// Exit code for buffer or merge failures.
pub const EXIT_PROCESSING: i32 = 5;
/// Exit code for persistence failures.
pub const EXIT_PERSISTENCE: i32 = 6;

/// Errors emitted by the corridor CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// The run configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A required option is missing after parsing.
    #[error("missing --{field}")]
    MissingArgument {
        /// The absent flag.
        field: &'static str,
    },
    /// The distance policy file could not be read or parsed.
    #[error("failed to load distance policy from {path}: {message}")]
    PolicyFile {
        /// Location of the policy file.
        path: Utf8PathBuf,
        /// What went wrong.
        message: String,
    },
    /// A CRS flag could not be parsed.
    #[error("invalid CRS {value:?}: {source}")]
    InvalidCrs {
        /// The flag value as given.
        value: String,
        /// Why it failed to parse.
        #[source]
        source: CrsError,
    },
    /// Loading the GeoJSON input failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Loading the plain-text report input failed.
    #[error(transparent)]
    Report(#[from] ReportError),
    /// The buffer phase failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The merge phase failed.
    #[error(transparent)]
    Merge(#[from] MergeConflictError),
    /// The end-to-end job failed.
    #[error(transparent)]
    Job(#[from] JobError),
    /// The store could not be opened.
    #[error(transparent)]
    Store(#[from] SqliteRegionStoreError),
    /// The store rejected the results.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// Writing the output document failed.
    #[error(transparent)]
    Write(#[from] WriteError),
}

impl CliError {
    /// The process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ArgumentParsing(_)
            | Self::Config(_)
            | Self::MissingArgument { .. }
            | Self::PolicyFile { .. }
            | Self::InvalidCrs { .. } => EXIT_CONFIG,
            Self::Load(_) | Self::Report(_) => EXIT_LOAD,
            Self::Buffer(error) => match error {
                BufferError::Config(_) => EXIT_CONFIG,
                BufferError::Geometry { .. } => EXIT_GEOMETRY,
            },
            Self::Merge(_) => EXIT_PROCESSING,
            Self::Job(error) => match error {
                JobError::Config(_) => EXIT_CONFIG,
                JobError::Processing(_) | JobError::Merge(_) => EXIT_PROCESSING,
                JobError::Persistence(_) => EXIT_PERSISTENCE,
                JobError::Cancelled => 1,
            },
            Self::Store(_) | Self::Persistence(_) => EXIT_PERSISTENCE,
            Self::Write(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn config_errors_map_to_the_config_exit_code() {
        let error = CliError::Config(ConfigError::NegativeDistance { distance: -5.0 });
        assert_eq!(error.exit_code(), EXIT_CONFIG);
    }

    #[rstest]
    fn job_persistence_failures_map_to_the_persistence_exit_code() {
        let error = CliError::Job(JobError::Persistence(PersistenceError::Permanent {
            operation: "upsert",
            message: "disk full".to_owned(),
        }));
        assert_eq!(error.exit_code(), EXIT_PERSISTENCE);
    }

    #[rstest]
    fn invalid_crs_maps_to_the_config_exit_code() {
        let source = match corridor_core::Crs::new("bogus") {
            Err(source) => source,
            Ok(_) => panic!("\"bogus\" must not parse as a CRS"),
        };
        let error = CliError::InvalidCrs {
            value: "bogus".to_owned(),
            source,
        };
        assert_eq!(error.exit_code(), EXIT_CONFIG);
    }

    #[rstest]
    fn merge_conflicts_map_to_the_processing_exit_code() {
        let error = CliError::Merge(MergeConflictError::TypeMismatch {
            key: "psi".to_owned(),
            first: 1,
            second: 2,
        });
        assert_eq!(error.exit_code(), EXIT_PROCESSING);
    }
}
