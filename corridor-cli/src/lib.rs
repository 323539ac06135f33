//! Command-line interface for the corridor pipeline.
//!
//! Three subcommands cover the workflow: `buffer` generates buffer
//! polygons into a GeoJSON file, `merge` dissolves a buffered file into
//! regions, and `run` executes the full buffer → merge → persist job
//! against a SQLite store.

#![forbid(unsafe_code)]

mod error;

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

use corridor_core::{
    run_pipeline, BufferConfig, BufferEngine, BufferPolygon, CancellationToken, Crs,
    DistancePolicy, DistanceUnit, FailurePolicy, GeoEngine, MergeEngine, PipelineConfig,
    SchedulerConfig, SqliteRegionStore,
};
use corridor_data::{load_geojson, load_report, write_buffers, write_regions, LoadOptions, LoadReport};

pub use error::{
    CliError, EXIT_CONFIG, EXIT_GEOMETRY, EXIT_LOAD, EXIT_PERSISTENCE, EXIT_PROCESSING,
};

/// Run the CLI with the current process arguments.
///
/// # Errors
/// Returns a [`CliError`]; callers map it to an exit code.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    execute(cli)
}

/// Run the CLI with explicit arguments. Used by tests.
///
/// # Errors
/// Returns a [`CliError`]; callers map it to an exit code.
pub fn run_from<I, T>(args: I) -> Result<(), CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(CliError::ArgumentParsing)?;
    execute(cli)
}

fn execute(cli: Cli) -> Result<(), CliError> {
    init_logging(&cli.log_level);
    match cli.command {
        Command::Buffer(args) => run_buffer(args),
        Command::Merge(args) => run_merge(args),
        Command::Run(args) => run_job(args),
    }
}

fn init_logging(level: &str) {
    // RUST_LOG wins over --log-level; repeated init in tests is harmless.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init();
}

#[derive(Debug, Parser)]
#[command(
    name = "corridor",
    about = "Buffer, merge, and persist utility-pipeline GIS features",
    version
)]
struct Cli {
    /// Log filter applied when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info", value_name = "filter")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate buffer polygons and write them as GeoJSON.
    Buffer(BufferArgs),
    /// Dissolve a buffered GeoJSON file into merged regions.
    Merge(MergeArgs),
    /// Run the full job: buffer, merge, persist to the store.
    Run(RunArgs),
}

/// Where the per-feature buffer distance comes from.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct DistanceSource {
    /// Fixed buffer distance applied to every feature.
    #[arg(long, value_name = "distance", allow_negative_numbers = true)]
    distance: Option<f64>,
    /// JSON distance-policy file keyed on a feature attribute.
    #[arg(long, value_name = "path")]
    policy_file: Option<Utf8PathBuf>,
}

impl DistanceSource {
    fn into_config(self, units: Units) -> Result<BufferConfig, CliError> {
        // The clap group guarantees exactly one source is present.
        let policy = if let Some(distance) = self.distance {
            DistancePolicy::Fixed(distance)
        } else if let Some(path) = self.policy_file {
            let text = std::fs::read_to_string(&path).map_err(|e| CliError::PolicyFile {
                path: path.clone(),
                message: e.to_string(),
            })?;
            serde_json::from_str(&text).map_err(|e| CliError::PolicyFile {
                path,
                message: e.to_string(),
            })?
        } else {
            return Err(CliError::MissingArgument { field: "distance" });
        };
        Ok(BufferConfig {
            policy,
            unit: units.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Units {
    /// Distances are in the CRS unit.
    #[default]
    Meters,
    /// Distances convert from feet before buffering.
    Feet,
}

impl From<Units> for DistanceUnit {
    fn from(units: Units) -> Self {
        match units {
            Units::Meters => Self::Meters,
            Units::Feet => Self::Feet,
        }
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Meters => "meters",
            Self::Feet => "feet",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum InputFormat {
    /// GeoJSON FeatureCollection document.
    #[default]
    Geojson,
    /// Plain-text pipeline report rows.
    Report,
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Geojson => "geojson",
            Self::Report => "report",
        })
    }
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Input file.
    #[arg(long, value_name = "path")]
    input: Utf8PathBuf,
    /// Input format.
    #[arg(long, value_enum, default_value_t)]
    format: InputFormat,
    /// CRS of report inputs, which carry none of their own.
    #[arg(long, value_name = "epsg", default_value = "EPSG:4326")]
    input_crs: String,
    /// Maximum tolerated ratio of skipped features.
    #[arg(long, value_name = "ratio", default_value_t = corridor_data::DEFAULT_SKIP_THRESHOLD)]
    skip_threshold: f64,
}

impl InputArgs {
    fn load(&self) -> Result<LoadReport, CliError> {
        let options = LoadOptions {
            skip_threshold: self.skip_threshold,
        };
        match self.format {
            InputFormat::Geojson => Ok(load_geojson(&self.input, &options)?),
            InputFormat::Report => {
                let crs = Crs::new(&self.input_crs).map_err(|source| CliError::InvalidCrs {
                    value: self.input_crs.clone(),
                    source,
                })?;
                Ok(load_report(&self.input, crs, &options)?)
            }
        }
    }
}

#[derive(Debug, Args)]
struct BufferArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    distance: DistanceSource,
    /// Unit the configured distances are expressed in.
    #[arg(long, value_enum, default_value_t)]
    units: Units,
    /// GeoJSON polygon layer subtracted from every buffer.
    #[arg(long, value_name = "path")]
    exclusion_file: Option<Utf8PathBuf>,
    /// Output GeoJSON file.
    #[arg(long, value_name = "path")]
    output: Utf8PathBuf,
}

#[derive(Debug, Args)]
struct MergeArgs {
    /// Buffered GeoJSON file, as produced by `corridor buffer`.
    #[arg(long, value_name = "path")]
    input: Utf8PathBuf,
    /// Output GeoJSON file.
    #[arg(long, value_name = "path")]
    output: Utf8PathBuf,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    distance: DistanceSource,
    /// Unit the configured distances are expressed in.
    #[arg(long, value_enum, default_value_t)]
    units: Units,
    /// GeoJSON polygon layer subtracted from every buffer.
    #[arg(long, value_name = "path")]
    exclusion_file: Option<Utf8PathBuf>,
    /// SQLite store the merged regions persist to.
    #[arg(long, value_name = "path", env = "CORRIDOR_STORE")]
    store: Utf8PathBuf,
    /// Worker thread count; defaults to the host parallelism.
    #[arg(long, value_name = "count", env = "CORRIDOR_MAX_WORKERS")]
    max_workers: Option<usize>,
    /// Maximum features per partition.
    #[arg(long, value_name = "count", default_value_t = corridor_core::schedule::DEFAULT_PARTITION_CAP)]
    partition_cap: usize,
    /// Keep going when a partition fails instead of aborting.
    #[arg(long)]
    best_effort: bool,
    /// Per-partition timeout in seconds.
    #[arg(long, value_name = "seconds")]
    task_timeout: Option<u64>,
}

fn run_buffer(args: BufferArgs) -> Result<(), CliError> {
    let report = args.input.load()?;
    for skip in &report.skipped {
        log::warn!("{skip}");
    }
    let crs = report.collection.crs().clone();
    let config = args.distance.into_config(args.units)?;

    let mut engine = BufferEngine::new(GeoEngine::default(), config).map_err(CliError::Config)?;
    if let Some(path) = &args.exclusion_file {
        engine = engine.with_exclusion(load_exclusion(path)?);
    }
    let buffers = engine.buffer_partition(report.collection.features())?;
    write_buffers(&args.output, &buffers, &crs)?;

    println!(
        "buffered {} features ({} skipped) into {}",
        buffers.len(),
        report.skipped.len(),
        args.output
    );
    Ok(())
}

fn run_merge(args: MergeArgs) -> Result<(), CliError> {
    let report = load_geojson(&args.input, &LoadOptions::default())?;
    for skip in &report.skipped {
        log::warn!("{skip}");
    }
    let crs = report.collection.crs().clone();
    let buffers = buffers_from_collection(&report)?;

    let regions = MergeEngine::new(GeoEngine::default()).merge(&buffers)?;
    write_regions(&args.output, &regions, &crs)?;

    println!(
        "merged {} buffers into {} regions in {}",
        buffers.len(),
        regions.len(),
        args.output
    );
    Ok(())
}

/// Rebuild buffer polygons from a `corridor buffer` output document.
fn buffers_from_collection(report: &LoadReport) -> Result<Vec<BufferPolygon>, CliError> {
    use geo::Geometry;

    report
        .collection
        .features()
        .iter()
        .map(|feature| {
            let geometry = match &feature.geometry {
                Geometry::Polygon(polygon) => geo::MultiPolygon::new(vec![polygon.clone()]),
                Geometry::MultiPolygon(multi) => multi.clone(),
                _ => {
                    return Err(CliError::Buffer(corridor_core::BufferError::Geometry {
                        feature_id: feature.id,
                        source: corridor_core::GeometryOpError::Unsupported(
                            "non-polygonal merge input",
                        ),
                    }));
                }
            };
            let mut attributes = feature.attributes.clone();
            let distance = attributes
                .remove("buffer_distance")
                .and_then(|value| value.as_number())
                .unwrap_or(0.0);
            Ok(BufferPolygon {
                feature_id: feature.id,
                distance,
                geometry,
                attributes,
            })
        })
        .collect()
}

/// Read a GeoJSON polygon layer into one multipolygon for subtraction.
fn load_exclusion(path: &Utf8PathBuf) -> Result<geo::MultiPolygon<f64>, CliError> {
    let report = load_geojson(path, &LoadOptions::default())?;
    let mut polygons = Vec::new();
    for feature in report.collection.features() {
        match &feature.geometry {
            geo::Geometry::Polygon(polygon) => polygons.push(polygon.clone()),
            geo::Geometry::MultiPolygon(multi) => polygons.extend(multi.0.iter().cloned()),
            _ => log::warn!("ignoring non-polygonal exclusion feature {}", feature.id),
        }
    }
    Ok(geo::MultiPolygon::new(polygons))
}

fn run_job(args: RunArgs) -> Result<(), CliError> {
    let report = args.input.load()?;
    let exclusion = args
        .exclusion_file
        .as_ref()
        .map(load_exclusion)
        .transpose()?;
    let config = PipelineConfig {
        buffer: args.distance.into_config(args.units)?,
        exclusion,
        scheduler: SchedulerConfig {
            workers: args.max_workers,
            partition_cap: args.partition_cap,
            failure_policy: if args.best_effort {
                FailurePolicy::BestEffort
            } else {
                FailurePolicy::FailFast
            },
            task_timeout: args.task_timeout.map(Duration::from_secs),
        },
    };

    let store = SqliteRegionStore::open(&args.store)?;
    let job = run_pipeline(
        report.collection,
        report.skipped,
        &config,
        GeoEngine::default(),
        &store,
        &CancellationToken::new(),
    )?;

    println!("{}", job.summary());
    Ok(())
}
