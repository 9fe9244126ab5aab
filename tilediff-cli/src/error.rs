//! Error types emitted by the tilediff CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use tilediff_core::{CompareError, JudgeError, TileStoreError, UnknownBackendKind};

/// Errors emitted by the tilediff CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required value is missing after configuration merging.
    #[error("missing {field} (pass it on the command line or set {env})")]
    MissingArgument {
        /// Name of the missing argument.
        field: &'static str,
        /// Environment variable that can supply it.
        env: &'static str,
    },
    /// A dataset type tag is not one of the supported backends.
    #[error("invalid {field}: {source}")]
    InvalidBackendKind {
        /// Argument carrying the tag.
        field: &'static str,
        /// Parse failure from the core crate.
        #[source]
        source: UnknownBackendKind,
    },
    /// The filesystem row scheme is not recognised.
    #[error("invalid --fs-scheme: {reason}")]
    InvalidScheme {
        /// Why the value was rejected.
        reason: String,
    },
    /// The GeoPackage page size must be positive.
    #[error("--batch-size must be at least 1")]
    InvalidBatchSize,
    /// The similarity threshold was rejected.
    #[error("invalid --threshold: {0}")]
    InvalidThreshold(#[source] JudgeError),
    /// A dataset path does not exist on disk.
    #[error("{field} {path:?} does not exist")]
    MissingSourcePath {
        /// Argument carrying the path.
        field: &'static str,
        /// The missing path.
        path: Utf8PathBuf,
    },
    /// A dataset path could not be inspected due to an IO error.
    #[error("failed to inspect {field} {path:?}: {source}")]
    InspectSourcePath {
        /// Argument carrying the path.
        field: &'static str,
        /// The path being inspected.
        path: Utf8PathBuf,
        /// Source error from std I/O.
        #[source]
        source: std::io::Error,
    },
    /// Opening or closing a dataset failed.
    #[error(transparent)]
    Store(#[from] TileStoreError),
    /// The comparison itself failed.
    #[error(transparent)]
    Compare(#[from] CompareError),
    /// Writing the report failed.
    #[error("failed to write comparison report: {0}")]
    WriteReport(#[source] std::io::Error),
}
