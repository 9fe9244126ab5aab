//! Compare command implementation for the tilediff CLI.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tilediff_core::{
    BackendKind, Comparator, ComparisonMode, ComparisonResult, DEFAULT_TILE_DIFF_THRESHOLD,
    SimilarityJudge, StoreOptions, TileScheme, TileStore, TraversalOrder, open_store,
};
use tilediff_fs::probe_path;

use crate::{
    ARG_CANDIDATE_KIND, ARG_CANDIDATE_PATH, ARG_REFERENCE_KIND, ARG_REFERENCE_PATH, CliError,
    ENV_CANDIDATE_KIND, ENV_CANDIDATE_PATH, ENV_REFERENCE_KIND, ENV_REFERENCE_PATH, Verdict,
};

/// CLI arguments for the `compare` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Compare a candidate tile dataset against a reference. Every \
                 reference tile is looked up in the candidate and judged for \
                 visual equality. Dataset types are gpkg, fs or s3.",
    about = "Compare two tile datasets"
)]
#[ortho_config(prefix = "TILEDIFF")]
pub(crate) struct CompareArgs {
    /// Type of the reference dataset (gpkg, fs, s3).
    #[arg(value_name = "type-a")]
    #[serde(default)]
    pub(crate) reference_kind: Option<String>,
    /// Location of the reference dataset.
    #[arg(value_name = "path-a")]
    #[serde(default)]
    pub(crate) reference_path: Option<Utf8PathBuf>,
    /// Type of the candidate dataset (gpkg, fs, s3).
    #[arg(value_name = "type-b")]
    #[serde(default)]
    pub(crate) candidate_kind: Option<String>,
    /// Location of the candidate dataset.
    #[arg(value_name = "path-b")]
    #[serde(default)]
    pub(crate) candidate_path: Option<Utf8PathBuf>,
    /// Distortion at or above which two tiles differ.
    #[arg(long, value_name = "f64")]
    #[serde(default)]
    pub(crate) threshold: Option<f64>,
    /// Keep going after the first mismatch and count them all.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    #[serde(default)]
    pub(crate) exhaustive: Option<bool>,
    /// Visit reference tiles in ascending (zoom, column, row) order.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    #[serde(default)]
    pub(crate) sorted: Option<bool>,
    /// Row convention of filesystem datasets (xyz or tms).
    #[arg(long, value_name = "scheme")]
    #[serde(default)]
    pub(crate) fs_scheme: Option<String>,
    /// Rows fetched per page when walking a GeoPackage.
    #[arg(long, value_name = "n")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
}

impl CompareArgs {
    pub(crate) fn into_config(self) -> Result<CompareConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CompareConfig::try_from(merged)
    }
}

/// One side of the comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DatasetSource {
    pub(crate) kind: BackendKind,
    pub(crate) path: Utf8PathBuf,
}

/// Resolved `compare` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompareConfig {
    pub(crate) reference: DatasetSource,
    pub(crate) candidate: DatasetSource,
    pub(crate) threshold: f64,
    pub(crate) mode: ComparisonMode,
    pub(crate) order: TraversalOrder,
    pub(crate) options: StoreOptions,
}

impl CompareConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        Self::require_existing(&self.reference, ARG_REFERENCE_PATH)?;
        Self::require_existing(&self.candidate, ARG_CANDIDATE_PATH)?;
        Ok(())
    }

    fn require_existing(source: &DatasetSource, field: &'static str) -> Result<(), CliError> {
        if source.kind == BackendKind::ObjectStorage {
            return Ok(());
        }
        match probe_path(&source.path) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(CliError::MissingSourcePath {
                field,
                path: source.path.clone(),
            }),
            Err(err) => Err(CliError::InspectSourcePath {
                field,
                path: source.path.clone(),
                source: err,
            }),
        }
    }

    fn judge(&self) -> Result<SimilarityJudge, CliError> {
        SimilarityJudge::new(self.threshold).map_err(CliError::InvalidThreshold)
    }
}

fn parse_kind(tag: &str, field: &'static str) -> Result<BackendKind, CliError> {
    tag.parse()
        .map_err(|source| CliError::InvalidBackendKind { field, source })
}

impl TryFrom<CompareArgs> for CompareConfig {
    type Error = CliError;

    fn try_from(args: CompareArgs) -> Result<Self, Self::Error> {
        let reference_kind = args.reference_kind.ok_or(CliError::MissingArgument {
            field: ARG_REFERENCE_KIND,
            env: ENV_REFERENCE_KIND,
        })?;
        let reference_path = args.reference_path.ok_or(CliError::MissingArgument {
            field: ARG_REFERENCE_PATH,
            env: ENV_REFERENCE_PATH,
        })?;
        let candidate_kind = args.candidate_kind.ok_or(CliError::MissingArgument {
            field: ARG_CANDIDATE_KIND,
            env: ENV_CANDIDATE_KIND,
        })?;
        let candidate_path = args.candidate_path.ok_or(CliError::MissingArgument {
            field: ARG_CANDIDATE_PATH,
            env: ENV_CANDIDATE_PATH,
        })?;

        let scheme = match args.fs_scheme {
            Some(value) => value
                .parse::<TileScheme>()
                .map_err(|reason| CliError::InvalidScheme { reason })?,
            None => TileScheme::default(),
        };
        let batch_size = args
            .batch_size
            .unwrap_or(StoreOptions::default().batch_size);
        if batch_size == 0 {
            return Err(CliError::InvalidBatchSize);
        }

        let mode = if args.exhaustive.unwrap_or(false) {
            ComparisonMode::Exhaustive
        } else {
            ComparisonMode::StopAtFirstMismatch
        };
        let order = if args.sorted.unwrap_or(false) {
            TraversalOrder::Sorted
        } else {
            TraversalOrder::Native
        };

        Ok(Self {
            reference: DatasetSource {
                kind: parse_kind(&reference_kind, ARG_REFERENCE_KIND)?,
                path: reference_path,
            },
            candidate: DatasetSource {
                kind: parse_kind(&candidate_kind, ARG_CANDIDATE_KIND)?,
                path: candidate_path,
            },
            threshold: args.threshold.unwrap_or(DEFAULT_TILE_DIFF_THRESHOLD),
            mode,
            order,
            options: StoreOptions { batch_size, scheme },
        })
    }
}

/// Opens a dataset for the current compare invocation.
pub(super) trait StoreOpener {
    fn open(
        &self,
        source: &DatasetSource,
        options: StoreOptions,
    ) -> Result<Box<dyn TileStore>, CliError>;
}

pub(super) struct DefaultStoreOpener;

impl StoreOpener for DefaultStoreOpener {
    fn open(
        &self,
        source: &DatasetSource,
        options: StoreOptions,
    ) -> Result<Box<dyn TileStore>, CliError> {
        open_store(source.kind, &source.path, options).map_err(CliError::from)
    }
}

pub(super) fn run_compare(args: CompareArgs) -> Result<Verdict, CliError> {
    let mut stdout = std::io::stdout().lock();
    run_compare_with(args, &DefaultStoreOpener, &mut stdout)
}

pub(super) fn run_compare_with(
    args: CompareArgs,
    opener: &dyn StoreOpener,
    writer: &mut dyn Write,
) -> Result<Verdict, CliError> {
    let config = resolve_compare_config(args)?;
    let result = execute_compare(&config, opener)?;
    write_report(writer, &config, &result)?;
    Ok(if result.is_match() {
        Verdict::Match
    } else {
        Verdict::Mismatch
    })
}

pub(super) fn resolve_compare_config(args: CompareArgs) -> Result<CompareConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

fn execute_compare(
    config: &CompareConfig,
    opener: &dyn StoreOpener,
) -> Result<ComparisonResult, CliError> {
    let comparator = Comparator::new(config.judge()?)
        .mode(config.mode)
        .order(config.order);
    let mut reference = opener.open(&config.reference, config.options)?;
    let mut candidate = opener.open(&config.candidate, config.options)?;

    let outcome = comparator.compare(reference.as_ref(), candidate.as_ref());
    let reference_closed = close_store(reference.as_mut());
    let candidate_closed = close_store(candidate.as_mut());

    let result = outcome?;
    reference_closed?;
    candidate_closed?;
    Ok(result)
}

fn close_store(store: &mut dyn TileStore) -> Result<(), CliError> {
    let location = store.location().to_path_buf();
    store.close().map_err(|err| {
        log::warn!("failed to close {location}: {err}");
        CliError::from(err)
    })
}

fn write_report(
    writer: &mut dyn Write,
    config: &CompareConfig,
    result: &ComparisonResult,
) -> Result<(), CliError> {
    write_lines(writer, config, result).map_err(CliError::WriteReport)
}

fn write_lines(
    writer: &mut dyn Write,
    config: &CompareConfig,
    result: &ComparisonResult,
) -> std::io::Result<()> {
    for (label, source) in [("reference", &config.reference), ("candidate", &config.candidate)] {
        writeln!(writer, "{label}: {} {}", source.kind, source.path)?;
    }
    writeln!(
        writer,
        "match ratio: {:.4} ({}/{} tiles matched)",
        result.match_ratio(),
        result.matched,
        result.total
    )?;
    if let Some(mismatch) = result.first_mismatch {
        writeln!(
            writer,
            "first mismatch: tile {} {}",
            mismatch.key, mismatch.kind
        )?;
    }
    if config.mode == ComparisonMode::Exhaustive {
        writeln!(
            writer,
            "mismatches: {} of {} examined",
            result.mismatches, result.examined
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<CompareConfig, CliError> {
    let merged = CompareArgs::merge_from_layers(layers).map_err(CliError::from)?;
    CompareConfig::try_from(merged)
}
