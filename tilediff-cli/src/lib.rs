//! Command-line interface for comparing tile datasets.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};

mod compare;
mod error;

use compare::CompareArgs;
pub use error::CliError;

pub(crate) const ARG_REFERENCE_KIND: &str = "type-a";
pub(crate) const ARG_REFERENCE_PATH: &str = "path-a";
pub(crate) const ARG_CANDIDATE_KIND: &str = "type-b";
pub(crate) const ARG_CANDIDATE_PATH: &str = "path-b";
pub(crate) const ENV_REFERENCE_KIND: &str = "TILEDIFF_CMDS_COMPARE_REFERENCE_KIND";
pub(crate) const ENV_REFERENCE_PATH: &str = "TILEDIFF_CMDS_COMPARE_REFERENCE_PATH";
pub(crate) const ENV_CANDIDATE_KIND: &str = "TILEDIFF_CMDS_COMPARE_CANDIDATE_KIND";
pub(crate) const ENV_CANDIDATE_PATH: &str = "TILEDIFF_CMDS_COMPARE_CANDIDATE_PATH";

/// Outcome of a completed comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every reference tile matched.
    Match,
    /// At least one reference tile was missing or dissimilar.
    Mismatch,
}

impl Verdict {
    /// Process exit code for this verdict.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Match => 0,
            Self::Mismatch => 2,
        }
    }
}

/// Run the tilediff CLI with the current process arguments and environment.
///
/// # Errors
/// Returns [`CliError`] when arguments or configuration are invalid, a
/// dataset cannot be opened, or the comparison fails.
pub fn run() -> Result<Verdict, CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Compare(args) => compare::run_compare(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "tilediff",
    about = "Visual comparison of tiled map datasets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compare a candidate dataset against a reference dataset.
    Compare(CompareArgs),
}

#[cfg(test)]
mod tests;
