//! Facade crate for the tilediff dataset comparison tool.
//!
//! This crate re-exports the core comparison types and exposes the store
//! backends behind feature flags.

#![forbid(unsafe_code)]

pub use tilediff_core::{
    BackendKind, CompareError, Comparator, ComparisonMode, ComparisonResult,
    DEFAULT_BATCH_SIZE, DEFAULT_TILE_DIFF_THRESHOLD, DistortionMetric, JudgeError, Mismatch,
    MismatchKind, RootMeanSquareError, Side, SimilarityJudge, StoreOptions, TileIter, TileKey,
    TileRecord, TileScheme, TileStore, TileStoreError, TraversalOrder, UnknownBackendKind,
    open_store,
};

#[cfg(feature = "store-geopackage")]
pub use tilediff_core::GeoPackageStore;

#[cfg(feature = "store-filesystem")]
pub use tilediff_core::{FilesystemStore, TILE_EXTENSIONS};

#[cfg(feature = "test-support")]
pub use tilediff_core::test_support;
