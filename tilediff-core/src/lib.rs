//! Visual comparison of tiled map datasets.
//!
//! A dataset is opened as a [`TileStore`], regardless of whether it lives in
//! a GeoPackage or a directory tree. A [`Comparator`] then walks the tiles of
//! a reference store, looks each one up in a candidate store, and asks a
//! [`SimilarityJudge`] whether the pair is visually equal.
//!
//! ```no_run
//! use camino::Utf8Path;
//! use tilediff_core::{BackendKind, Comparator, SimilarityJudge, StoreOptions, open_store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reference = open_store(
//!     BackendKind::GeoPackage,
//!     Utf8Path::new("before.gpkg"),
//!     StoreOptions::default(),
//! )?;
//! let candidate = open_store(
//!     BackendKind::Filesystem,
//!     Utf8Path::new("after"),
//!     StoreOptions::default(),
//! )?;
//! let result = Comparator::new(SimilarityJudge::default())
//!     .compare(reference.as_ref(), candidate.as_ref())?;
//! println!("{:.3}", result.match_ratio());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod compare;
mod judge;
pub mod store;
mod tile;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use compare::{
    CompareError, Comparator, ComparisonMode, ComparisonResult, Mismatch, MismatchKind,
    TraversalOrder,
};
pub use judge::{
    DEFAULT_TILE_DIFF_THRESHOLD, DistortionMetric, JudgeError, RootMeanSquareError, Side,
    SimilarityJudge,
};
pub use store::{
    DEFAULT_BATCH_SIZE, StoreOptions, TileIter, TileStore, TileStoreError, open_store,
};
#[cfg(feature = "store-filesystem")]
pub use store::{FilesystemStore, TILE_EXTENSIONS};
#[cfg(feature = "store-geopackage")]
pub use store::GeoPackageStore;
pub use tile::{BackendKind, TileKey, TileRecord, TileScheme, UnknownBackendKind};
