//! Read-only access to tiled datasets.
//!
//! The [`TileStore`] trait normalises the supported backends into a single
//! contract: a lazy walk over every tile, exact-key lookup, and a tile count
//! captured when the store is opened. Use [`open_store`] to construct the
//! variant matching a [`BackendKind`].

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::{BackendKind, TileKey, TileRecord, TileScheme};

#[cfg(feature = "store-filesystem")]
mod filesystem;
#[cfg(feature = "store-geopackage")]
mod geopackage;

#[cfg(feature = "store-filesystem")]
pub use filesystem::{FilesystemStore, TILE_EXTENSIONS};
#[cfg(feature = "store-geopackage")]
pub use geopackage::GeoPackageStore;

/// Rows fetched per page when walking a GeoPackage.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Lazy, single-pass sequence of tiles produced by [`TileStore::all_tiles`].
pub type TileIter<'a> = Box<dyn Iterator<Item = Result<TileRecord, TileStoreError>> + 'a>;

/// Errors raised while opening or reading a tile store.
#[derive(Debug, Error)]
pub enum TileStoreError {
    /// The dataset location does not exist.
    #[error("dataset {path} does not exist")]
    NotFound {
        /// Requested location.
        path: Utf8PathBuf,
    },
    /// The location exists but is not a dataset of the declared kind.
    #[error("dataset {path} is not readable as declared: {reason}")]
    Format {
        /// Requested location.
        path: Utf8PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// The backend has no implementation yet.
    #[error("{kind} datasets are not supported yet")]
    Unsupported {
        /// Backend that was requested.
        kind: BackendKind,
    },
    /// The store was used after [`TileStore::close`].
    #[error("dataset {path} has already been closed")]
    Closed {
        /// Location of the closed store.
        path: Utf8PathBuf,
    },
    /// Querying a GeoPackage failed.
    #[cfg(feature = "store-geopackage")]
    #[error("failed to query GeoPackage {path}: {source}")]
    Database {
        /// Location of the GeoPackage.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// Reading from the filesystem failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Source error from std I/O.
        #[source]
        source: std::io::Error,
    },
}

/// Read-only access to one opened tiled dataset.
///
/// Implementations own their handle exclusively and release it on
/// [`close`](TileStore::close) or when dropped.
///
/// # Examples
///
/// ```rust
/// use camino::Utf8Path;
/// use tilediff_core::{BackendKind, TileIter, TileKey, TileRecord, TileStore, TileStoreError};
///
/// struct SingleTile(TileRecord);
///
/// impl TileStore for SingleTile {
///     fn kind(&self) -> BackendKind {
///         BackendKind::Filesystem
///     }
///
///     fn location(&self) -> &Utf8Path {
///         Utf8Path::new("memory")
///     }
///
///     fn all_tiles(&self) -> Result<TileIter<'_>, TileStoreError> {
///         Ok(Box::new(std::iter::once(Ok(self.0.clone()))))
///     }
///
///     fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError> {
///         Ok((key == self.0.key).then(|| self.0.clone()))
///     }
///
///     fn tile_count(&self) -> u64 {
///         1
///     }
///
///     fn close(&mut self) -> Result<(), TileStoreError> {
///         Ok(())
///     }
/// }
///
/// let store = SingleTile(TileRecord::new(TileKey::new(0, 0, 0), vec![1, 2, 3]));
/// assert!(store.tile(TileKey::new(1, 0, 0)).expect("lookup").is_none());
/// assert_eq!(store.all_tiles().expect("walk").count(), 1);
/// ```
pub trait TileStore {
    /// Backend this store reads from.
    fn kind(&self) -> BackendKind;

    /// Location the store was opened from.
    fn location(&self) -> &Utf8Path;

    /// Walk every tile once, in the order the storage naturally yields them.
    ///
    /// The order is not guaranteed to be sorted by coordinate.
    fn all_tiles(&self) -> Result<TileIter<'_>, TileStoreError>;

    /// Look up a single tile by its exact coordinate.
    ///
    /// A missing coordinate is `Ok(None)`, not an error.
    fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError>;

    /// Number of tiles, counted once when the store was opened.
    fn tile_count(&self) -> u64;

    /// Release the underlying handle. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TileStoreError>;
}

/// Backend-specific knobs for [`open_store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Rows fetched per GeoPackage page while walking all tiles.
    pub batch_size: usize,
    /// Row convention of filesystem tile trees.
    pub scheme: TileScheme,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            scheme: TileScheme::default(),
        }
    }
}

/// Open the store variant for `kind` at `location`.
///
/// # Errors
/// Returns [`TileStoreError::Unsupported`] for object storage and for
/// backends compiled out of this build, and otherwise propagates the
/// variant's open errors.
pub fn open_store(
    kind: BackendKind,
    location: &Utf8Path,
    options: StoreOptions,
) -> Result<Box<dyn TileStore>, TileStoreError> {
    log::debug!("opening {kind} dataset at {location}");
    match kind {
        BackendKind::GeoPackage => open_geopackage(location, options),
        BackendKind::Filesystem => open_filesystem(location, options),
        BackendKind::ObjectStorage => Err(TileStoreError::Unsupported { kind }),
    }
}

#[cfg(feature = "store-geopackage")]
fn open_geopackage(
    location: &Utf8Path,
    options: StoreOptions,
) -> Result<Box<dyn TileStore>, TileStoreError> {
    let store = GeoPackageStore::open_with_batch_size(location, options.batch_size)?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "store-geopackage"))]
const fn open_geopackage(
    _location: &Utf8Path,
    _options: StoreOptions,
) -> Result<Box<dyn TileStore>, TileStoreError> {
    Err(TileStoreError::Unsupported {
        kind: BackendKind::GeoPackage,
    })
}

#[cfg(feature = "store-filesystem")]
fn open_filesystem(
    location: &Utf8Path,
    options: StoreOptions,
) -> Result<Box<dyn TileStore>, TileStoreError> {
    let store = FilesystemStore::open_with_scheme(location, options.scheme)?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "store-filesystem"))]
const fn open_filesystem(
    _location: &Utf8Path,
    _options: StoreOptions,
) -> Result<Box<dyn TileStore>, TileStoreError> {
    Err(TileStoreError::Unsupported {
        kind: BackendKind::Filesystem,
    })
}
