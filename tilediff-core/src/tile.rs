//! Tile coordinates, payloads, and backend tags.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Exact `(zoom, column, row)` coordinate of a tile.
///
/// Rows follow the GeoPackage convention: row `0` is the top of the grid.
/// Stores with another convention convert at their boundary.
///
/// # Examples
///
/// ```
/// use tilediff_core::TileKey;
///
/// let key = TileKey::new(1, 0, 1);
/// assert_eq!(key.to_string(), "1/0/1");
/// assert_eq!(key.flip_row(), Some(TileKey::new(1, 0, 0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Zoom level.
    pub zoom: u32,
    /// Column (x).
    pub column: u32,
    /// Row (y).
    pub row: u32,
}

impl TileKey {
    /// Construct a key from its three coordinates.
    #[must_use]
    pub const fn new(zoom: u32, column: u32, row: u32) -> Self {
        Self { zoom, column, row }
    }

    /// Convert the row between the top-origin and bottom-origin conventions.
    ///
    /// Returns `None` when the row does not fit the grid of this zoom level.
    #[must_use]
    pub fn flip_row(self) -> Option<Self> {
        let rows = 1_u64.checked_shl(self.zoom)?;
        let last = rows.checked_sub(1)?;
        let flipped = last.checked_sub(u64::from(self.row))?;
        let row = u32::try_from(flipped).ok()?;
        Some(Self { row, ..self })
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// A tile and its raw payload.
///
/// An empty `blob` means the tile exists without data; it is not the same as
/// a lookup miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRecord {
    /// Coordinate of the tile.
    pub key: TileKey,
    /// Encoded image bytes, possibly empty.
    pub blob: Vec<u8>,
}

impl TileRecord {
    /// Construct a record from a key and its payload.
    #[must_use]
    pub const fn new(key: TileKey, blob: Vec<u8>) -> Self {
        Self { key, blob }
    }
}

/// Storage backends a dataset can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// A GeoPackage (SQLite) tile archive.
    GeoPackage,
    /// A `{z}/{x}/{y}.{ext}` tile tree on the local filesystem.
    Filesystem,
    /// A tile tree in an object-storage bucket.
    ObjectStorage,
}

impl BackendKind {
    /// Every backend, in tag order.
    pub const ALL: [Self; 3] = [Self::GeoPackage, Self::Filesystem, Self::ObjectStorage];

    /// Command-line tag naming this backend.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::GeoPackage => "gpkg",
            Self::Filesystem => "fs",
            Self::ObjectStorage => "s3",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when a backend tag is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown backend kind {tag:?} (expected one of: gpkg, fs, s3)")]
pub struct UnknownBackendKind {
    /// The rejected tag.
    pub tag: String,
}

impl FromStr for BackendKind {
    type Err = UnknownBackendKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| UnknownBackendKind { tag: s.to_owned() })
    }
}

/// Row numbering used by a filesystem tile tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileScheme {
    /// Row `0` at the top, matching GeoPackage.
    Xyz,
    /// Row `0` at the bottom.
    #[default]
    Tms,
}

impl TileScheme {
    /// Translate a row between this scheme and the GeoPackage convention.
    ///
    /// The conversion is its own inverse, so the same call maps both ways.
    #[must_use]
    pub fn convert(self, key: TileKey) -> Option<TileKey> {
        match self {
            Self::Xyz => Some(key),
            Self::Tms => key.flip_row(),
        }
    }
}

impl FromStr for TileScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xyz" => Ok(Self::Xyz),
            "tms" => Ok(Self::Tms),
            other => Err(format!("unknown tile scheme {other:?} (expected xyz or tms)")),
        }
    }
}
