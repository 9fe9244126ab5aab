//! Test-only stores and fixture writers used by unit and behaviour tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;

use camino::{Utf8Path, Utf8PathBuf};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::{BackendKind, TileIter, TileKey, TileRecord, TileStore, TileStoreError};

/// In-memory `TileStore` that walks tiles in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tiles: Vec<TileRecord>,
    positions: HashMap<TileKey, usize>,
    closed: bool,
}

impl MemoryStore {
    /// Create a store from records; later duplicates replace earlier ones.
    #[must_use]
    pub fn with_tiles<I>(tiles: I) -> Self
    where
        I: IntoIterator<Item = TileRecord>,
    {
        let mut store = Self::default();
        for record in tiles {
            if let Some(&position) = store.positions.get(&record.key) {
                if let Some(slot) = store.tiles.get_mut(position) {
                    *slot = record;
                }
            } else {
                store.positions.insert(record.key, store.tiles.len());
                store.tiles.push(record);
            }
        }
        store
    }

    fn ensure_open(&self) -> Result<(), TileStoreError> {
        if self.closed {
            Err(TileStoreError::Closed {
                path: Utf8PathBuf::from("memory"),
            })
        } else {
            Ok(())
        }
    }
}

impl TileStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::GeoPackage
    }

    fn location(&self) -> &Utf8Path {
        Utf8Path::new("memory")
    }

    fn all_tiles(&self) -> Result<TileIter<'_>, TileStoreError> {
        self.ensure_open()?;
        Ok(Box::new(self.tiles.iter().cloned().map(Ok)))
    }

    fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError> {
        self.ensure_open()?;
        Ok(self
            .positions
            .get(&key)
            .and_then(|&position| self.tiles.get(position))
            .cloned())
    }

    fn tile_count(&self) -> u64 {
        u64::try_from(self.tiles.len()).unwrap_or(u64::MAX)
    }

    fn close(&mut self) -> Result<(), TileStoreError> {
        self.closed = true;
        Ok(())
    }
}

/// Wraps a store and records every coordinate passed to [`TileStore::tile`].
#[derive(Debug)]
pub struct RecordingStore<S> {
    inner: S,
    queried: RefCell<Vec<TileKey>>,
}

impl<S: TileStore> RecordingStore<S> {
    /// Start recording lookups against `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            queried: RefCell::new(Vec::new()),
        }
    }

    /// Coordinates looked up so far, in call order.
    #[must_use]
    pub fn queried(&self) -> Vec<TileKey> {
        self.queried.borrow().clone()
    }
}

impl<S: TileStore> TileStore for RecordingStore<S> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn location(&self) -> &Utf8Path {
        self.inner.location()
    }

    fn all_tiles(&self) -> Result<TileIter<'_>, TileStoreError> {
        self.inner.all_tiles()
    }

    fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError> {
        self.queried.borrow_mut().push(key);
        self.inner.tile(key)
    }

    fn tile_count(&self) -> u64 {
        self.inner.tile_count()
    }

    fn close(&mut self) -> Result<(), TileStoreError> {
        self.inner.close()
    }
}

/// Encode a single-colour PNG tile.
#[must_use]
pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(rgba)));
    let mut bytes = Cursor::new(Vec::new());
    if image.write_to(&mut bytes, ImageFormat::Png).is_err() {
        return Vec::new();
    }
    bytes.into_inner()
}

/// Write a minimal GeoPackage with one tile table registered in
/// `gpkg_contents`. `None` payloads are stored as NULL `tile_data`.
#[cfg(feature = "store-geopackage")]
pub fn write_geopackage(
    path: &std::path::Path,
    table: &str,
    tiles: &[(TileKey, Option<Vec<u8>>)],
) -> rusqlite::Result<()> {
    let quoted = format!("\"{}\"", table.replace('"', "\"\""));
    let mut connection = rusqlite::Connection::open(path)?;
    let transaction = connection.transaction()?;
    transaction.execute_batch(&format!(
        "CREATE TABLE gpkg_contents (
            table_name TEXT NOT NULL PRIMARY KEY,
            data_type TEXT NOT NULL,
            identifier TEXT UNIQUE,
            description TEXT DEFAULT '',
            last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            min_x DOUBLE,
            min_y DOUBLE,
            max_x DOUBLE,
            max_y DOUBLE,
            srs_id INTEGER
        );
        CREATE TABLE {quoted} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            zoom_level INTEGER NOT NULL,
            tile_column INTEGER NOT NULL,
            tile_row INTEGER NOT NULL,
            tile_data BLOB,
            UNIQUE (zoom_level, tile_column, tile_row)
        );"
    ))?;
    transaction.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier) VALUES (?1, 'tiles', ?1)",
        [table],
    )?;
    {
        let mut insert = transaction.prepare(&format!(
            "INSERT INTO {quoted} (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)"
        ))?;
        for (key, blob) in tiles {
            insert.execute(rusqlite::params![key.zoom, key.column, key.row, blob])?;
        }
    }
    transaction.commit()
}
