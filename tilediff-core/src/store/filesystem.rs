//! Filesystem-backed tile store for `{z}/{x}/{y}.{ext}` tile trees.
//!
//! The tree is indexed once when the store is opened. Keys exposed by the
//! store always use the GeoPackage row convention; the configured
//! [`TileScheme`] only governs how rows map onto file names.

use std::collections::{HashMap, hash_map::Entry};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::Dir;
use tilediff_fs::{PathKind, open_utf8_dir, probe_path};

use crate::{BackendKind, TileKey, TileRecord, TileScheme};

use super::{TileIter, TileStore, TileStoreError};

/// File extensions recognised as tiles, matched case-insensitively.
pub const TILE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

#[derive(Debug)]
struct IndexedTile {
    key: TileKey,
    relative: Utf8PathBuf,
}

/// Read-only tile store over a directory tree.
#[derive(Debug)]
pub struct FilesystemStore {
    path: Utf8PathBuf,
    root: Option<Dir>,
    tiles: Vec<IndexedTile>,
    positions: HashMap<TileKey, usize>,
    tile_count: u64,
}

impl FilesystemStore {
    /// Open a tile tree laid out with TMS rows.
    ///
    /// # Errors
    /// Returns [`TileStoreError::NotFound`] when `path` does not exist,
    /// [`TileStoreError::Format`] when it is not a directory or holds a tile
    /// outside its zoom level's grid, and [`TileStoreError::Io`] when the
    /// tree cannot be listed.
    pub fn open(path: &Utf8Path) -> Result<Self, TileStoreError> {
        Self::open_with_scheme(path, TileScheme::default())
    }

    /// Open a tile tree whose rows follow `scheme`.
    ///
    /// # Errors
    /// See [`FilesystemStore::open`].
    pub fn open_with_scheme(path: &Utf8Path, scheme: TileScheme) -> Result<Self, TileStoreError> {
        match probe_path(path) {
            Ok(Some(PathKind::Directory)) => {}
            Ok(Some(_)) => {
                return Err(TileStoreError::Format {
                    path: path.to_path_buf(),
                    reason: "expected a tile directory".to_owned(),
                });
            }
            Ok(None) => {
                return Err(TileStoreError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => return Err(io_error(path, source)),
        }

        let root = open_utf8_dir(path).map_err(|source| io_error(path, source))?;
        let tiles = index_tree(&root, path, scheme)?;
        let positions: HashMap<_, _> = tiles
            .iter()
            .enumerate()
            .map(|(position, tile)| (tile.key, position))
            .collect();
        let tile_count = u64::try_from(tiles.len()).unwrap_or(u64::MAX);

        log::debug!("indexed {tile_count} tiles under {path} ({scheme:?} rows)");

        Ok(Self {
            path: path.to_path_buf(),
            root: Some(root),
            tiles,
            positions,
            tile_count,
        })
    }

    fn root(&self) -> Result<&Dir, TileStoreError> {
        self.root.as_ref().ok_or_else(|| TileStoreError::Closed {
            path: self.path.clone(),
        })
    }

    fn read(&self, root: &Dir, tile: &IndexedTile) -> Result<TileRecord, TileStoreError> {
        root.read(&tile.relative)
            .map(|blob| TileRecord::new(tile.key, blob))
            .map_err(|source| io_error(&self.path.join(&tile.relative), source))
    }
}

impl TileStore for FilesystemStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn location(&self) -> &Utf8Path {
        &self.path
    }

    fn all_tiles(&self) -> Result<TileIter<'_>, TileStoreError> {
        let root = self.root()?;
        Ok(Box::new(
            self.tiles.iter().map(move |tile| self.read(root, tile)),
        ))
    }

    fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError> {
        let root = self.root()?;
        let Some(tile) = self
            .positions
            .get(&key)
            .and_then(|&position| self.tiles.get(position))
        else {
            return Ok(None);
        };
        match self.read(root, tile) {
            Ok(record) => Ok(Some(record)),
            Err(TileStoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn tile_count(&self) -> u64 {
        self.tile_count
    }

    fn close(&mut self) -> Result<(), TileStoreError> {
        if self.root.take().is_some() {
            log::debug!("closed tile tree {}", self.path);
        }
        Ok(())
    }
}

fn index_tree(
    root: &Dir,
    path: &Utf8Path,
    scheme: TileScheme,
) -> Result<Vec<IndexedTile>, TileStoreError> {
    let mut tiles = Vec::new();
    let mut seen: HashMap<TileKey, Utf8PathBuf> = HashMap::new();

    for (zoom, zoom_dir) in numbered_dirs(root, path, Utf8Path::new(""))? {
        for (column, column_dir) in numbered_dirs(root, path, &zoom_dir)? {
            let column_handle = root
                .open_dir(&column_dir)
                .map_err(|source| io_error(&path.join(&column_dir), source))?;
            for listed_entry in column_handle
                .entries()
                .map_err(|source| io_error(&path.join(&column_dir), source))?
            {
                let entry =
                    listed_entry.map_err(|source| io_error(&path.join(&column_dir), source))?;
                let name = entry
                    .file_name()
                    .map_err(|source| io_error(&path.join(&column_dir), source))?;
                let relative = column_dir.join(&name);
                let is_file = entry
                    .file_type()
                    .map_err(|source| io_error(&path.join(&relative), source))?
                    .is_file();
                let Some(stored_row) = tile_row(&name).filter(|_| is_file) else {
                    log::debug!("ignoring {} in tile tree", path.join(&relative));
                    continue;
                };
                let stored = TileKey::new(zoom, column, stored_row);
                let key = scheme.convert(stored).ok_or_else(|| TileStoreError::Format {
                    path: path.to_path_buf(),
                    reason: format!("tile {relative} lies outside the grid of zoom {zoom}"),
                })?;
                match seen.entry(key) {
                    Entry::Occupied(existing) => {
                        log::warn!(
                            "skipping {relative}: tile {key} already read from {}",
                            existing.get()
                        );
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(relative.clone());
                        tiles.push(IndexedTile { key, relative });
                    }
                }
            }
        }
    }

    Ok(tiles)
}

/// Subdirectories of `relative` whose names are plain numbers.
fn numbered_dirs(
    root: &Dir,
    path: &Utf8Path,
    relative: &Utf8Path,
) -> Result<Vec<(u32, Utf8PathBuf)>, TileStoreError> {
    let listed = if relative.as_str().is_empty() {
        root.entries()
    } else {
        root.read_dir(relative)
    };
    let listing = listed.map_err(|source| io_error(&path.join(relative), source))?;

    let mut dirs = Vec::new();
    for listed_entry in listing {
        let entry = listed_entry.map_err(|source| io_error(&path.join(relative), source))?;
        let name = entry
            .file_name()
            .map_err(|source| io_error(&path.join(relative), source))?;
        let child = relative.join(&name);
        let is_dir = entry
            .file_type()
            .map_err(|source| io_error(&path.join(&child), source))?
            .is_dir();
        match name.parse::<u32>() {
            Ok(number) if is_dir => dirs.push((number, child)),
            _ => log::debug!("ignoring {} in tile tree", path.join(&child)),
        }
    }
    Ok(dirs)
}

/// Parse `{row}.{ext}` where `ext` is a recognised image extension.
fn tile_row(name: &str) -> Option<u32> {
    let file = Utf8Path::new(name);
    let extension = file.extension()?;
    if !TILE_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(extension))
    {
        return None;
    }
    file.file_stem()?.parse().ok()
}

fn io_error(path: &Utf8Path, source: io::Error) -> TileStoreError {
    TileStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
