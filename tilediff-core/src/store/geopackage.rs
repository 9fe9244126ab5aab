//! GeoPackage-backed tile store.

use std::{collections::VecDeque, fmt};

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, types::ValueRef};
use tilediff_fs::{PathKind, probe_path};

use crate::{BackendKind, TileKey, TileRecord};

use super::{DEFAULT_BATCH_SIZE, TileIter, TileStore, TileStoreError};

/// Read-only tile store over the tile table named by `gpkg_contents`.
pub struct GeoPackageStore {
    path: Utf8PathBuf,
    connection: Option<Connection>,
    table: String,
    tile_count: u64,
    batch_size: usize,
}

impl fmt::Debug for GeoPackageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoPackageStore")
            .field("path", &self.path)
            .field("table", &self.table)
            .field("tile_count", &self.tile_count)
            .field("open", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl GeoPackageStore {
    /// Open a GeoPackage read-only, paging [`DEFAULT_BATCH_SIZE`] rows at a time.
    ///
    /// # Errors
    /// Returns [`TileStoreError::NotFound`] when `path` does not exist and
    /// [`TileStoreError::Format`] when it is not a GeoPackage with a tile
    /// table registered in `gpkg_contents`.
    pub fn open(path: &Utf8Path) -> Result<Self, TileStoreError> {
        Self::open_with_batch_size(path, DEFAULT_BATCH_SIZE)
    }

    /// Open a GeoPackage read-only with an explicit page size for
    /// [`TileStore::all_tiles`]. A page size of zero is treated as one.
    ///
    /// # Errors
    /// See [`GeoPackageStore::open`].
    pub fn open_with_batch_size(path: &Utf8Path, batch_size: usize) -> Result<Self, TileStoreError> {
        match probe_path(path) {
            Ok(Some(PathKind::File)) => {}
            Ok(Some(_)) => return Err(format_error(path, "expected a GeoPackage file")),
            Ok(None) => {
                return Err(TileStoreError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(TileStoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let connection =
            Connection::open_with_flags(path.as_std_path(), OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|source| TileStoreError::Database {
                    path: path.to_path_buf(),
                    source,
                })?;

        let table_name = discover_tile_table(&connection, path)?;
        let table = quote_identifier(&table_name);
        let tile_count = count_tiles(&connection, &table)
            .map_err(|err| format_error(path, &format!("cannot count tiles in {table}: {err}")))?;

        log::debug!("opened GeoPackage {path}: {tile_count} tiles in {table}");

        Ok(Self {
            path: path.to_path_buf(),
            connection: Some(connection),
            table,
            tile_count,
            batch_size: batch_size.max(1),
        })
    }

    fn connection(&self) -> Result<&Connection, TileStoreError> {
        self.connection.as_ref().ok_or_else(|| TileStoreError::Closed {
            path: self.path.clone(),
        })
    }

    fn database_error(&self, source: rusqlite::Error) -> TileStoreError {
        TileStoreError::Database {
            path: self.path.clone(),
            source,
        }
    }
}

impl TileStore for GeoPackageStore {
    fn kind(&self) -> BackendKind {
        BackendKind::GeoPackage
    }

    fn location(&self) -> &Utf8Path {
        &self.path
    }

    fn all_tiles(&self) -> Result<TileIter<'_>, TileStoreError> {
        let connection = self.connection()?;
        Ok(Box::new(TilePages {
            store: self,
            connection,
            after_rowid: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError> {
        let connection = self.connection()?;
        let query = format!(
            "SELECT tile_data FROM {} WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            self.table
        );
        let mut statement = connection
            .prepare_cached(&query)
            .map_err(|source| self.database_error(source))?;
        let lookup = statement
            .query_row([key.zoom, key.column, key.row], |row| {
                Ok(blob_from_value(row.get_ref(0)?))
            })
            .optional()
            .map_err(|source| self.database_error(source))?;

        match lookup {
            None => Ok(None),
            Some(Some(blob)) => Ok(Some(TileRecord::new(key, blob))),
            Some(None) => Err(format_error(
                &self.path,
                &format!("tile {key} has non-binary tile_data"),
            )),
        }
    }

    fn tile_count(&self) -> u64 {
        self.tile_count
    }

    fn close(&mut self) -> Result<(), TileStoreError> {
        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .map_err(|(_, source)| self.database_error(source))?;
            log::debug!("closed GeoPackage {}", self.path);
        }
        Ok(())
    }
}

/// Keyset-paginated walk over the tile table in rowid order.
struct TilePages<'a> {
    store: &'a GeoPackageStore,
    connection: &'a Connection,
    after_rowid: Option<i64>,
    buffer: VecDeque<Result<TileRecord, TileStoreError>>,
    exhausted: bool,
}

impl TilePages<'_> {
    fn fill(&mut self) -> Result<(), TileStoreError> {
        let store = self.store;
        let connection = self.connection;
        let query = format!(
            "SELECT rowid, zoom_level, tile_column, tile_row, tile_data FROM {} \
             WHERE ?1 IS NULL OR rowid > ?1 ORDER BY rowid LIMIT ?2",
            store.table
        );
        let limit = i64::try_from(store.batch_size).unwrap_or(i64::MAX);
        let mut statement = connection
            .prepare_cached(&query)
            .map_err(|source| store.database_error(source))?;
        let mut rows = statement
            .query(rusqlite::params![self.after_rowid, limit])
            .map_err(|source| store.database_error(source))?;

        let mut fetched = 0_usize;
        while let Some(row) = rows.next().map_err(|source| store.database_error(source))? {
            fetched += 1;
            let rowid: i64 = row.get(0).map_err(|source| store.database_error(source))?;
            self.after_rowid = Some(rowid);
            match decode_row(row, rowid, &store.path) {
                Ok(record) => self.buffer.push_back(Ok(record)),
                Err(err) => {
                    self.buffer.push_back(Err(err));
                    self.exhausted = true;
                    return Ok(());
                }
            }
        }

        if fetched < store.batch_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for TilePages<'_> {
    type Item = Result<TileRecord, TileStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty()
            && !self.exhausted
            && let Err(err) = self.fill()
        {
            self.exhausted = true;
            return Some(Err(err));
        }
        self.buffer.pop_front()
    }
}

fn decode_row(row: &Row<'_>, rowid: i64, path: &Utf8Path) -> Result<TileRecord, TileStoreError> {
    let coordinate = |index: usize, column: &str| -> Result<u32, TileStoreError> {
        let raw: i64 = row.get(index).map_err(|source| TileStoreError::Database {
            path: path.to_path_buf(),
            source,
        })?;
        u32::try_from(raw).map_err(|_| {
            format_error(
                path,
                &format!("row {rowid} has out-of-range {column} {raw}"),
            )
        })
    };
    let key = TileKey::new(
        coordinate(1, "zoom_level")?,
        coordinate(2, "tile_column")?,
        coordinate(3, "tile_row")?,
    );
    let value = row.get_ref(4).map_err(|source| TileStoreError::Database {
        path: path.to_path_buf(),
        source,
    })?;
    let blob = blob_from_value(value)
        .ok_or_else(|| format_error(path, &format!("row {rowid} has non-binary tile_data")))?;
    Ok(TileRecord::new(key, blob))
}

/// NULL tile data reads as an empty payload.
fn blob_from_value(value: ValueRef<'_>) -> Option<Vec<u8>> {
    match value {
        ValueRef::Null => Some(Vec::new()),
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Some(bytes.to_vec()),
        ValueRef::Integer(_) | ValueRef::Real(_) => None,
    }
}

fn discover_tile_table(connection: &Connection, path: &Utf8Path) -> Result<String, TileStoreError> {
    connection
        .query_row(
            "SELECT table_name FROM gpkg_contents WHERE data_type = 'tiles' ORDER BY rowid LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => {
                format_error(path, "gpkg_contents does not register a tile table")
            }
            other => format_error(path, &format!("cannot read gpkg_contents: {other}")),
        })
}

fn count_tiles(connection: &Connection, table: &str) -> rusqlite::Result<u64> {
    let count: i64 = connection.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn format_error(path: &Utf8Path, reason: &str) -> TileStoreError {
    TileStoreError::Format {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_geopackage;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    fn key(zoom: u32, column: u32, row: u32) -> TileKey {
        TileKey::new(zoom, column, row)
    }

    #[fixture]
    fn workspace() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("tiles.gpkg")).expect("utf-8 path");
        (dir, path)
    }

    #[fixture]
    fn unsorted_tiles() -> Vec<(TileKey, Option<Vec<u8>>)> {
        vec![
            (key(1, 0, 1), Some(vec![3])),
            (key(0, 0, 0), Some(vec![1])),
            (key(1, 0, 0), None),
        ]
    }

    #[rstest]
    fn walks_tiles_in_table_order(
        workspace: (TempDir, Utf8PathBuf),
        unsorted_tiles: Vec<(TileKey, Option<Vec<u8>>)>,
    ) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &unsorted_tiles).expect("write gpkg");

        let store = GeoPackageStore::open(&path).expect("open store");
        let keys: Vec<_> = store
            .all_tiles()
            .expect("walk")
            .map(|record| record.expect("row decodes").key)
            .collect();

        assert_eq!(keys, vec![key(1, 0, 1), key(0, 0, 0), key(1, 0, 0)]);
        assert_eq!(store.tile_count(), 3);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(0)]
    fn paging_yields_every_tile_once(
        workspace: (TempDir, Utf8PathBuf),
        unsorted_tiles: Vec<(TileKey, Option<Vec<u8>>)>,
        #[case] batch_size: usize,
    ) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &unsorted_tiles).expect("write gpkg");

        let store = GeoPackageStore::open_with_batch_size(&path, batch_size).expect("open store");
        let walked: Vec<_> = store
            .all_tiles()
            .expect("walk")
            .collect::<Result<_, _>>()
            .expect("rows decode");
        assert_eq!(walked.len(), 3);
    }

    #[rstest]
    fn lookup_distinguishes_null_data_from_missing_tiles(
        workspace: (TempDir, Utf8PathBuf),
        unsorted_tiles: Vec<(TileKey, Option<Vec<u8>>)>,
    ) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &unsorted_tiles).expect("write gpkg");
        let store = GeoPackageStore::open(&path).expect("open store");

        let null_tile = store
            .tile(key(1, 0, 0))
            .expect("lookup")
            .expect("tile with null data exists");
        assert!(null_tile.blob.is_empty());

        let hit = store.tile(key(1, 0, 1)).expect("lookup").expect("tile exists");
        assert_eq!(hit.blob, vec![3]);

        assert!(store.tile(key(1, 1, 1)).expect("lookup").is_none());
    }

    #[rstest]
    fn tile_count_is_a_snapshot(
        workspace: (TempDir, Utf8PathBuf),
        unsorted_tiles: Vec<(TileKey, Option<Vec<u8>>)>,
    ) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &unsorted_tiles).expect("write gpkg");
        let store = GeoPackageStore::open(&path).expect("open store");

        let writer = Connection::open(path.as_std_path()).expect("open writer");
        writer
            .execute(
                "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (2, 0, 0, x'00')",
                [],
            )
            .expect("append tile");

        assert_eq!(store.tile_count(), 3);
    }

    #[rstest]
    fn missing_file_is_not_found(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        let err = GeoPackageStore::open(&path).expect_err("missing file should fail");
        assert!(matches!(err, TileStoreError::NotFound { .. }));
    }

    #[rstest]
    fn directory_is_a_format_error(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        fs::create_dir(&path).expect("create dir");
        let err = GeoPackageStore::open(&path).expect_err("directory should fail");
        assert!(matches!(err, TileStoreError::Format { .. }));
    }

    #[rstest]
    fn non_sqlite_file_is_a_format_error(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        fs::write(&path, b"definitely not a database, just some bytes").expect("write file");
        let err = GeoPackageStore::open(&path).expect_err("garbage should fail");
        assert!(matches!(err, TileStoreError::Format { .. }));
    }

    #[rstest]
    fn missing_contents_row_is_a_format_error(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &[]).expect("write gpkg");
        let writer = Connection::open(path.as_std_path()).expect("open writer");
        writer
            .execute("DELETE FROM gpkg_contents", [])
            .expect("clear contents");

        let err = GeoPackageStore::open(&path).expect_err("no contents row should fail");
        match err {
            TileStoreError::Format { reason, .. } => assert!(reason.contains("gpkg_contents")),
            other => panic!("expected Format, found {other:?}"),
        }
    }

    #[rstest]
    fn unregistered_table_is_a_format_error(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &[]).expect("write gpkg");
        let writer = Connection::open(path.as_std_path()).expect("open writer");
        writer.execute("DROP TABLE tiles", []).expect("drop table");

        let err = GeoPackageStore::open(&path).expect_err("dangling contents row should fail");
        assert!(matches!(err, TileStoreError::Format { .. }));
    }

    #[rstest]
    fn quoted_table_names_are_supported(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "my \"odd\" tiles", &[(key(0, 0, 0), Some(vec![9]))])
            .expect("write gpkg");
        let store = GeoPackageStore::open(&path).expect("open store");
        assert_eq!(store.tile_count(), 1);
        assert!(store.tile(key(0, 0, 0)).expect("lookup").is_some());
    }

    #[rstest]
    fn negative_coordinates_surface_during_the_walk(workspace: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &[(key(0, 0, 0), Some(vec![1]))])
            .expect("write gpkg");
        let writer = Connection::open(path.as_std_path()).expect("open writer");
        writer
            .execute(
                "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (1, -1, 0, x'00')",
                [],
            )
            .expect("insert bad row");

        let store = GeoPackageStore::open(&path).expect("open store");
        let results: Vec<_> = store.all_tiles().expect("walk").collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(TileStoreError::Format { .. })));
    }

    #[rstest]
    fn close_is_idempotent_and_blocks_reads(
        workspace: (TempDir, Utf8PathBuf),
        unsorted_tiles: Vec<(TileKey, Option<Vec<u8>>)>,
    ) {
        let (_dir, path) = workspace;
        write_geopackage(path.as_std_path(), "tiles", &unsorted_tiles).expect("write gpkg");
        let mut store = GeoPackageStore::open(&path).expect("open store");

        store.close().expect("first close");
        store.close().expect("second close");

        assert!(matches!(
            store.tile(key(0, 0, 0)),
            Err(TileStoreError::Closed { .. })
        ));
        assert!(matches!(store.all_tiles(), Err(TileStoreError::Closed { .. })));
        assert_eq!(store.tile_count(), 3);
    }
}
