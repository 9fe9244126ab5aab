//! Test helpers for writing tile datasets and invoking the compare command.

use super::*;
use crate::compare::{DefaultStoreOpener, run_compare_with};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tempfile::TempDir;
use tilediff_core::TileKey;
use tilediff_core::test_support::{solid_png, write_geopackage};

pub(super) const RED: [u8; 4] = [255, 0, 0, 255];
pub(super) const GREEN: [u8; 4] = [0, 255, 0, 255];
pub(super) const BLUE: [u8; 4] = [0, 0, 255, 255];

pub(super) fn three_tiles() -> [(TileKey, [u8; 4]); 3] {
    [
        (TileKey::new(0, 0, 0), RED),
        (TileKey::new(1, 0, 0), GREEN),
        (TileKey::new(1, 0, 1), BLUE),
    ]
}

/// Temporary workspace holding the datasets a scenario compares.
#[derive(Debug)]
pub(super) struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub(super) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub(super) fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).expect("utf-8 workspace")
    }

    pub(super) fn geopackage(&self, name: &str, tiles: &[(TileKey, [u8; 4])]) -> Utf8PathBuf {
        let path = self.root().join(name);
        let rows: Vec<_> = tiles
            .iter()
            .map(|&(key, rgba)| (key, Some(solid_png(4, 4, rgba))))
            .collect();
        write_geopackage(path.as_std_path(), "tiles", &rows).expect("write geopackage");
        path
    }

    pub(super) fn tms_tree(&self, name: &str, tiles: &[(TileKey, [u8; 4])]) -> Utf8PathBuf {
        let root = self.root().join(name);
        for &(key, rgba) in tiles {
            let flipped = key.flip_row().expect("row inside grid");
            let dir = root.join(key.zoom.to_string()).join(key.column.to_string());
            fs::create_dir_all(&dir).expect("create tile directory");
            write_utf8(&dir.join(format!("{}.png", flipped.row)), &solid_png(4, 4, rgba));
        }
        root
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    fs::write(path, contents).expect("write file");
}

/// Parse `tilediff compare <args>` and run it, capturing the report.
pub(super) fn invoke_compare(args: &[String]) -> (Result<Verdict, CliError>, String) {
    let mut invocation = vec!["tilediff".to_owned(), "compare".to_owned()];
    invocation.extend(args.iter().cloned());
    let mut report = Vec::new();
    let outcome = Cli::try_parse_from(invocation)
        .map_err(CliError::ArgumentParsing)
        .and_then(|cli| match cli.command {
            Command::Compare(cmd) => run_compare_with(cmd, &DefaultStoreOpener, &mut report),
        });
    let text = String::from_utf8(report).expect("utf-8 report");
    (outcome, text)
}
