//! Dataset-level comparison between two tile stores.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::{JudgeError, SimilarityJudge, TileKey, TileRecord, TileStore, TileStoreError};

/// How the comparator reacts to a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonMode {
    /// Stop at the first missing or dissimilar tile. Tiles after it count
    /// as unmatched without being examined.
    #[default]
    StopAtFirstMismatch,
    /// Examine every reference tile and count every mismatch.
    Exhaustive,
}

/// Order in which reference tiles are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    /// Whatever order the reference store yields.
    #[default]
    Native,
    /// Ascending `(zoom, column, row)`.
    Sorted,
}

/// Why a reference tile failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// The candidate has no tile at this coordinate.
    Missing,
    /// Both tiles exist but are not visually equal.
    Dissimilar,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing from candidate",
            Self::Dissimilar => "visually different",
        })
    }
}

/// A reference tile that did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Coordinate of the tile.
    pub key: TileKey,
    /// Why it failed.
    pub kind: MismatchKind,
}

/// Outcome of one [`Comparator::compare`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonResult {
    /// Reference tiles that matched.
    pub matched: u64,
    /// Reference tiles that were looked up in the candidate.
    pub examined: u64,
    /// Tile count of the reference store; the ratio's denominator.
    pub total: u64,
    /// Mismatches found. At most one unless the walk was exhaustive.
    pub mismatches: u64,
    /// Earliest mismatch in traversal order.
    pub first_mismatch: Option<Mismatch>,
}

impl ComparisonResult {
    /// Fraction of reference tiles that matched, in `0.0..=1.0`.
    ///
    /// With the default stop-at-first-mismatch mode this is a prefix ratio:
    /// anything below `1.0` only says where the walk stopped.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        clippy::cast_precision_loss,
        reason = "the ratio is reported as a float"
    )]
    pub const fn match_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        debug_assert!(self.matched <= self.total, "matched more tiles than exist");
        self.matched as f64 / self.total as f64
    }

    /// Whether every reference tile matched.
    #[must_use]
    pub const fn is_match(&self) -> bool {
        self.first_mismatch.is_none() && self.matched == self.total
    }
}

/// Errors that abort a comparison.
#[derive(Debug, Error)]
pub enum CompareError {
    /// The reference store holds no tiles, so no ratio exists.
    #[error("reference dataset {location} contains no tiles")]
    EmptyReference {
        /// Location of the reference store.
        location: Utf8PathBuf,
    },
    /// Reading either store failed.
    #[error(transparent)]
    Store(#[from] TileStoreError),
    /// A tile could not be judged.
    #[error("failed to compare tile {key}: {source}")]
    Judge {
        /// Coordinate being compared.
        key: TileKey,
        /// Underlying judge failure.
        #[source]
        source: JudgeError,
    },
}

/// Walks a reference store and checks each tile against a candidate store.
///
/// # Examples
///
/// ```
/// use tilediff_core::{Comparator, ComparisonMode, SimilarityJudge, TraversalOrder};
///
/// let comparator = Comparator::new(SimilarityJudge::default())
///     .mode(ComparisonMode::Exhaustive)
///     .order(TraversalOrder::Sorted);
/// assert_eq!(comparator.comparison_mode(), ComparisonMode::Exhaustive);
/// ```
#[derive(Debug, Default)]
pub struct Comparator {
    judge: SimilarityJudge,
    mode: ComparisonMode,
    order: TraversalOrder,
}

impl Comparator {
    /// Comparator stopping at the first mismatch in native order.
    #[must_use]
    pub fn new(judge: SimilarityJudge) -> Self {
        Self {
            judge,
            mode: ComparisonMode::default(),
            order: TraversalOrder::default(),
        }
    }

    /// Set the mismatch policy.
    #[must_use]
    pub const fn mode(mut self, mode: ComparisonMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the traversal order.
    #[must_use]
    pub const fn order(mut self, order: TraversalOrder) -> Self {
        self.order = order;
        self
    }

    /// Configured mismatch policy.
    #[must_use]
    pub const fn comparison_mode(&self) -> ComparisonMode {
        self.mode
    }

    /// Configured traversal order.
    #[must_use]
    pub const fn traversal_order(&self) -> TraversalOrder {
        self.order
    }

    /// Compare every tile of `reference` against `candidate`.
    ///
    /// The ratio's denominator is always the reference tile count, so the
    /// comparison is not symmetric.
    ///
    /// # Errors
    /// Returns [`CompareError::EmptyReference`] when the reference has no
    /// tiles, and propagates store read failures and undecodable payloads.
    pub fn compare(
        &self,
        reference: &dyn TileStore,
        candidate: &dyn TileStore,
    ) -> Result<ComparisonResult, CompareError> {
        let total = reference.tile_count();
        if total == 0 {
            return Err(CompareError::EmptyReference {
                location: reference.location().to_path_buf(),
            });
        }
        log::info!(
            "comparing {total} tiles of {} {} against {} {} ({:?}, {:?} order)",
            reference.kind(),
            reference.location(),
            candidate.kind(),
            candidate.location(),
            self.mode,
            self.order,
        );

        let mut tally = Tally::new(total);
        match self.order {
            TraversalOrder::Native => {
                for record in reference.all_tiles()? {
                    if self.visit(&record?, candidate, &mut tally)?.is_break() {
                        break;
                    }
                }
            }
            TraversalOrder::Sorted => {
                let mut keys = reference
                    .all_tiles()?
                    .map(|record| record.map(|tile| tile.key))
                    .collect::<Result<Vec<_>, _>>()?;
                keys.sort_unstable();
                for key in keys {
                    let Some(record) = reference.tile(key)? else {
                        return Err(CompareError::Store(TileStoreError::Format {
                            path: reference.location().to_path_buf(),
                            reason: format!("tile {key} was listed but cannot be read back"),
                        }));
                    };
                    if self.visit(&record, candidate, &mut tally)?.is_break() {
                        break;
                    }
                }
            }
        }

        let result = tally.finish();
        log::info!(
            "matched {}/{} tiles ({} examined)",
            result.matched,
            result.total,
            result.examined
        );
        Ok(result)
    }

    fn visit(
        &self,
        record: &TileRecord,
        candidate: &dyn TileStore,
        tally: &mut Tally,
    ) -> Result<Flow, CompareError> {
        let key = record.key;
        tally.examined += 1;
        log::trace!("checking tile {key}");

        let kind = match candidate.tile(key)? {
            None => Some(MismatchKind::Missing),
            Some(other) => {
                let similar = self
                    .judge
                    .is_similar(&record.blob, &other.blob)
                    .map_err(|source| CompareError::Judge { key, source })?;
                (!similar).then_some(MismatchKind::Dissimilar)
            }
        };

        let Some(kind) = kind else {
            tally.matched += 1;
            return Ok(Flow::Continue);
        };

        log::warn!("tile {key} is {kind}");
        tally.record(Mismatch { key, kind });
        match self.mode {
            ComparisonMode::StopAtFirstMismatch => Ok(Flow::Break),
            ComparisonMode::Exhaustive => Ok(Flow::Continue),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Break,
}

impl Flow {
    const fn is_break(self) -> bool {
        matches!(self, Self::Break)
    }
}

struct Tally {
    matched: u64,
    examined: u64,
    total: u64,
    mismatches: u64,
    first_mismatch: Option<Mismatch>,
}

impl Tally {
    const fn new(total: u64) -> Self {
        Self {
            matched: 0,
            examined: 0,
            total,
            mismatches: 0,
            first_mismatch: None,
        }
    }

    fn record(&mut self, mismatch: Mismatch) {
        self.mismatches += 1;
        self.first_mismatch.get_or_insert(mismatch);
    }

    const fn finish(self) -> ComparisonResult {
        ComparisonResult {
            matched: self.matched,
            examined: self.examined,
            total: self.total,
            mismatches: self.mismatches,
            first_mismatch: self.first_mismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, RecordingStore, solid_png};
    use rstest::{fixture, rstest};

    fn tile(zoom: u32, column: u32, row: u32, rgba: [u8; 4]) -> TileRecord {
        TileRecord::new(TileKey::new(zoom, column, row), solid_png(4, 4, rgba))
    }

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    #[fixture]
    fn reference() -> MemoryStore {
        MemoryStore::with_tiles([
            tile(0, 0, 0, RED),
            tile(1, 0, 0, GREEN),
            tile(1, 0, 1, BLUE),
        ])
    }

    #[fixture]
    fn comparator() -> Comparator {
        Comparator::new(SimilarityJudge::default())
    }

    #[rstest]
    fn identical_stores_match_fully(reference: MemoryStore, comparator: Comparator) {
        let candidate = MemoryStore::with_tiles([
            tile(1, 0, 1, BLUE),
            tile(0, 0, 0, RED),
            tile(1, 0, 0, GREEN),
        ]);
        let result = comparator.compare(&reference, &candidate).expect("compare");
        assert!(result.is_match());
        assert_eq!(result.match_ratio(), 1.0);
        assert_eq!(result.first_mismatch, None);
    }

    #[rstest]
    fn comparing_a_store_with_itself_matches(reference: MemoryStore, comparator: Comparator) {
        let result = comparator.compare(&reference, &reference).expect("compare");
        assert_eq!(result.match_ratio(), 1.0);
    }

    #[rstest]
    fn dissimilar_last_tile_yields_two_thirds(reference: MemoryStore, comparator: Comparator) {
        let candidate = MemoryStore::with_tiles([
            tile(0, 0, 0, RED),
            tile(1, 0, 0, GREEN),
            tile(1, 0, 1, RED),
        ]);
        let result = comparator.compare(&reference, &candidate).expect("compare");
        assert_eq!(result.matched, 2);
        assert!((result.match_ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(
            result.first_mismatch,
            Some(Mismatch {
                key: TileKey::new(1, 0, 1),
                kind: MismatchKind::Dissimilar,
            })
        );
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn early_exit_ratio_counts_the_matched_prefix(
        reference: MemoryStore,
        comparator: Comparator,
        #[case] failing_position: usize,
    ) {
        let tiles: Vec<_> = reference
            .all_tiles()
            .expect("walk")
            .map(|record| record.expect("tile"))
            .enumerate()
            .map(|(index, record)| {
                if index + 1 == failing_position {
                    TileRecord::new(record.key, solid_png(4, 4, [9, 9, 9, 255]))
                } else {
                    record
                }
            })
            .collect();
        let candidate = MemoryStore::with_tiles(tiles);

        let result = comparator.compare(&reference, &candidate).expect("compare");
        let expected = u64::try_from(failing_position - 1).expect("small");
        assert_eq!(result.matched, expected);
        assert_eq!(result.examined, expected + 1);
        assert_eq!(result.total, 3);
    }

    #[rstest]
    fn missing_tile_stops_the_walk(reference: MemoryStore, comparator: Comparator) {
        let candidate = RecordingStore::new(MemoryStore::with_tiles([
            tile(0, 0, 0, RED),
            tile(1, 0, 1, BLUE),
        ]));
        let result = comparator.compare(&reference, &candidate).expect("compare");

        assert_eq!(
            result.first_mismatch,
            Some(Mismatch {
                key: TileKey::new(1, 0, 0),
                kind: MismatchKind::Missing,
            })
        );
        assert_eq!(
            candidate.queried(),
            vec![TileKey::new(0, 0, 0), TileKey::new(1, 0, 0)]
        );
        assert!((result.match_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[rstest]
    fn exhaustive_mode_visits_every_tile(reference: MemoryStore) {
        let comparator = Comparator::new(SimilarityJudge::default()).mode(ComparisonMode::Exhaustive);
        let candidate = RecordingStore::new(MemoryStore::with_tiles([
            tile(0, 0, 0, GREEN),
            tile(1, 0, 1, BLUE),
        ]));
        let result = comparator.compare(&reference, &candidate).expect("compare");

        assert_eq!(candidate.queried().len(), 3);
        assert_eq!(result.matched, 1);
        assert_eq!(result.mismatches, 2);
        assert_eq!(
            result.first_mismatch.map(|mismatch| mismatch.key),
            Some(TileKey::new(0, 0, 0))
        );
    }

    #[rstest]
    fn sorted_order_reports_the_lowest_failing_coordinate() {
        let reference = MemoryStore::with_tiles([
            tile(2, 1, 1, RED),
            tile(0, 0, 0, RED),
            tile(1, 1, 0, RED),
        ]);
        let candidate = MemoryStore::with_tiles([tile(0, 0, 0, RED)]);

        let native = Comparator::new(SimilarityJudge::default())
            .compare(&reference, &candidate)
            .expect("compare");
        let sorted = Comparator::new(SimilarityJudge::default())
            .order(TraversalOrder::Sorted)
            .compare(&reference, &candidate)
            .expect("compare");

        assert_eq!(native.matched, 0);
        assert_eq!(
            native.first_mismatch.map(|mismatch| mismatch.key),
            Some(TileKey::new(2, 1, 1))
        );
        assert_eq!(sorted.matched, 1);
        assert_eq!(
            sorted.first_mismatch.map(|mismatch| mismatch.key),
            Some(TileKey::new(1, 1, 0))
        );
    }

    #[cfg(debug_assertions)]
    #[rstest]
    #[should_panic(expected = "matched more tiles than exist")]
    fn ratio_flags_an_inconsistent_tally() {
        let broken = ComparisonResult {
            matched: 4,
            examined: 4,
            total: 3,
            mismatches: 0,
            first_mismatch: None,
        };
        let _ratio = broken.match_ratio();
    }

    #[rstest]
    fn ratio_is_not_symmetric(reference: MemoryStore, comparator: Comparator) {
        let smaller = MemoryStore::with_tiles([tile(0, 0, 0, RED), tile(1, 0, 0, GREEN)]);

        let forward = comparator.compare(&smaller, &reference).expect("compare");
        let backward = comparator.compare(&reference, &smaller).expect("compare");

        assert_eq!(forward.match_ratio(), 1.0);
        assert!((backward.match_ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_ne!(forward, backward);
    }

    #[rstest]
    fn empty_reference_is_an_error(comparator: Comparator, reference: MemoryStore) {
        let empty = MemoryStore::default();
        let err = comparator
            .compare(&empty, &reference)
            .expect_err("empty reference has no ratio");
        assert!(matches!(err, CompareError::EmptyReference { .. }));
    }

    #[rstest]
    fn empty_payload_reaches_the_judge(comparator: Comparator) {
        let reference = MemoryStore::with_tiles([TileRecord::new(TileKey::new(0, 0, 0), Vec::new())]);
        let candidate = MemoryStore::with_tiles([tile(0, 0, 0, RED)]);

        let err = comparator
            .compare(&reference, &candidate)
            .expect_err("empty payload cannot be decoded");
        assert!(matches!(
            err,
            CompareError::Judge {
                source: JudgeError::Decode { .. },
                ..
            }
        ));
    }

    #[rstest]
    fn closed_candidate_propagates_store_errors(reference: MemoryStore, comparator: Comparator) {
        let mut candidate = MemoryStore::with_tiles([tile(0, 0, 0, RED)]);
        candidate.close().expect("close");
        let err = comparator
            .compare(&reference, &candidate)
            .expect_err("closed store cannot be read");
        assert!(matches!(
            err,
            CompareError::Store(TileStoreError::Closed { .. })
        ));
    }

    /// Lists every tile but forgets one of them on lookup.
    #[derive(Debug)]
    struct ForgetfulStore {
        inner: MemoryStore,
        forgotten: TileKey,
    }

    impl TileStore for ForgetfulStore {
        fn kind(&self) -> crate::BackendKind {
            self.inner.kind()
        }

        fn location(&self) -> &camino::Utf8Path {
            self.inner.location()
        }

        fn all_tiles(&self) -> Result<crate::TileIter<'_>, TileStoreError> {
            self.inner.all_tiles()
        }

        fn tile(&self, key: TileKey) -> Result<Option<TileRecord>, TileStoreError> {
            if key == self.forgotten {
                return Ok(None);
            }
            self.inner.tile(key)
        }

        fn tile_count(&self) -> u64 {
            self.inner.tile_count()
        }

        fn close(&mut self) -> Result<(), TileStoreError> {
            self.inner.close()
        }
    }

    #[rstest]
    fn sorted_walk_fails_when_a_listed_tile_vanishes(
        reference: MemoryStore,
        comparator: Comparator,
    ) {
        let forgetful = ForgetfulStore {
            inner: MemoryStore::with_tiles([
                tile(0, 0, 0, RED),
                tile(1, 0, 0, GREEN),
                tile(1, 0, 1, BLUE),
            ]),
            forgotten: TileKey::new(1, 0, 0),
        };

        let err = comparator
            .order(TraversalOrder::Sorted)
            .compare(&forgetful, &reference)
            .expect_err("a vanished reference tile aborts the walk");
        match err {
            CompareError::Store(TileStoreError::Format { reason, .. }) => {
                assert!(reason.contains("1/0/0"), "unexpected reason: {reason}");
            }
            other => panic!("expected a format error, found {other:?}"),
        }
    }
}
