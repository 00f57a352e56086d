//! Matching elevation tiles with their imagery by tile id.

use crate::config::RasterRole;
use crate::discovery::RasterFileRef;
use crate::metrics::metric_defs;
use crate::tile_id::TileId;
use crate::ScanWarning;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Elevation and imagery files sharing a tile id.
///
/// At least one side is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePair {
    /// Shared tile id.
    pub tile_id: TileId,
    /// Elevation raster, if any.
    pub elevation: Option<RasterFileRef>,
    /// Imagery raster, if any.
    pub imagery: Option<RasterFileRef>,
}

impl TilePair {
    /// Both elevation and imagery are present.
    pub fn is_complete(&self) -> bool {
        self.elevation.is_some() && self.imagery.is_some()
    }

    /// Only the elevation side is present.
    pub fn is_elevation_only(&self) -> bool {
        self.elevation.is_some() && self.imagery.is_none()
    }

    /// Only the imagery side is present.
    pub fn is_imagery_only(&self) -> bool {
        self.elevation.is_none() && self.imagery.is_some()
    }
}

/// Result of [`pair_tiles`].
#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    /// Pairs sorted by tile id.
    pub pairs: Vec<TilePair>,
    /// One [`ScanWarning::DuplicateTile`] per discarded file.
    pub duplicates: Vec<ScanWarning>,
}

/// Pair elevation and imagery candidates by tile id.
///
/// Each side is indexed into a hash map once and joined with a single pass,
/// so the cost grows linearly with the number of files. When several files
/// claim the same (tile id, role) slot, the one with the lexicographically
/// smallest path is kept, which matches first-seen order of a sorted scan and
/// does not depend on the order the inputs arrive in. Files without a tile id
/// are ignored.
pub fn pair_tiles(elevation: &[RasterFileRef], imagery: &[RasterFileRef]) -> PairingOutcome {
    let mut duplicates = Vec::new();
    let mut elevation_by_id = index_by_tile(elevation, RasterRole::Elevation, &mut duplicates);
    let mut imagery_by_id = index_by_tile(imagery, RasterRole::Imagery, &mut duplicates);

    let mut pairs = Vec::with_capacity(elevation_by_id.len() + imagery_by_id.len());
    for (tile_id, dem) in elevation_by_id.drain() {
        let ortho = imagery_by_id.remove(&tile_id);
        pairs.push(TilePair {
            tile_id,
            elevation: Some(dem.clone()),
            imagery: ortho.cloned(),
        });
    }
    for (tile_id, ortho) in imagery_by_id.drain() {
        pairs.push(TilePair {
            tile_id,
            elevation: None,
            imagery: Some(ortho.clone()),
        });
    }
    pairs.sort_unstable_by(|a, b| a.tile_id.cmp(&b.tile_id));

    duplicates.sort_by(|a, b| duplicate_key(a).cmp(&duplicate_key(b)));
    for dup in &duplicates {
        warn!("{}", dup);
    }
    metric_defs::PAIRS_BUILT.increment(pairs.len() as u64);
    debug!(
        "Paired {} elevation and {} imagery files into {} tiles",
        elevation.len(),
        imagery.len(),
        pairs.len()
    );

    PairingOutcome { pairs, duplicates }
}

fn index_by_tile<'a>(
    files: &'a [RasterFileRef],
    role: RasterRole,
    duplicates: &mut Vec<ScanWarning>,
) -> HashMap<TileId, &'a RasterFileRef> {
    let mut by_id: HashMap<TileId, &RasterFileRef> = HashMap::with_capacity(files.len());
    for file in files {
        let Some(tile_id) = &file.tile_id else {
            continue;
        };
        match by_id.entry(tile_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(file);
            }
            Entry::Occupied(mut slot) => {
                let (kept, discarded) = if file.path < slot.get().path {
                    (file, slot.insert(file))
                } else {
                    (*slot.get(), file)
                };
                duplicates.push(ScanWarning::DuplicateTile {
                    tile_id: tile_id.clone(),
                    role,
                    kept: kept.path.clone(),
                    discarded: discarded.path.clone(),
                });
            }
        }
    }
    by_id
}

type DuplicateKey<'a> = (Option<&'a TileId>, Option<RasterRole>, Option<&'a std::path::Path>);

fn duplicate_key(warning: &ScanWarning) -> DuplicateKey<'_> {
    match warning {
        ScanWarning::DuplicateTile {
            tile_id,
            role,
            discarded,
            ..
        } => (Some(tile_id), Some(*role), Some(discarded.as_path())),
        _ => (None, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn dem(path: &str) -> RasterFileRef {
        RasterFileRef::new(PathBuf::from(path), RasterRole::Elevation)
    }

    fn ortho(path: &str) -> RasterFileRef {
        RasterFileRef::new(PathBuf::from(path), RasterRole::Imagery)
    }

    #[test]
    fn test_pairs_across_naming_conventions() {
        let elevation = vec![
            dem("/z/DEM/EGM-NHP_2123200.tif"),
            dem("/z/DEM/deep/EGM-NMCG-2073200.tif"),
        ];
        let imagery = vec![ortho("/z/ORTHO/NMCG_2073200.tif"), ortho("/z/ORTHO/NHP_2123200.tif")];

        let outcome = pair_tiles(&elevation, &imagery);
        assert!(outcome.duplicates.is_empty());
        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.pairs.iter().all(TilePair::is_complete));
        assert_eq!(outcome.pairs[0].tile_id.as_str(), "2073200");
        assert_eq!(
            outcome.pairs[0].imagery.as_ref().unwrap().file_name(),
            "NMCG_2073200.tif"
        );
        assert_eq!(outcome.pairs[1].tile_id.as_str(), "2123200");
    }

    #[test]
    fn test_unmatched_sides_are_kept() {
        let elevation = vec![dem("/d/EGM-NHP_0000001.tif"), dem("/d/EGM-NHP_0000002.tif")];
        let imagery = vec![ortho("/o/NHP_0000002.tif"), ortho("/o/NHP_0000003.tif")];

        let outcome = pair_tiles(&elevation, &imagery);
        let ids: Vec<_> = outcome.pairs.iter().map(|p| p.tile_id.as_str()).collect();
        assert_eq!(ids, vec!["0000001", "0000002", "0000003"]);
        assert!(outcome.pairs[0].is_elevation_only());
        assert!(outcome.pairs[1].is_complete());
        assert!(outcome.pairs[2].is_imagery_only());
    }

    #[test]
    fn test_unparseable_files_are_ignored() {
        let elevation = vec![dem("/d/EGM-NHP_mosaic.tif"), dem("/d/EGM-NHP_0000001.tif")];
        let outcome = pair_tiles(&elevation, &[]);
        assert_eq!(outcome.pairs.len(), 1);
    }

    #[test]
    fn test_pairing_is_commutative_in_scan_order() {
        let mut elevation = vec![
            dem("/d/a/EGM-NHP_0000001.tif"),
            dem("/d/b/EGM-NHP_0000001.tif"),
            dem("/d/EGM-NMCG_0000002.tif"),
        ];
        let mut imagery = vec![ortho("/o/NHP_0000001.tif"), ortho("/o/NMCG_0000002.tif")];

        let forward = pair_tiles(&elevation, &imagery);
        elevation.reverse();
        imagery.reverse();
        let reversed = pair_tiles(&elevation, &imagery);

        assert_eq!(forward.pairs, reversed.pairs);
        assert_eq!(forward.duplicates, reversed.duplicates);
    }

    #[test]
    fn test_duplicate_keeps_smallest_path() {
        let elevation = vec![dem("/d/z/EGM-NHP_0000001.tif"), dem("/d/a/EGM-NHP_0000001.tif")];
        let outcome = pair_tiles(&elevation, &[]);
        assert_eq!(
            outcome.pairs[0].elevation.as_ref().unwrap().path,
            PathBuf::from("/d/a/EGM-NHP_0000001.tif")
        );
        match outcome.duplicates.as_slice() {
            [ScanWarning::DuplicateTile { kept, discarded, role, .. }] => {
                assert_eq!(kept, &PathBuf::from("/d/a/EGM-NHP_0000001.tif"));
                assert_eq!(discarded, &PathBuf::from("/d/z/EGM-NHP_0000001.tif"));
                assert_eq!(*role, RasterRole::Elevation);
            }
            other => panic!("unexpected duplicates {:?}", other),
        }
    }

    fn synthetic(n: usize) -> (Vec<RasterFileRef>, Vec<RasterFileRef>) {
        let elevation = (0..n)
            .map(|i| dem(&format!("/d/EGM-NHP_{:07}.tif", i)))
            .collect();
        let imagery = (0..n)
            .map(|i| ortho(&format!("/o/NHP_{:07}.tif", i)))
            .collect();
        (elevation, imagery)
    }

    #[test]
    fn test_pairing_scales_to_ten_thousand_tiles() {
        let (elevation, imagery) = synthetic(10_000);
        let start = Instant::now();
        let outcome = pair_tiles(&elevation, &imagery);
        let elapsed = start.elapsed();

        assert_eq!(outcome.pairs.len(), 10_000);
        assert!(outcome.pairs.iter().all(TilePair::is_complete));
        // A quadratic join would need 10^8 comparisons here.
        assert!(elapsed.as_secs_f64() < 5.0, "pairing took {:?}", elapsed);
    }
}
