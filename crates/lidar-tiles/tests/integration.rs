//! End-to-end tests for lidar-tiles on generated GeoTIFF fixtures.
//!
//! Fixtures mimic a survey delivery: two providers, nested folders, sidecar
//! files and the odd broken raster.

use approx::assert_relative_eq;
use lidar_tiles::{
    list_zones, Catalog, CatalogConfig, CatalogError, CatalogSnapshot, Crs, ElevationRaster,
    GeoTransform, ImageryRaster, MosaicOptions, MosaicProgress, MosaicWarning, ProgressCallback,
    ScanWarning, TileId,
};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const TILE_SIZE: usize = 20;
const ORIGIN_Y: f64 = 8_080_000.0;
const EPSG: u16 = 28355;

fn write_dem(path: &Path, origin_x: f64, base: f32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let data = (0..TILE_SIZE * TILE_SIZE)
        .map(|i| base + (i % TILE_SIZE) as f32 * 0.5)
        .collect();
    let transform = GeoTransform::north_up(origin_x, ORIGIN_Y, 1.0, 1.0);
    ElevationRaster::new(TILE_SIZE, TILE_SIZE, data, transform, Some(Crs::projected(EPSG)))
        .write_geotiff(path)
        .unwrap();
}

fn write_ortho(path: &Path, origin_x: f64, color: [u8; 3]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let size = TILE_SIZE * 2;
    let rgb = color.iter().copied().cycle().take(size * size * 3).collect();
    let transform = GeoTransform::north_up(origin_x, ORIGIN_Y, 0.5, 0.5);
    ImageryRaster::new(size, size, rgb, transform, Some(Crs::projected(EPSG)))
        .write_geotiff(path)
        .unwrap();
}

/// Two tiles side by side: 2073200 (NMCG) west of 2123200 (NHP).
fn survey_zone(zone: &Path) {
    write_dem(&zone.join("DEM/NHP/2023/block_a/EGM-NHP_2123200.tif"), 320.0, 100.0);
    write_dem(&zone.join("DEM/NMCG/deliv/EGM-NMCG_2073200.tif"), 300.0, 50.0);
    write_ortho(&zone.join("ORTHO/NHP/tiles/NHP_2123200.tif"), 320.0, [200, 10, 10]);
    write_ortho(&zone.join("ORTHO/NMCG/NMCG_2073200.tif"), 300.0, [10, 10, 200]);

    let sidecar = zone.join("DEM/NHP/2023/block_a/EGM-NHP_2123200.tif.aux.xml");
    fs::write(sidecar, b"<PAMDataset/>").unwrap();
    fs::create_dir_all(zone.join("DEM/NHP/EGM-NHP_2123200.Overviews")).unwrap();
    fs::write(zone.join("ORTHO/NHP/tiles/NHP_2123200.tif.ovr"), b"overview").unwrap();
}

fn id(s: &str) -> TileId {
    TileId::parse(s).unwrap()
}

#[test]
fn test_end_to_end_two_provider_zone() {
    let data = tempfile::tempdir().unwrap();
    survey_zone(&data.path().join("Burdekin"));

    assert_eq!(list_zones(data.path()).unwrap(), vec!["Burdekin"]);

    let catalog = Catalog::for_zone(data.path(), "Burdekin", &CatalogConfig::default()).unwrap();
    assert!(catalog.warnings().is_empty(), "{:?}", catalog.warnings());
    let ids: Vec<_> = catalog.tile_ids().map(TileId::as_str).collect();
    assert_eq!(ids, vec!["2073200", "2123200"]);
    assert_eq!(catalog.complete_pairs().count(), 2);

    let nhp = catalog.get_str("2123200").unwrap();
    assert_eq!(nhp.elevation.as_ref().unwrap().file_name(), "EGM-NHP_2123200.tif");
    assert_eq!(nhp.imagery.as_ref().unwrap().file_name(), "NHP_2123200.tif");

    let tile = catalog.load_pair(nhp).unwrap();
    assert_eq!(tile.elevation.dimensions(), (TILE_SIZE, TILE_SIZE));
    assert_eq!(tile.elevation.crs(), Some(Crs::projected(EPSG)));
    let imagery = tile.imagery.as_ref().unwrap();
    assert_eq!(imagery.dimensions(), (TILE_SIZE, TILE_SIZE));
    assert_eq!(imagery.pixel(3, 3), Some([200, 10, 10]));

    let progress_log = Arc::new(Mutex::new(Vec::new()));
    let log = progress_log.clone();
    let progress: ProgressCallback = Box::new(move |p: &MosaicProgress| {
        log.lock().unwrap().push((p.processed, p.total, p.placed));
    });

    let ids: Vec<TileId> = catalog.tile_ids().cloned().collect();
    let report = catalog
        .build_mosaic(&ids, &MosaicOptions::default(), Some(&progress))
        .unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(*progress_log.lock().unwrap(), vec![(1, 2, true), (2, 2, true)]);

    let mosaic = report.result;
    assert_eq!(mosaic.dimensions(), (2 * TILE_SIZE, TILE_SIZE));
    assert_eq!((mosaic.grid_rows, mosaic.grid_cols), (1, 2));
    let bounds = mosaic.bounds();
    assert_relative_eq!(bounds.min_x, 300.0);
    assert_relative_eq!(bounds.max_x, 340.0);
    assert_relative_eq!(bounds.max_y, ORIGIN_Y);

    let east = mosaic.placement(&id("2123200")).unwrap();
    assert_eq!((east.pixel_col, east.grid_col), (TILE_SIZE, 1));
    assert_eq!(mosaic.elevation.get(0, 0), Some(50.0));
    assert_eq!(mosaic.elevation.get(TILE_SIZE, 0), Some(100.0));

    let imagery = mosaic.imagery.as_ref().unwrap();
    assert_eq!(imagery.pixel(1, 1), Some([10, 10, 200]));
    assert_eq!(imagery.pixel(TILE_SIZE + 1, 1), Some([200, 10, 10]));
}

#[test]
fn test_mosaic_written_as_geotiff_reloads() {
    let data = tempfile::tempdir().unwrap();
    survey_zone(data.path());
    let catalog = Catalog::build(data.path(), &CatalogConfig::default()).unwrap();

    let report = catalog
        .build_full_mosaic(&MosaicOptions::downsampled(2), None)
        .unwrap();
    let out = data.path().join("out/mosaic.tif");
    fs::create_dir_all(out.parent().unwrap()).unwrap();
    report.result.elevation.write_geotiff(&out).unwrap();

    let reloaded = ElevationRaster::from_file(&out, &CatalogConfig::default()).unwrap();
    assert_eq!(reloaded.dimensions(), (TILE_SIZE, TILE_SIZE / 2));
    assert!(reloaded.transform().approx_eq(&report.result.transform));
    assert_eq!(reloaded.crs(), Some(Crs::projected(EPSG)));
    assert_eq!(reloaded.data(), report.result.elevation.data());

    // The output directory is not a zone input; rescanning must not pick it up as a tile.
    let rescanned = Catalog::build(data.path(), &CatalogConfig::default()).unwrap();
    assert_eq!(rescanned.len(), 2);
}

#[test]
fn test_broken_tile_is_reported_and_rest_placed() {
    let data = tempfile::tempdir().unwrap();
    survey_zone(data.path());
    let broken = data.path().join("DEM/NHP/EGM-NHP_2123300.tif");
    fs::write(&broken, b"II*\0truncated").unwrap();

    let catalog = Catalog::build(data.path(), &CatalogConfig::default()).unwrap();
    assert_eq!(catalog.len(), 3);
    let report = catalog
        .build_full_mosaic(&MosaicOptions::default(), None)
        .unwrap();

    assert_eq!(report.result.tile_ids, vec![id("2073200"), id("2123200")]);
    match report.warnings.as_slice() {
        [MosaicWarning::TileUnavailable { tile_id, path, .. }] => {
            assert_eq!(tile_id, &id("2123300"));
            assert!(path.ends_with("EGM-NHP_2123300.tif"));
        }
        other => panic!("unexpected warnings {:?}", other),
    }
}

#[test]
fn test_duplicates_and_unparseable_are_warnings() {
    let data = tempfile::tempdir().unwrap();
    survey_zone(data.path());
    write_dem(&data.path().join("DEM/reprocessed/EGM-NHP_2123200.tif"), 320.0, 0.0);
    write_dem(&data.path().join("DEM/EGM-NHP_mosaic.tif"), 0.0, 0.0);

    let catalog = Catalog::build(data.path(), &CatalogConfig::default()).unwrap();
    assert_eq!(catalog.len(), 2);
    let kept = catalog.get_str("2123200").unwrap().elevation.as_ref().unwrap();
    assert!(kept.path.to_string_lossy().contains("NHP/2023"));

    let summary = catalog.summary();
    assert_eq!(summary.elevation_files, 4);
    assert_eq!(summary.unparseable, 1);
    assert!(catalog
        .warnings()
        .iter()
        .any(|w| matches!(w, ScanWarning::DuplicateTile { .. })));
    assert!(catalog
        .warnings()
        .iter()
        .any(|w| matches!(w, ScanWarning::UnparseableFilename { .. })));
}

#[test]
fn test_empty_zone() {
    let data = tempfile::tempdir().unwrap();
    fs::create_dir_all(data.path().join("Empty/DEM")).unwrap();

    let catalog = Catalog::for_zone(data.path(), "Empty", &CatalogConfig::default()).unwrap();
    assert!(catalog.is_empty());
    assert_eq!(catalog.summary().complete_pairs, 0);
    assert!(matches!(
        catalog.first_complete_pair(),
        Err(CatalogError::EmptyCatalog(_))
    ));
}

#[test]
fn test_snapshot_goes_stale_when_tile_added() {
    let data = tempfile::tempdir().unwrap();
    survey_zone(data.path());
    let catalog = Catalog::build(data.path(), &CatalogConfig::default()).unwrap();

    let index = data.path().join("catalog.json");
    catalog.snapshot().unwrap().save(&index).unwrap();
    let restored = CatalogSnapshot::load(&index).unwrap().into_catalog().unwrap();
    assert_eq!(restored.pairs(), catalog.pairs());

    write_dem(&data.path().join("DEM/NHP/EGM-NHP_2123300.tif"), 340.0, 10.0);
    let err = CatalogSnapshot::load(&index).unwrap().into_catalog().unwrap_err();
    assert!(matches!(err, CatalogError::StaleSnapshot(_)));
}

#[test]
fn test_dem_only_config_from_yaml() {
    let data = tempfile::tempdir().unwrap();
    survey_zone(data.path());
    let config = CatalogConfig::from_yaml_str("include_imagery: false\n").unwrap();

    let catalog = Catalog::build(data.path(), &config).unwrap();
    assert_eq!(catalog.len(), 2);
    assert!(catalog.pairs().iter().all(|p| p.is_elevation_only()));

    let start = Instant::now();
    let options = MosaicOptions {
        include_imagery: false,
        ..MosaicOptions::default()
    };
    let report = catalog.build_full_mosaic(&options, None).unwrap();
    println!("DEM-only mosaic built in {:?}", start.elapsed());
    assert!(report.result.imagery.is_none());
    assert_eq!(report.result.tile_ids.len(), 2);
}
