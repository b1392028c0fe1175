use gdal::Dataset;
use ndarray::{array, Array2};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use watermask::io::isce::sidecar_path;
use watermask::io::tiles::TileSource;
use watermask::{
    BoundaryDownloader, BoundingBox, Extent, GeoTransform, IsceXmlFixer, MaskSource, RasterProfile,
    RasterTile, TileFetcher, WaterMaskDeriver, WaterMaskError, WaterMaskParams, WaterMaskResult,
};

type Requests = Arc<Mutex<Vec<(BoundingBox, TileSource)>>>;

/// Serves one array for any request and remembers what was asked for
struct StaticTiles {
    data: Array2<u8>,
    requests: Requests,
}

impl StaticTiles {
    fn new(data: Array2<u8>) -> Self {
        Self { data, requests: Default::default() }
    }
}

impl TileFetcher for StaticTiles {
    fn fetch(&self, bbox: &BoundingBox, source: TileSource) -> WaterMaskResult<RasterTile> {
        self.requests.lock().unwrap().push((*bbox, source));
        let (height, width) = self.data.dim();
        let pixel_width = bbox.width() / width as f64;
        let pixel_height = bbox.height() / height as f64;
        Ok(RasterTile {
            data: self.data.clone(),
            profile: RasterProfile {
                width,
                height,
                count: 1,
                crs: None,
                transform: GeoTransform::north_up(bbox, pixel_width, pixel_height),
                nodata: Some(0.0),
                driver: "GTiff".to_string(),
            },
        })
    }
}

struct FailingTiles;

impl TileFetcher for FailingTiles {
    fn fetch(&self, _bbox: &BoundingBox, source: TileSource) -> WaterMaskResult<RasterTile> {
        Err(WaterMaskError::Download(format!("{} unavailable", source)))
    }
}

struct UnusedDownloader;

impl BoundaryDownloader for UnusedDownloader {
    fn download(&self, _s: f64, _n: f64, _w: f64, _e: f64, _dir: &Path) -> WaterMaskResult<String> {
        panic!("boundary downloader must not be called for tile sources");
    }
}

fn deriver(output_dir: &Path, tiles: Box<dyn TileFetcher>) -> WaterMaskDeriver {
    let _ = env_logger::builder().is_test(true).try_init();
    WaterMaskDeriver::with_collaborators(
        WaterMaskParams { buffer_degrees: 0.1, output_dir: output_dir.to_path_buf() },
        tiles,
        Box::new(UnusedDownloader),
        Box::new(IsceXmlFixer::default()),
    )
}

fn read_mask(path: &PathBuf) -> (Vec<u8>, Option<f64>, String) {
    let dataset = Dataset::open(path).unwrap();
    let (width, height) = dataset.raster_size();
    let band = dataset.rasterband(1).unwrap();
    let data = band.read_as::<u8>((0, 0), (width, height), (width, height), None).unwrap();
    (data.data, band.no_data_value(), dataset.driver().short_name())
}

#[test]
fn test_world_cover_mask_written_as_isce() {
    let dir = TempDir::new().unwrap();
    let classes = array![[80u8, 10, 80], [50, 80, 90]];
    let tiles = StaticTiles::new(classes);
    let requests = tiles.requests.clone();
    let d = deriver(dir.path(), Box::new(tiles));

    let extent = Extent::new(10.0, 20.0, 10.5, 20.5).unwrap();
    let product = d.derive_mask(&extent, MaskSource::EsaWorldCover2021).unwrap();

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.bounds(), [9.0, 19.0, 11.0, 21.0]);
    assert_eq!(requests[0].1, TileSource::EsaWorldCover2021);

    let path = product.water_mask.clone().unwrap();
    assert!(path.is_absolute());
    assert!(path.ends_with("water_mask_derived_from_esa_world_cover_2021_10m.geo"));
    assert!(sidecar_path(&path, "xml").exists());
    assert!(sidecar_path(&path, "vrt").exists());

    let (data, nodata, driver) = read_mask(&path);
    assert_eq!(data, vec![255, 0, 255, 0, 255, 0]);
    assert!(nodata.is_none());
    assert_eq!(driver, "ISCE");
}

#[test]
fn test_occurrence_mask_threshold() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let occurrence = array![[96u8, 94], [95, 0]];
    let d = deriver(dir.path(), Box::new(StaticTiles::new(occurrence)));

    let extent = Extent::new(-70.4, -33.6, -70.1, -33.2)?;
    let product = d.derive_mask_by_name(&extent, "pekel_water_occurrence_2021")?;

    let path = product.water_mask.ok_or_else(|| anyhow::anyhow!("no mask produced"))?;
    assert!(path.ends_with(
        "water_mask_derived_from_pekel_water_occurrence_2021_with_at_least_95_perc_water.geo"
    ));
    let (data, nodata, _) = read_mask(&path);
    assert_eq!(data, vec![255, 0, 255, 0]);
    assert!(nodata.is_none());
    Ok(())
}

#[test]
fn test_fetch_failure_propagates_without_output() {
    let dir = TempDir::new().unwrap();
    let d = deriver(dir.path(), Box::new(FailingTiles));

    let extent = Extent::new(10.0, 20.0, 10.5, 20.5).unwrap();
    let result = d.derive_mask(&extent, MaskSource::PekelOccurrence2021);

    assert!(matches!(result, Err(WaterMaskError::Download(_))));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_public_entry_point_outcomes_without_network() {
    let dir = TempDir::new().unwrap();
    let params = WaterMaskParams { buffer_degrees: 0.1, output_dir: dir.path().to_path_buf() };

    let extent = [10.0, 20.0, 10.5, 20.5];
    let unknown = watermask::download_water_mask(&extent, "osm_water", params.clone());
    assert!(matches!(unknown, Err(WaterMaskError::NotImplemented(_))));

    let polar = watermask::download_water_mask(&[10.0, 59.5, 10.5, 60.0], "SWBD", params).unwrap();
    assert_eq!(polar.get("water_mask").map(String::as_str), Some(""));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
