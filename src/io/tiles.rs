use crate::types::{
    BoundingBox, GeoTransform, RasterProfile, RasterTile, WaterMaskError, WaterMaskResult,
};
use gdal::Dataset;
use ndarray::{s, Array2};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Global gridded datasets a water mask can be derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileSource {
    /// ESA WorldCover 2021 v200 land cover, 10 m, 3° tiles
    EsaWorldCover2021,
    /// JRC/Pekel global surface water occurrence 2021, 10° tiles
    PekelWaterOccurrence2021,
}

impl TileSource {
    pub fn short_name(&self) -> &'static str {
        match self {
            TileSource::EsaWorldCover2021 => "esa_world_cover_2021",
            TileSource::PekelWaterOccurrence2021 => "pekel_water_occ_2021",
        }
    }

    /// Tile edge length in degrees
    pub fn tile_size(&self) -> i32 {
        match self {
            TileSource::EsaWorldCover2021 => 3,
            TileSource::PekelWaterOccurrence2021 => 10,
        }
    }

    /// Tile identifier for the cell whose south-west corner is (`lon`, `lat`)
    pub fn tile_id(&self, lon: i32, lat: i32) -> String {
        match self {
            TileSource::EsaWorldCover2021 => format!(
                "{}{:02}{}{:03}",
                if lat >= 0 { "N" } else { "S" },
                lat.abs(),
                if lon >= 0 { "E" } else { "W" },
                lon.abs()
            ),
            // occurrence tiles are named after their west and north edges
            TileSource::PekelWaterOccurrence2021 => {
                let north = lat + self.tile_size();
                format!(
                    "{}{}_{}{}",
                    lon.abs(),
                    if lon >= 0 { "E" } else { "W" },
                    north.abs(),
                    if north >= 0 { "N" } else { "S" }
                )
            }
        }
    }

    /// Every tile intersecting `bbox`, north to south then west to east
    pub fn tiles_for(&self, bbox: &BoundingBox) -> Vec<(String, BoundingBox)> {
        let size = self.tile_size();
        let first_lon = (bbox.min_lon / size as f64).floor() as i32 * size;
        let first_lat = (bbox.min_lat / size as f64).floor() as i32 * size;

        let mut lats = Vec::new();
        let mut lat = first_lat;
        while (lat as f64) < bbox.max_lat {
            lats.push(lat);
            lat += size;
        }

        let mut tiles = Vec::new();
        for &lat in lats.iter().rev() {
            let mut lon = first_lon;
            while (lon as f64) < bbox.max_lon {
                let tile_bbox = BoundingBox {
                    min_lon: lon as f64,
                    max_lon: (lon + size) as f64,
                    min_lat: lat as f64,
                    max_lat: (lat + size) as f64,
                };
                tiles.push((self.tile_id(lon, lat), tile_bbox));
                lon += size;
            }
        }

        let ids: Vec<&str> = tiles.iter().map(|(id, _)| id.as_str()).collect();
        log::debug!("{} tiles for {:?}: {:?}", self, bbox.bounds(), ids);
        tiles
    }
}

impl fmt::Display for TileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Retrieves a raster covering a bounding box from a tiled source
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, bbox: &BoundingBox, source: TileSource) -> WaterMaskResult<RasterTile>;
}

/// GDAL configuration option set while reading remote tiles
const READDIR_OPTION: &str = "GDAL_DISABLE_READDIR_ON_OPEN";

const ESA_WORLD_COVER_URL: &str = "https://esa-worldcover.s3.eu-central-1.amazonaws.com\
    /v200/2021/map/ESA_WorldCover_10m_2021_v200_{tile}_Map.tif";

const PEKEL_OCCURRENCE_URL: &str = "https://storage.googleapis.com/global-surface-water\
    /downloads2021/occurrence/occurrence_{tile}v1_4_2021.tif";

/// Tile locations, `{tile}` is replaced by the tile identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileFetcherConfig {
    pub esa_world_cover_url: String,
    pub pekel_occurrence_url: String,
    /// Timeout for the availability check of remote tiles
    pub timeout_secs: u64,
}

impl Default for TileFetcherConfig {
    fn default() -> Self {
        Self {
            esa_world_cover_url: ESA_WORLD_COVER_URL.to_string(),
            pekel_occurrence_url: PEKEL_OCCURRENCE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

impl TileFetcherConfig {
    /// URL or local path of a tile
    pub fn url(&self, source: TileSource, tile_id: &str) -> String {
        let template = match source {
            TileSource::EsaWorldCover2021 => &self.esa_world_cover_url,
            TileSource::PekelWaterOccurrence2021 => &self.pekel_occurrence_url,
        };
        template.replace("{tile}", tile_id)
    }

    /// GDAL-openable location of a tile; remote tiles go through `/vsicurl/`
    pub fn location(&self, source: TileSource, tile_id: &str) -> String {
        let url = self.url(source, tile_id);
        if is_http(&url) {
            format!("/vsicurl/{}", url)
        } else {
            url
        }
    }

    pub fn is_remote(&self, source: TileSource) -> bool {
        is_http(&self.url(source, ""))
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Mosaics GeoTIFF tiles through GDAL onto a grid aligned with the request box.
///
/// Tiles that are not published (open ocean, polar caps) are skipped and their
/// part of the grid keeps the fill value of the published ones.
pub struct GdalTileFetcher {
    config: TileFetcherConfig,
}

impl GdalTileFetcher {
    pub fn new() -> Self {
        Self::with_config(TileFetcherConfig::default())
    }

    pub fn with_config(config: TileFetcherConfig) -> Self {
        Self { config }
    }

    /// Whether a tile exists: a HEAD request for remote sources, a file check otherwise
    fn is_published(
        &self,
        client: Option<&Client>,
        source: TileSource,
        tile_id: &str,
    ) -> WaterMaskResult<bool> {
        let url = self.config.url(source, tile_id);
        let Some(client) = client else {
            return Ok(Path::new(&url).exists());
        };

        let response = client
            .head(&url)
            .send()
            .map_err(|e| WaterMaskError::Download(format!("HEAD {} failed: {}", url, e)))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(WaterMaskError::Download(format!(
                "HTTP {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                url
            ))),
        }
    }

    fn open_tile(&self, source: TileSource, tile_id: &str) -> WaterMaskResult<Dataset> {
        let location = self.config.location(source, tile_id);
        log::info!("Opening {} tile {}: {}", source, tile_id, location);
        Dataset::open(&location).map_err(WaterMaskError::from)
    }

    fn mosaic(
        &self,
        bbox: &BoundingBox,
        source: TileSource,
        client: Option<&Client>,
    ) -> WaterMaskResult<RasterTile> {
        let tiles = source.tiles_for(bbox);
        let mut datasets = Vec::with_capacity(tiles.len());
        for (tile_id, _) in &tiles {
            if self.is_published(client, source, tile_id)? {
                datasets.push((tile_id, self.open_tile(source, tile_id)?));
            } else {
                log::warn!("{} tile {} is not published, leaving it as fill", source, tile_id);
            }
        }

        let (_, first) = datasets.first().ok_or_else(|| {
            WaterMaskError::Processing(format!(
                "none of the {} {} tiles intersecting {:?} are published",
                tiles.len(),
                source,
                bbox.bounds()
            ))
        })?;
        let first_transform = first.geo_transform()?;
        let pixel_width = first_transform[1];
        let pixel_height = first_transform[5].abs();
        let crs = first.spatial_ref().ok().and_then(|srs| srs.to_wkt().ok());
        let nodata = first.rasterband(1)?.no_data_value();

        let width = (bbox.width() / pixel_width).round() as usize;
        let height = (bbox.height() / pixel_height).round() as usize;
        log::debug!("Mosaic grid: {}x{} at {}° x {}°", width, height, pixel_width, pixel_height);

        let fill = nodata.map(|v| v as u8).unwrap_or(0);
        let mut mosaic = Array2::<u8>::from_elem((height, width), fill);

        for (tile_id, dataset) in &datasets {
            let gt = dataset.geo_transform()?;
            let (tile_width, tile_height) = dataset.raster_size();

            let col_offset = ((gt[0] - bbox.min_lon) / pixel_width).round() as i64;
            let row_offset = ((bbox.max_lat - gt[3]) / pixel_height).round() as i64;

            let c0 = col_offset.max(0);
            let c1 = (col_offset + tile_width as i64).min(width as i64);
            let r0 = row_offset.max(0);
            let r1 = (row_offset + tile_height as i64).min(height as i64);
            if c0 >= c1 || r0 >= r1 {
                log::debug!("Tile {} does not overlap the mosaic grid", tile_id);
                continue;
            }

            let window = ((c0 - col_offset) as isize, (r0 - row_offset) as isize);
            let window_size = ((c1 - c0) as usize, (r1 - r0) as usize);
            let band = dataset.rasterband(1)?;
            let buffer = band.read_as::<u8>(window, window_size, window_size, None)?;
            let block = Array2::from_shape_vec((window_size.1, window_size.0), buffer.data)
                .map_err(|e| {
                    WaterMaskError::Processing(format!("Failed to reshape tile {}: {}", tile_id, e))
                })?;

            mosaic
                .slice_mut(s![r0 as usize..r1 as usize, c0 as usize..c1 as usize])
                .assign(&block);
        }

        let profile = RasterProfile {
            width,
            height,
            count: 1,
            crs,
            transform: GeoTransform::north_up(bbox, pixel_width, pixel_height),
            nodata,
            driver: "GTiff".to_string(),
        };

        Ok(RasterTile { data: mosaic, profile })
    }
}

impl Default for GdalTileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TileFetcher for GdalTileFetcher {
    fn fetch(&self, bbox: &BoundingBox, source: TileSource) -> WaterMaskResult<RasterTile> {
        log::info!("Fetching {} for {:?}", source, bbox.bounds());

        if !self.config.is_remote(source) {
            return self.mosaic(bbox, source, None);
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .user_agent(concat!("watermask/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WaterMaskError::Download(format!("Failed to create HTTP client: {}", e)))?;

        // scoped to this thread and cleared again so other GDAL users keep their settings
        gdal::config::set_thread_local_config_option(READDIR_OPTION, "EMPTY_DIR")?;
        let result = self.mosaic(bbox, source, Some(&client));
        gdal::config::clear_thread_local_config_option(READDIR_OPTION)?;
        result
    }
}
