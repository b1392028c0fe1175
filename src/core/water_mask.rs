use crate::core::extent::{Extent, DEFAULT_BUFFER_DEGREES};
use crate::core::threshold::{
    water_mask, WaterRule, MIN_WATER_OCCURRENCE_PERCENT, WORLD_COVER_PERMANENT_WATER,
};
use crate::io::isce::{write_isce_raster, IsceXmlFixer, MetadataFixup, ISCE_DRIVER};
use crate::io::swbd::{BoundaryDownloader, SwbdDownloader};
use crate::io::tiles::{GdalTileFetcher, TileFetcher, TileSource};
use crate::types::{BoundingBox, WaterMaskError, WaterMaskProduct, WaterMaskResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// SWBD only covers latitudes strictly inside this band
pub const SWBD_MAX_ABS_LATITUDE: f64 = 59.9;

const PEKEL_OUTPUT_NAME: &str =
    "water_mask_derived_from_pekel_water_occurrence_2021_with_at_least_95_perc_water.geo";

/// Water mask sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MaskSource {
    /// ESA WorldCover 2021 class 80 (permanent water bodies)
    EsaWorldCover2021,
    /// Pixels with at least 95% historical water occurrence
    #[default]
    PekelOccurrence2021,
    /// SRTM Water Body Data
    Swbd,
}

impl MaskSource {
    pub fn name(&self) -> &'static str {
        match self {
            MaskSource::EsaWorldCover2021 => "esa_world_cover_2021_10m",
            MaskSource::PekelOccurrence2021 => "pekel_water_occurrence_2021",
            MaskSource::Swbd => "SWBD",
        }
    }

    /// Tile source, rule and output file name for the thresholded sources
    pub fn threshold_strategy(&self) -> Option<(TileSource, WaterRule, &'static str)> {
        match self {
            MaskSource::EsaWorldCover2021 => Some((
                TileSource::EsaWorldCover2021,
                WaterRule::Equals(WORLD_COVER_PERMANENT_WATER),
                "water_mask_derived_from_esa_world_cover_2021_10m.geo",
            )),
            MaskSource::PekelOccurrence2021 => Some((
                TileSource::PekelWaterOccurrence2021,
                WaterRule::AtLeast(MIN_WATER_OCCURRENCE_PERCENT),
                PEKEL_OUTPUT_NAME,
            )),
            MaskSource::Swbd => None,
        }
    }
}

impl fmt::Display for MaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MaskSource {
    type Err = WaterMaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "esa_world_cover_2021_10m" => Ok(MaskSource::EsaWorldCover2021),
            "pekel_water_occurrence_2021" => Ok(MaskSource::PekelOccurrence2021),
            "SWBD" => Ok(MaskSource::Swbd),
            other => Err(WaterMaskError::NotImplemented(other.to_string())),
        }
    }
}

/// Water mask derivation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterMaskParams {
    /// Margin added around the extent before snapping to whole degrees
    pub buffer_degrees: f64,
    /// Directory receiving the mask and its headers
    pub output_dir: PathBuf,
}

impl Default for WaterMaskParams {
    fn default() -> Self {
        Self {
            buffer_degrees: DEFAULT_BUFFER_DEGREES,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Derives a binary water mask for an extent from one of the mask sources
pub struct WaterMaskDeriver {
    params: WaterMaskParams,
    tiles: Box<dyn TileFetcher>,
    boundaries: Box<dyn BoundaryDownloader>,
    fixup: Box<dyn MetadataFixup>,
}

impl WaterMaskDeriver {
    /// Deriver backed by the GDAL tile fetcher, SWBD downloader and ISCE header fixer
    pub fn new(params: WaterMaskParams) -> Self {
        Self::with_collaborators(
            params,
            Box::new(GdalTileFetcher::new()),
            Box::new(SwbdDownloader::new()),
            Box::new(IsceXmlFixer::default()),
        )
    }

    pub fn with_collaborators(
        params: WaterMaskParams,
        tiles: Box<dyn TileFetcher>,
        boundaries: Box<dyn BoundaryDownloader>,
        fixup: Box<dyn MetadataFixup>,
    ) -> Self {
        Self { params, tiles, boundaries, fixup }
    }

    /// Parse `name` and derive the mask; unknown names fail before any I/O
    pub fn derive_mask_by_name(
        &self,
        extent: &Extent,
        name: &str,
    ) -> WaterMaskResult<WaterMaskProduct> {
        let source = name.parse::<MaskSource>()?;
        self.derive_mask(extent, source)
    }

    pub fn derive_mask(
        &self,
        extent: &Extent,
        source: MaskSource,
    ) -> WaterMaskResult<WaterMaskProduct> {
        log::info!("Deriving {} water mask for {:?}", source, extent.bbox().bounds());

        let buffered = extent.buffered(self.params.buffer_degrees)?;
        let output_dir = std::path::absolute(&self.params.output_dir)?;

        let water_mask = match source.threshold_strategy() {
            Some((tile_source, rule, filename)) => {
                let output_path = output_dir.join(filename);
                Some(self.threshold_tiles(&buffered, tile_source, rule, &output_path)?)
            }
            None => self.swbd_mask(&buffered, &output_dir)?,
        };

        Ok(WaterMaskProduct { water_mask })
    }

    fn threshold_tiles(
        &self,
        bbox: &BoundingBox,
        tile_source: TileSource,
        rule: WaterRule,
        output_path: &Path,
    ) -> WaterMaskResult<PathBuf> {
        let tile = self.tiles.fetch(bbox, tile_source)?;
        let mask = water_mask(tile.data.view(), rule);

        let mut profile = tile.profile;
        profile.nodata = None;
        profile.driver = ISCE_DRIVER.to_string();

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_isce_raster(output_path, mask.view(), &profile)?;
        self.fixup.fix(output_path)
    }

    fn swbd_mask(&self, bbox: &BoundingBox, output_dir: &Path) -> WaterMaskResult<Option<PathBuf>> {
        let lats = [bbox.min_lat, bbox.max_lat];
        if !lats.iter().all(|lat| lat.abs() < SWBD_MAX_ABS_LATITUDE) {
            log::warn!(
                "Request out of SWBD coverage (latitudes {:?}), skip downloading water mask",
                lats
            );
            return Ok(None);
        }

        let filename = self.boundaries.download(
            bbox.min_lat,
            bbox.max_lat,
            bbox.min_lon,
            bbox.max_lon,
            output_dir,
        )?;
        Ok(Some(output_dir.join(filename)))
    }
}
