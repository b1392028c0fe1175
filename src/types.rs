use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Byte-valued raster samples (land cover classes, occurrence percent, mask)
pub type ByteImage = Array2<u8>;

/// Mask value written for water pixels
pub const WATER: u8 = 255;

/// Mask value written for everything else
pub const NOT_WATER: u8 = 0;

/// Geospatial bounding box in geographic degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounds in (min_lon, min_lat, max_lon, max_lat) order
    pub fn bounds(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// True when `other` lies entirely inside (or on the edge of) this box
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.min_lon
            && self.min_lat <= other.min_lat
            && self.max_lon >= other.max_lon
            && self.max_lat >= other.max_lat
    }
}

/// Affine geotransform in GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform anchored at the top-left corner of `bbox`
    pub fn north_up(bbox: &BoundingBox, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x: bbox.min_lon,
            pixel_width,
            rotation_x: 0.0,
            top_left_y: bbox.max_lat,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// Georeferencing profile that travels with a byte raster array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterProfile {
    pub width: usize,
    pub height: usize,
    pub count: usize,
    /// Coordinate reference system as WKT
    pub crs: Option<String>,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    /// GDAL driver short name
    pub driver: String,
}

/// Raster array plus profile as returned by a tile fetch
#[derive(Debug, Clone)]
pub struct RasterTile {
    pub data: ByteImage,
    pub profile: RasterProfile,
}

/// Outcome of a water mask request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaterMaskProduct {
    /// Absolute path of the produced mask, `None` when the source has no coverage
    pub water_mask: Option<PathBuf>,
}

impl WaterMaskProduct {
    pub fn is_empty(&self) -> bool {
        self.water_mask.is_none()
    }

    /// Mapping form used by the processing pipeline; no coverage maps to ""
    pub fn to_map(&self) -> HashMap<String, String> {
        let value = self
            .water_mask
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        HashMap::from([("water_mask".to_string(), value)])
    }
}

/// Error types for water mask localization
#[derive(Debug, thiserror::Error)]
pub enum WaterMaskError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid extent: {0}")]
    InvalidExtent(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Water mask not available: {0}")]
    NotImplemented(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("XML error: {0}")]
    Xml(String),
}

/// Result type for water mask operations
pub type WaterMaskResult<T> = Result<T, WaterMaskError>;
