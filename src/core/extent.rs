use crate::types::{BoundingBox, WaterMaskError, WaterMaskResult};
use serde::{Deserialize, Serialize};

/// Default margin added around a requested extent, in degrees
pub const DEFAULT_BUFFER_DEGREES: f64 = 0.1;

/// Geographic extent (min_lon, min_lat, max_lon, max_lat) in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    bbox: BoundingBox,
}

impl Extent {
    /// Build an extent, rejecting non-finite or degenerate rectangles
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> WaterMaskResult<Self> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(WaterMaskError::InvalidExtent(format!(
                "non-finite coordinate in {:?}",
                values
            )));
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            return Err(WaterMaskError::InvalidExtent(format!(
                "expected min < max on both axes, got {:?}",
                values
            )));
        }

        Ok(Self {
            bbox: BoundingBox { min_lon, max_lon, min_lat, max_lat },
        })
    }

    /// Build an extent from a `[min_lon, min_lat, max_lon, max_lat]` slice
    pub fn from_slice(values: &[f64]) -> WaterMaskResult<Self> {
        match values {
            &[min_lon, min_lat, max_lon, max_lat] => Self::new(min_lon, min_lat, max_lon, max_lat),
            _ => Err(WaterMaskError::InvalidExtent(format!(
                "expected 4 coordinates, got {}",
                values.len()
            ))),
        }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Grow the extent by `buffer_degrees` on every side.
    ///
    /// The bounding box of a Euclidean buffer around an axis-aligned rectangle
    /// is the rectangle grown by the buffer distance, so no polygon is needed.
    pub fn expanded(&self, buffer_degrees: f64) -> WaterMaskResult<BoundingBox> {
        if !buffer_degrees.is_finite() || buffer_degrees < 0.0 {
            return Err(WaterMaskError::InvalidParameter(format!(
                "buffer must be a non-negative number of degrees, got {}",
                buffer_degrees
            )));
        }

        Ok(BoundingBox {
            min_lon: self.bbox.min_lon - buffer_degrees,
            max_lon: self.bbox.max_lon + buffer_degrees,
            min_lat: self.bbox.min_lat - buffer_degrees,
            max_lat: self.bbox.max_lat + buffer_degrees,
        })
    }

    /// Buffer the extent and snap it outward to whole degrees
    pub fn buffered(&self, buffer_degrees: f64) -> WaterMaskResult<BoundingBox> {
        let expanded = self.expanded(buffer_degrees)?;
        let snapped = snap_outward(&expanded);

        log::debug!(
            "Extent {:?} buffered by {}° -> {:?}",
            self.bbox.bounds(),
            buffer_degrees,
            snapped.bounds()
        );
        Ok(snapped)
    }
}

/// Floor the minima and ceil the maxima of a box
pub fn snap_outward(bbox: &BoundingBox) -> BoundingBox {
    BoundingBox {
        min_lon: bbox.min_lon.floor(),
        max_lon: bbox.max_lon.ceil(),
        min_lat: bbox.min_lat.floor(),
        max_lat: bbox.max_lat.ceil(),
    }
}
