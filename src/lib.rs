//! watermask: water mask localization for Sentinel-1 interferometric processing
//!
//! Derives a binary (0/255) water mask raster in ISCE image format for a
//! geographic extent from ESA WorldCover 2021, Pekel water occurrence 2021,
//! or SRTM Water Body Data.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, GeoTransform, RasterProfile, RasterTile, WaterMaskError, WaterMaskProduct,
    WaterMaskResult,
};

pub use crate::core::{Extent, MaskSource, WaterMaskDeriver, WaterMaskParams};
pub use io::{
    BoundaryDownloader, GdalTileFetcher, IsceXmlFixer, MetadataFixup, SwbdDownloader, TileFetcher,
};

/// Derive a water mask with the default collaborators.
///
/// Returns `{"water_mask": path}`, where the path is empty when the source does
/// not cover the buffered extent.
pub fn download_water_mask(
    extent: &[f64],
    water_mask_name: &str,
    params: WaterMaskParams,
) -> WaterMaskResult<std::collections::HashMap<String, String>> {
    let extent = Extent::from_slice(extent)?;
    let product = WaterMaskDeriver::new(params).derive_mask_by_name(&extent, water_mask_name)?;
    Ok(product.to_map())
}

#[cfg(feature = "python")]
mod python {
    use crate::core::threshold::{
        water_mask, WaterRule, MIN_WATER_OCCURRENCE_PERCENT, WORLD_COVER_PERMANENT_WATER,
    };
    use crate::{Extent, MaskSource, WaterMaskDeriver, WaterMaskError, WaterMaskParams};
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::exceptions::{PyNotImplementedError, PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    fn to_py_err(e: WaterMaskError) -> PyErr {
        match e {
            WaterMaskError::NotImplemented(_) => PyNotImplementedError::new_err(e.to_string()),
            WaterMaskError::InvalidExtent(_) | WaterMaskError::InvalidParameter(_) => {
                PyValueError::new_err(e.to_string())
            }
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }

    /// Python entry point mirroring the topsApp localization step
    #[pyfunction]
    #[pyo3(signature = (
        extent,
        water_mask_name = "pekel_water_occurrence_2021",
        buffer = 0.1,
        output_dir = "."
    ))]
    fn download_water_mask<'py>(
        py: Python<'py>,
        extent: Vec<f64>,
        water_mask_name: &str,
        buffer: f64,
        output_dir: &str,
    ) -> PyResult<&'py PyDict> {
        let extent = Extent::from_slice(&extent).map_err(to_py_err)?;
        let source = water_mask_name.parse::<MaskSource>().map_err(to_py_err)?;
        let deriver = WaterMaskDeriver::new(WaterMaskParams {
            buffer_degrees: buffer,
            output_dir: output_dir.into(),
        });

        let product = py
            .allow_threads(|| deriver.derive_mask(&extent, source))
            .map_err(to_py_err)?;

        let dict = PyDict::new(py);
        for (key, value) in product.to_map() {
            dict.set_item(key, value)?;
        }
        Ok(dict)
    }

    /// 255 where the ESA WorldCover class is permanent water, else 0
    #[pyfunction]
    fn water_mask_from_world_cover<'py>(
        py: Python<'py>,
        classes: PyReadonlyArray2<u8>,
    ) -> &'py PyArray2<u8> {
        let rule = WaterRule::Equals(WORLD_COVER_PERMANENT_WATER);
        water_mask(classes.as_array(), rule).into_pyarray(py)
    }

    /// 255 where water occurrence is at least 95%, else 0
    #[pyfunction]
    fn water_mask_from_occurrence<'py>(
        py: Python<'py>,
        occurrence: PyReadonlyArray2<u8>,
    ) -> &'py PyArray2<u8> {
        let rule = WaterRule::AtLeast(MIN_WATER_OCCURRENCE_PERCENT);
        water_mask(occurrence.as_array(), rule).into_pyarray(py)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(download_water_mask, m)?)?;
        m.add_function(wrap_pyfunction!(water_mask_from_world_cover, m)?)?;
        m.add_function(wrap_pyfunction!(water_mask_from_occurrence, m)?)?;
        Ok(())
    }
}
