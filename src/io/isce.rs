//! ISCE image writing and header (`.xml` / `.vrt`) rendering

use crate::types::{GeoTransform, RasterProfile, WaterMaskError, WaterMaskResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// GDAL driver name of the ISCE native image format
pub const ISCE_DRIVER: &str = "ISCE";

/// Rewrites the header files of a raster after its pixels were written
pub trait MetadataFixup: Send + Sync {
    /// Render header files for `path` and return the path downstream readers should use
    fn fix(&self, path: &Path) -> WaterMaskResult<PathBuf>;
}

/// Write a single-band byte raster using the driver and georeferencing in `profile`
pub fn write_isce_raster<P: AsRef<Path>>(
    output_path: P,
    data: ArrayView2<'_, u8>,
    profile: &RasterProfile,
) -> WaterMaskResult<()> {
    let output_path = output_path.as_ref();
    let (height, width) = data.dim();

    if (width, height) != (profile.width, profile.height) {
        return Err(WaterMaskError::Processing(format!(
            "array is {}x{} but profile describes {}x{}",
            width, height, profile.width, profile.height
        )));
    }
    if profile.count != 1 {
        return Err(WaterMaskError::Processing(format!(
            "expected a single band, profile has {}",
            profile.count
        )));
    }

    log::info!("Writing {} raster: {}", profile.driver, output_path.display());
    log::debug!("Raster size: {}x{}, transform: {:?}", width, height, profile.transform);

    let driver = DriverManager::get_driver_by_name(&profile.driver)?;
    let mut dataset = driver.create_with_band_type::<u8, _>(
        output_path,
        width as isize,
        height as isize,
        1,
    )?;

    dataset.set_geo_transform(&profile.transform.to_gdal())?;
    if let Some(wkt) = &profile.crs {
        dataset.set_spatial_ref(&SpatialRef::from_wkt(wkt)?)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u8> = data.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    if let Some(nodata) = profile.nodata {
        rasterband.set_no_data_value(Some(nodata))?;
    }

    Ok(())
}

/// Renders ISCE `.xml` and `.vrt` headers for byte images with an absolute `file_name`
#[derive(Debug, Clone, Default)]
pub struct IsceXmlFixer;

impl MetadataFixup for IsceXmlFixer {
    fn fix(&self, path: &Path) -> WaterMaskResult<PathBuf> {
        let path = std::path::absolute(path)?;
        log::debug!("Rendering ISCE headers for {}", path.display());

        let (width, length, bands, transform, crs) = {
            let dataset = Dataset::open(&path)?;
            let (width, length) = dataset.raster_size();
            let transform = GeoTransform::from_gdal(&dataset.geo_transform()?);
            let crs = dataset.spatial_ref().ok().and_then(|srs| srs.to_wkt().ok());
            (width, length, dataset.raster_count() as usize, transform, crs)
        };

        let image = IsceImageXml::new(&path, width, length, bands, &transform);
        std::fs::write(sidecar_path(&path, "xml"), image.to_xml()?)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vrt = VrtDataset::raw_band(&file_name, width, length, &transform, crs);
        std::fs::write(sidecar_path(&path, "vrt"), vrt.to_xml()?)?;

        Ok(path)
    }
}

/// `image.geo` -> `image.geo.xml`
pub fn sidecar_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// `<property name="..."><value>...</value></property>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlProperty {
    #[serde(rename = "@name")]
    pub name: String,
    pub value: String,
}

impl XmlProperty {
    fn new(name: &str, value: impl ToString) -> Self {
        Self { name: name.to_string(), value: value.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlComponent {
    #[serde(rename = "@name")]
    pub name: String,
    pub factorymodule: String,
    pub factoryname: String,
    #[serde(rename = "property", default)]
    pub properties: Vec<XmlProperty>,
}

impl XmlComponent {
    fn coordinate(name: &str, start: f64, delta: f64, size: usize) -> Self {
        Self {
            name: name.to_string(),
            factorymodule: "isceobj.Image".to_string(),
            factoryname: "createCoordinate".to_string(),
            properties: vec![
                XmlProperty::new("startingvalue", start),
                XmlProperty::new("delta", delta),
                XmlProperty::new("size", size),
                XmlProperty::new("endingvalue", start + delta * size as f64),
            ],
        }
    }
}

/// ISCE image header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "imageFile")]
pub struct IsceImageXml {
    #[serde(rename = "property", default)]
    pub properties: Vec<XmlProperty>,
    #[serde(rename = "component", default)]
    pub components: Vec<XmlComponent>,
}

impl IsceImageXml {
    pub fn new(
        path: &Path,
        width: usize,
        length: usize,
        bands: usize,
        transform: &GeoTransform,
    ) -> Self {
        Self {
            properties: vec![
                XmlProperty::new("width", width),
                XmlProperty::new("length", length),
                XmlProperty::new("number_bands", bands),
                XmlProperty::new("data_type", "BYTE"),
                XmlProperty::new("scheme", "BIP"),
                XmlProperty::new("byte_order", "l"),
                XmlProperty::new("access_mode", "read"),
                XmlProperty::new("file_name", path.display()),
            ],
            components: vec![
                XmlComponent::coordinate(
                    "coordinate1",
                    transform.top_left_x,
                    transform.pixel_width,
                    width,
                ),
                XmlComponent::coordinate(
                    "coordinate2",
                    transform.top_left_y,
                    transform.pixel_height,
                    length,
                ),
            ],
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn to_xml(&self) -> WaterMaskResult<String> {
        quick_xml::se::to_string(self).map_err(|e| WaterMaskError::Xml(e.to_string()))
    }

    pub fn from_xml(xml: &str) -> WaterMaskResult<Self> {
        quick_xml::de::from_str(xml).map_err(|e| WaterMaskError::Xml(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrtSourceFilename {
    #[serde(rename = "@relativeToVRT")]
    pub relative_to_vrt: u8,
    #[serde(rename = "$text")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrtRasterBand {
    #[serde(rename = "@dataType")]
    pub data_type: String,
    #[serde(rename = "@band")]
    pub band: usize,
    #[serde(rename = "@subClass")]
    pub sub_class: String,
    #[serde(rename = "SourceFilename")]
    pub source_filename: VrtSourceFilename,
    #[serde(rename = "ByteOrder")]
    pub byte_order: String,
    #[serde(rename = "ImageOffset")]
    pub image_offset: usize,
    #[serde(rename = "PixelOffset")]
    pub pixel_offset: usize,
    #[serde(rename = "LineOffset")]
    pub line_offset: usize,
}

/// GDAL VRT wrapping a raw ISCE image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "VRTDataset")]
pub struct VrtDataset {
    #[serde(rename = "@rasterXSize")]
    pub raster_x_size: usize,
    #[serde(rename = "@rasterYSize")]
    pub raster_y_size: usize,
    #[serde(rename = "SRS", default, skip_serializing_if = "Option::is_none")]
    pub srs: Option<String>,
    #[serde(rename = "GeoTransform")]
    pub geo_transform: String,
    #[serde(rename = "VRTRasterBand")]
    pub band: VrtRasterBand,
}

impl VrtDataset {
    pub fn raw_band(
        file_name: &str,
        width: usize,
        length: usize,
        transform: &GeoTransform,
        srs: Option<String>,
    ) -> Self {
        let geo_transform = transform
            .to_gdal()
            .iter()
            .map(|v| format!("{:.16e}", v))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            raster_x_size: width,
            raster_y_size: length,
            srs,
            geo_transform,
            band: VrtRasterBand {
                data_type: "Byte".to_string(),
                band: 1,
                sub_class: "VRTRawRasterBand".to_string(),
                source_filename: VrtSourceFilename {
                    relative_to_vrt: 1,
                    name: file_name.to_string(),
                },
                byte_order: "LSB".to_string(),
                image_offset: 0,
                pixel_offset: 1,
                line_offset: width,
            },
        }
    }

    pub fn to_xml(&self) -> WaterMaskResult<String> {
        quick_xml::se::to_string(self).map_err(|e| WaterMaskError::Xml(e.to_string()))
    }

    pub fn from_xml(xml: &str) -> WaterMaskResult<Self> {
        quick_xml::de::from_str(xml).map_err(|e| WaterMaskError::Xml(e.to_string()))
    }
}
