//! I/O modules for fetching source rasters and writing ISCE images

pub mod isce;
pub mod swbd;
pub mod tiles;

pub use isce::{IsceXmlFixer, MetadataFixup};
pub use swbd::{BoundaryDownloader, SwbdConfig, SwbdDownloader};
pub use tiles::{GdalTileFetcher, TileFetcher, TileFetcherConfig, TileSource};
