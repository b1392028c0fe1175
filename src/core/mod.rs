//! Core water mask derivation

pub mod extent;
pub mod threshold;
pub mod water_mask;

// Re-export main types
pub use extent::{Extent, DEFAULT_BUFFER_DEGREES};
pub use threshold::{water_mask, WaterRule};
pub use water_mask::{MaskSource, WaterMaskDeriver, WaterMaskParams, SWBD_MAX_ABS_LATITUDE};
