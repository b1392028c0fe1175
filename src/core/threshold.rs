use crate::types::{ByteImage, NOT_WATER, WATER};
use ndarray::{ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// ESA WorldCover class code for permanent water bodies
pub const WORLD_COVER_PERMANENT_WATER: u8 = 80;

/// Minimum Pekel occurrence (percent) counted as water
pub const MIN_WATER_OCCURRENCE_PERCENT: u8 = 95;

/// Per-pixel rule deciding whether a source sample is water
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterRule {
    /// Sample equals a class code
    Equals(u8),
    /// Sample is at least a percentage
    AtLeast(u8),
}

impl WaterRule {
    #[inline]
    pub fn is_water(&self, value: u8) -> bool {
        match *self {
            WaterRule::Equals(code) => value == code,
            WaterRule::AtLeast(min) => value >= min,
        }
    }
}

/// Map each sample to 255 where `rule` holds and 0 elsewhere
pub fn water_mask(samples: ArrayView2<'_, u8>, rule: WaterRule) -> ByteImage {
    let select = |&v: &u8| if rule.is_water(v) { WATER } else { NOT_WATER };

    #[cfg(feature = "parallel")]
    let mask = Zip::from(&samples).par_map_collect(select);
    #[cfg(not(feature = "parallel"))]
    let mask = Zip::from(&samples).map_collect(select);

    let water = mask.iter().filter(|&&v| v == WATER).count();
    log::debug!(
        "{:?}: {} of {} pixels flagged as water",
        rule,
        water,
        mask.len()
    );
    mask
}
