//! Output sample types and the raster sink.
//!
//! The mosaic is rendered as `f32`. Writing converts it once per stripe to the
//! requested sample type; integer types are rounded half away from zero and
//! then clamped to the type's range.

mod sink;

pub use sink::write_raster;

use num_traits::{Bounded, NumCast, Zero};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::ConfigError;

/// Sample type of the written raster.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum OutputType {
    #[default]
    Float32,
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
}

impl OutputType {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        name.parse()
            .map_err(|_| ConfigError::UnsupportedOutputType(name.to_string()))
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, OutputType::Float32)
    }

    /// Converts one value the way pixels of this type are converted.
    pub fn convert_value(&self, value: f64) -> f64 {
        match self {
            OutputType::Float32 => value as f32 as f64,
            OutputType::Byte => round_and_clamp::<u8>(value) as f64,
            OutputType::UInt16 => round_and_clamp::<u16>(value) as f64,
            OutputType::Int16 => round_and_clamp::<i16>(value) as f64,
            OutputType::UInt32 => round_and_clamp::<u32>(value) as f64,
            OutputType::Int32 => round_and_clamp::<i32>(value) as f64,
        }
    }

    /// GDAL_NODATA tag text for `nodata` after conversion to this type.
    pub fn nodata_tag(&self, nodata: f64) -> String {
        let v = self.convert_value(nodata);
        if v.is_nan() {
            "nan".to_string()
        } else {
            format!("{v}")
        }
    }
}

/// Rounds half away from zero, then clamps into `T`'s range. NaN maps to zero.
pub fn round_and_clamp<T>(value: f64) -> T
where
    T: Bounded + NumCast + Zero,
{
    if value.is_nan() {
        return T::zero();
    }
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    T::from(value.round().clamp(lo, hi)).unwrap_or_else(T::zero)
}
