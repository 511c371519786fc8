//! Parser configuration: one immutable structure passed through the pipeline.

use serde::{Deserialize, Serialize};

/// Sign convention applied to the per-event range center during voltage
/// conversion. `Additive` is the canonical form; `Subtractive` reproduces
/// the output of older program revisions bit-for-bit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum RangeCenterSign {
    Additive,
    Subtractive,
}

/// How output row times are chosen when serializing an event.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub enum ResamplePolicy {
    /// Regular grid with the given step (ns), padded one step past the
    /// first and last sample.
    FixedStep { step: f64 },
    /// Sorted union of every raw sample time across all channels.
    NativeGrid,
}

/// Settings for calibration, cleaning, and resampling.
///
/// Defaults match the vendor acquisition software: start-edge trimming
/// on, end-edge trimming off, saturated events excluded, 0.1 ns output
/// grid.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Run the start-edge trimmer on every channel.
    pub trim: bool,
    /// Also run the end-edge trimmer.
    pub trim_end: bool,
    /// Drop events with any sample outside the saturation band.
    pub exclude_saturated: bool,
    /// Trimmer voltage threshold (mV).
    pub trim_threshold: f64,
    /// Trimmer window size (samples).
    pub trim_window: usize,
    /// Half-width of the allowed band around the range center (mV).
    pub saturation_margin: f64,
    pub range_center_sign: RangeCenterSign,
    pub resample: ResamplePolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            trim: true,
            trim_end: false,
            exclude_saturated: true,
            trim_threshold: 50.0,
            trim_window: 15,
            saturation_margin: 495.0,
            range_center_sign: RangeCenterSign::Additive,
            resample: ResamplePolicy::FixedStep { step: 0.1 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let config = ParserConfig::default();
        assert!(config.trim);
        assert!(!config.trim_end);
        assert!(config.exclude_saturated);
        assert_eq!(config.trim_threshold, 50.0);
        assert_eq!(config.trim_window, 15);
        assert_eq!(config.saturation_margin, 495.0);
        assert_eq!(config.range_center_sign, RangeCenterSign::Additive);
        assert_eq!(config.resample, ResamplePolicy::FixedStep { step: 0.1 });
    }
}
