// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Linear value scaling.
//!
//! Raw protocol values are converted to engineering units by one of two
//! fixed transforms before being persisted:
//!
//! - **slope_intercept**: `value * slope + offset`
//! - **point_slope**: linear remap from `[value_min, value_max]` onto
//!   `[target_min, target_max]`
//!
//! Results are rounded to 3 decimal places. The descriptor is immutable
//! once a point is subscribed; changing it requires a full resubscribe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A scaling descriptor that cannot produce finite values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScalingError {
    /// `point_slope` with `value_min == value_max` would divide by zero.
    #[error("point_slope input range is empty (value_min == value_max == {bound})")]
    EmptyInputRange {
        /// The collapsed bound.
        bound: f64,
    },
}

/// Which linear transform a point uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// `value * slope + offset`.
    #[default]
    SlopeIntercept,

    /// Remap `[value_min, value_max]` onto `[target_min, target_max]`.
    PointSlope,
}

/// Scaling descriptor attached to each template point.
///
/// Field names match the `autoScaling` object in the point-template
/// document. Fields not used by the selected mode are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoScaling {
    /// Selected transform.
    #[serde(rename = "scale_mode", default)]
    pub scale_mode: ScaleMode,

    /// Slope for `slope_intercept`.
    #[serde(default = "default_slope")]
    pub slope: f64,

    /// Offset for `slope_intercept`.
    #[serde(default)]
    pub offset: f64,

    /// Lower bound of the raw input range for `point_slope`.
    #[serde(default)]
    pub value_min: f64,

    /// Upper bound of the raw input range for `point_slope`.
    #[serde(default)]
    pub value_max: f64,

    /// Lower bound of the output range for `point_slope`.
    #[serde(default)]
    pub target_min: f64,

    /// Upper bound of the output range for `point_slope`.
    #[serde(default)]
    pub target_max: f64,
}

fn default_slope() -> f64 {
    1.0
}

impl Default for AutoScaling {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::SlopeIntercept,
            slope: 1.0,
            offset: 0.0,
            value_min: 0.0,
            value_max: 0.0,
            target_min: 0.0,
            target_max: 0.0,
        }
    }
}

impl AutoScaling {
    /// Identity transform.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Applies the transform to a raw value, rounded to 3 decimals.
    pub fn apply(&self, raw: f64) -> f64 {
        let scaled = match self.scale_mode {
            ScaleMode::SlopeIntercept => raw * self.slope + self.offset,
            ScaleMode::PointSlope => {
                (self.target_max - self.target_min) / (self.value_max - self.value_min)
                    * (raw - self.value_min)
                    + self.target_min
            }
        };
        round3(scaled)
    }

    /// Checks the descriptor for a usable configuration.
    ///
    /// `point_slope` with a degenerate input range would divide by zero;
    /// rejected here so the build phase can skip the point with a logged
    /// error instead of persisting non-finite values.
    pub fn validate(&self) -> Result<(), ScalingError> {
        if self.scale_mode == ScaleMode::PointSlope && self.value_max == self.value_min {
            return Err(ScalingError::EmptyInputRange {
                bound: self.value_min,
            });
        }
        Ok(())
    }
}

/// Rounds to 3 decimal places, half away from zero.
#[inline]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_intercept_scales_and_rounds() {
        let scaling = AutoScaling {
            scale_mode: ScaleMode::SlopeIntercept,
            slope: 0.1,
            offset: 0.0,
            ..Default::default()
        };
        assert_eq!(scaling.apply(1060.0), 106.0);

        let scaling = AutoScaling {
            slope: 0.333_333,
            offset: 0.5,
            ..Default::default()
        };
        assert_eq!(scaling.apply(3.0), 1.5);
    }

    #[test]
    fn point_slope_remaps_range() {
        let scaling = AutoScaling {
            scale_mode: ScaleMode::PointSlope,
            value_min: 0.0,
            value_max: 100.0,
            target_min: 0.0,
            target_max: 1.0,
            ..Default::default()
        };
        assert_eq!(scaling.apply(50.0), 0.5);
        assert_eq!(scaling.apply(0.0), 0.0);
        assert_eq!(scaling.apply(100.0), 1.0);
    }

    #[test]
    fn identity_passes_values_through() {
        assert_eq!(AutoScaling::identity().apply(42.125), 42.125);
    }

    #[test]
    fn degenerate_point_slope_rejected() {
        let scaling = AutoScaling {
            scale_mode: ScaleMode::PointSlope,
            value_min: 5.0,
            value_max: 5.0,
            ..Default::default()
        };
        assert_eq!(
            scaling.validate(),
            Err(ScalingError::EmptyInputRange { bound: 5.0 })
        );
        assert!(AutoScaling::identity().validate().is_ok());
    }

    #[test]
    fn deserializes_template_json() {
        let json = r#"{
            "scale_mode": "slope_intercept",
            "slope": 0.1,
            "offset": 0
        }"#;
        let scaling: AutoScaling = serde_json::from_str(json).unwrap();
        assert_eq!(scaling.scale_mode, ScaleMode::SlopeIntercept);
        assert_eq!(scaling.slope, 0.1);
        // Unset point_slope fields fall back to zero.
        assert_eq!(scaling.value_max, 0.0);
    }
}
