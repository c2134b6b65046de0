//! Automation points.

use crate::curve::CurveOptions;
use serde::{Deserialize, Serialize};

/// One automation point inside an automation region.
///
/// `local_pos` is the frame offset from the region start. The value is
/// stored normalized to `[0, 1]`; denormalization against the target port's
/// range happens at evaluation time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub local_pos: i64,
    pub normalized_value: f32,
    /// Shape of the segment from this point to the next one.
    pub curve_opts: CurveOptions,
}

impl AutomationPoint {
    pub fn new(local_pos: i64, normalized_value: f32) -> Self {
        Self {
            local_pos,
            normalized_value: normalized_value.clamp(0.0, 1.0),
            curve_opts: CurveOptions::linear(),
        }
    }

    pub fn with_curve(mut self, curve_opts: CurveOptions) -> Self {
        self.curve_opts = curve_opts;
        self
    }

    /// Progress of the segment from `self` to `next` at `ratio ∈ [0, 1]`.
    ///
    /// Starts at 1 and falls to 0 when this point is higher than the next,
    /// so callers can always add `progress * |next - self|` on top of the
    /// lower of the two values.
    pub fn normalized_curve_progress(&self, next: &AutomationPoint, ratio: f64) -> f64 {
        let start_higher = self.normalized_value > next.normalized_value;
        self.curve_opts.evaluate_directed(ratio, start_higher)
    }
}
