//! Curve shape evaluation.

use serde::{Deserialize, Serialize};

/// How far curviness is allowed to push the exponent family before the
/// shape degenerates numerically.
const EXPONENT_BOUND: f64 = 0.95;
/// Superellipse exponent bound.
const SUPERELLIPSE_BOUND: f64 = 0.82;
/// Steepness multiplier for the sigmoid family.
const VITAL_BOUND: f64 = 10.0;
/// Logarithmic steepness bound.
const LOGARITHMIC_BOUND: f64 = 0.64;

const CURVINESS_EPSILON: f64 = 1e-4;

/// Curve families available on automation points and region fades.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveAlgorithm {
    #[default]
    Linear,
    /// Power curve `x^k`.
    Exponent,
    /// Superellipse (squircle-like) curve.
    SuperEllipse,
    /// Normalized logistic sigmoid, as popularized by the Vital synth.
    Vital,
    /// Hard step at a curviness-controlled threshold.
    Pulse,
    /// Logarithmic rise.
    Logarithmic,
}

/// Shape options for one curve segment.
///
/// `curviness` is in `[-1, 1]`; `0` degenerates every family (except
/// `Pulse`) to a straight line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveOptions {
    pub algorithm: CurveAlgorithm,
    pub curviness: f64,
}

impl CurveOptions {
    pub fn new(algorithm: CurveAlgorithm, curviness: f64) -> Self {
        Self {
            algorithm,
            curviness: curviness.clamp(-1.0, 1.0),
        }
    }

    pub fn linear() -> Self {
        Self::default()
    }

    /// Evaluate the ascending shape at `x ∈ [0, 1]`, returning `y ∈ [0, 1]`
    /// with `y(0) = 0` and `y(1) = 1` (except `Pulse`, which is a step).
    pub fn evaluate(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let c = self.curviness.clamp(-1.0, 1.0);

        match self.algorithm {
            CurveAlgorithm::Linear => x,
            CurveAlgorithm::Exponent => {
                let c = c * EXPONENT_BOUND;
                if c.abs() < CURVINESS_EPSILON {
                    x
                } else {
                    // (1+c)/(1-c) maps [-1,1] onto (0, inf) symmetrically
                    // around 1, so positive curviness bows late and negative
                    // bows early.
                    x.powf((1.0 + c) / (1.0 - c))
                }
            }
            CurveAlgorithm::SuperEllipse => {
                let c = c * SUPERELLIPSE_BOUND;
                if c.abs() < CURVINESS_EPSILON {
                    x
                } else if c > 0.0 {
                    let p = 1.0 - c;
                    1.0 - (1.0 - x.powf(p)).powf(1.0 / p)
                } else {
                    let p = 1.0 + c;
                    (1.0 - (1.0 - x).powf(p)).powf(1.0 / p)
                }
            }
            CurveAlgorithm::Vital => {
                let s = c * VITAL_BOUND;
                if s.abs() < CURVINESS_EPSILON {
                    x
                } else {
                    let sigmoid = |t: f64| 1.0 / (1.0 + (-t).exp());
                    let lo = sigmoid(-s / 2.0);
                    let hi = sigmoid(s / 2.0);
                    (sigmoid(s * (x - 0.5)) - lo) / (hi - lo)
                }
            }
            CurveAlgorithm::Pulse => {
                let threshold = (1.0 + c) / 2.0;
                if x < threshold {
                    0.0
                } else {
                    1.0
                }
            }
            CurveAlgorithm::Logarithmic => {
                let c = c * LOGARITHMIC_BOUND;
                if c.abs() < CURVINESS_EPSILON {
                    x
                } else {
                    // k grows quickly with |c|; mirrored for negative values.
                    let k = (c.abs() * 8.0).exp() - 1.0;
                    let shaped = (1.0 + k * x).ln() / (1.0 + k).ln();
                    if c > 0.0 {
                        shaped
                    } else {
                        1.0 - (1.0 + k * (1.0 - x)).ln() / (1.0 + k).ln()
                    }
                }
            }
        }
    }

    /// Evaluate the segment's progress at `x`, flipped so the result starts
    /// at 1 when the segment descends. Mirroring on the x axis keeps the
    /// shape's character identical in both directions.
    pub fn evaluate_directed(&self, x: f64, start_higher: bool) -> f64 {
        if start_higher {
            self.evaluate(1.0 - x.clamp(0.0, 1.0))
        } else {
            self.evaluate(x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CurveAlgorithm; 6] = [
        CurveAlgorithm::Linear,
        CurveAlgorithm::Exponent,
        CurveAlgorithm::SuperEllipse,
        CurveAlgorithm::Vital,
        CurveAlgorithm::Pulse,
        CurveAlgorithm::Logarithmic,
    ];

    #[test]
    fn test_endpoints_preserved() {
        for algo in ALL {
            if algo == CurveAlgorithm::Pulse {
                // a step does not interpolate its endpoints
                continue;
            }
            for curviness in [-1.0, -0.5, 0.0, 0.5, 1.0] {
                let opts = CurveOptions::new(algo, curviness);
                let y0 = opts.evaluate(0.0);
                let y1 = opts.evaluate(1.0);
                assert!(y0.abs() < 1e-9, "{algo:?} c={curviness}: y(0)={y0}");
                assert!((y1 - 1.0).abs() < 1e-9, "{algo:?} c={curviness}: y(1)={y1}");
            }
        }
    }

    #[test]
    fn test_zero_curviness_is_linear() {
        for algo in ALL {
            if algo == CurveAlgorithm::Pulse {
                continue;
            }
            let opts = CurveOptions::new(algo, 0.0);
            for i in 0..=10 {
                let x = i as f64 / 10.0;
                assert!(
                    (opts.evaluate(x) - x).abs() < 1e-6,
                    "{algo:?} at x={x} not linear"
                );
            }
        }
    }

    #[test]
    fn test_monotone_increasing() {
        for algo in ALL {
            for curviness in [-0.9, -0.3, 0.3, 0.9] {
                let opts = CurveOptions::new(algo, curviness);
                let mut prev = opts.evaluate(0.0);
                for i in 1..=100 {
                    let y = opts.evaluate(i as f64 / 100.0);
                    assert!(
                        y >= prev - 1e-9,
                        "{algo:?} c={curviness} non-monotone at step {i}"
                    );
                    prev = y;
                }
            }
        }
    }

    #[test]
    fn test_exponent_bows() {
        let late = CurveOptions::new(CurveAlgorithm::Exponent, 0.8);
        let early = CurveOptions::new(CurveAlgorithm::Exponent, -0.8);
        assert!(late.evaluate(0.5) < 0.5);
        assert!(early.evaluate(0.5) > 0.5);
    }

    #[test]
    fn test_pulse_threshold() {
        let opts = CurveOptions::new(CurveAlgorithm::Pulse, 0.0);
        assert_eq!(opts.evaluate(0.49), 0.0);
        assert_eq!(opts.evaluate(0.51), 1.0);

        let shifted = CurveOptions::new(CurveAlgorithm::Pulse, 0.5);
        assert_eq!(shifted.evaluate(0.6), 0.0);
        assert_eq!(shifted.evaluate(0.8), 1.0);
    }

    #[test]
    fn test_directed_descending_starts_high() {
        for algo in ALL {
            let opts = CurveOptions::new(algo, 0.4);
            assert!((opts.evaluate_directed(0.0, true) - 1.0).abs() < 1e-9);
            assert!(opts.evaluate_directed(1.0, true).abs() < 1e-9);
        }
    }

    #[test]
    fn test_curviness_clamped() {
        let opts = CurveOptions::new(CurveAlgorithm::Exponent, 5.0);
        assert_eq!(opts.curviness, 1.0);
    }
}
