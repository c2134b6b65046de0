//! Shared fixtures for the integration tests: a backendless engine,
//! deterministic signal generators and audio comparison assertions.

#![allow(dead_code)]

use ostinato::prelude::*;

/// Default test sample rate.
pub const TEST_SAMPLE_RATE: u32 = 48000;

/// Block size small enough to exercise multi-block behavior quickly.
pub const TEST_BLOCK: u32 = 256;

/// Engine with manual cycle control (no DSP thread, no backend).
pub fn test_engine() -> OstinatoEngine {
    OstinatoEngine::builder()
        .sample_rate(TEST_SAMPLE_RATE)
        .block_length(TEST_BLOCK)
        .build()
        .expect("test engine")
}

/// Run `n` cycles and return the final cycle's stereo output.
pub fn run_cycles(engine: &OstinatoEngine, n: usize) -> (Vec<f32>, Vec<f32>) {
    let block = engine.block_length();
    for _ in 0..n {
        engine.process(block);
    }
    let mut l = vec![0.0; block as usize];
    let mut r = vec![0.0; block as usize];
    engine.copy_output(&mut l, &mut r);
    (l, r)
}

/// Constant-value mono samples.
pub fn generate_dc(value: f32, num_samples: usize) -> Vec<f32> {
    vec![value; num_samples]
}

/// Integer staircase `[0, 1, 2, ...]`, for exact routing checks.
pub fn generate_staircase(num_samples: usize) -> Vec<f32> {
    (0..num_samples).map(|i| i as f32).collect()
}

/// Linear ramp from `start` to `end`.
pub fn generate_ramp(start: f32, end: f32, num_samples: usize) -> Vec<f32> {
    if num_samples <= 1 {
        return vec![start; num_samples];
    }
    let step = (end - start) / (num_samples - 1) as f32;
    (0..num_samples).map(|i| start + step * i as f32).collect()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Near-silence check that tolerates the denormal-prevention bias.
pub fn assert_denormal_silence(samples: &[f32], context: &str) {
    let max = peak(samples);
    assert!(
        max < 1e-9,
        "{context}: expected denormal-level silence, peak was {max}"
    );
}

pub fn assert_signals_equal(a: &[f32], b: &[f32], epsilon: f32, context: &str) {
    assert_eq!(a.len(), b.len(), "{context}: length mismatch");
    for (i, (&x, &y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() <= epsilon,
            "{context}: sample {i} differs: {x} vs {y}"
        );
    }
}

pub fn assert_not_silent(samples: &[f32], min_peak: f32, context: &str) {
    let max = peak(samples);
    assert!(
        max >= min_peak,
        "{context}: expected audio above {min_peak}, peak was {max}"
    );
}
