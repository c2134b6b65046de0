//! Optimized slice kernels used by ports and faders.
//!
//! All functions operate on whole `&[f32]` ranges so the compiler can
//! autovectorize them.

/// Fill the buffer with the given value.
#[inline]
pub fn fill(buf: &mut [f32], val: f32) {
    buf.fill(val);
}

/// dest[i] = src[i].
#[inline]
pub fn copy(dest: &mut [f32], src: &[f32]) {
    dest.copy_from_slice(src);
}

/// dest[i] *= k.
#[inline]
pub fn mul_k2(dest: &mut [f32], k: f32) {
    for v in dest.iter_mut() {
        *v *= k;
    }
}

/// dest[i] += src[i] * k.
#[inline]
pub fn mix_product(dest: &mut [f32], src: &[f32], k: f32) {
    for (d, s) in dest.iter_mut().zip(src.iter()) {
        *d += s * k;
    }
}

/// Clamp the buffer to min/max.
#[inline]
pub fn clip(buf: &mut [f32], min: f32, max: f32) {
    for v in buf.iter_mut() {
        *v = v.clamp(min, max);
    }
}

/// Largest absolute sample value.
#[inline]
pub fn abs_max(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
}

/// Make the two channels mono by equal-amplitude averaging.
///
/// Equal amplitude (`(L+R)/2`) rather than equal power, since the caller is
/// a mono-compatibility check.
#[inline]
pub fn make_mono(left: &mut [f32], right: &mut [f32]) {
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let sum = (*l + *r) * 0.5;
        *l = sum;
        *r = sum;
    }
}

/// Linear fade-in over a window of `total_fade_frames`.
///
/// `start_offset` is how far into the fade window this buffer begins. The
/// multiplier rises linearly from `fade_from` (at offset 0) to 1.0 (at
/// offset `total_fade_frames`).
#[inline]
pub fn linear_fade_in_from(
    dest: &mut [f32],
    start_offset: u32,
    total_fade_frames: u32,
    fade_from: f32,
) {
    debug_assert!(total_fade_frames > 0);
    let total = total_fade_frames as f32;
    for (i, v) in dest.iter_mut().enumerate() {
        let pos = (start_offset + i as u32).min(total_fade_frames) as f32;
        let k = fade_from + (1.0 - fade_from) * (pos / total);
        *v *= k;
    }
}

/// Linear fade-out over a window of `total_fade_frames`.
///
/// The multiplier falls linearly from 1.0 (at offset 0) to `fade_to` (at
/// offset `total_fade_frames`).
#[inline]
pub fn linear_fade_out_to(
    dest: &mut [f32],
    start_offset: u32,
    total_fade_frames: u32,
    fade_to: f32,
) {
    debug_assert!(total_fade_frames > 0);
    let total = total_fade_frames as f32;
    for (i, v) in dest.iter_mut().enumerate() {
        let pos = (start_offset + i as u32).min(total_fade_frames) as f32;
        let k = fade_to + (1.0 - fade_to) * (1.0 - pos / total);
        *v *= k;
    }
}

/// Convert an amplitude multiplier to dBFS.
#[inline]
pub fn amp_to_dbfs(amp: f32) -> f32 {
    if amp < 1e-20 {
        -f32::INFINITY
    } else {
        20.0 * amp.log10()
    }
}

/// Convert dBFS to an amplitude multiplier.
#[inline]
pub fn dbfs_to_amp(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Map an amplitude in `[0, 2]` onto the fader's visual scale in `[0, 1]`.
///
/// The curve gives ~0.75 of the travel to the -inf..0 dB range.
#[inline]
pub fn fader_val_from_amp(amp: f32) -> f32 {
    if amp <= 0.0 {
        return 0.0;
    }
    let db = amp_to_dbfs(amp);
    // -60 dB..+6.02 dB (amp 2.0) travel, cube-rooted for finer resolution
    // near unity
    let norm = ((db + 60.0) / 66.0206).clamp(0.0, 1.0);
    norm.powf(1.0 / 3.0)
}

/// Inverse of [`fader_val_from_amp`].
#[inline]
pub fn amp_from_fader_val(fader_val: f32) -> f32 {
    let fader_val = fader_val.clamp(0.0, 1.0);
    if fader_val <= 0.0 {
        return 0.0;
    }
    let db = fader_val.powi(3) * 66.0206 - 60.0;
    dbfs_to_amp(db)
}

/// Stereo gains for a balance control in `[0, 1]` (0.5 = center).
///
/// Linear balance law: the boosted side stays at unity while the opposite
/// side is attenuated proportionally.
#[inline]
pub fn balance_control_linear(balance: f32) -> (f32, f32) {
    let balance = balance.clamp(0.0, 1.0);
    if balance <= 0.5 {
        (1.0, balance * 2.0)
    } else {
        ((1.0 - balance) * 2.0, 1.0)
    }
}
