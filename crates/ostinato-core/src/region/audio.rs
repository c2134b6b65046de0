//! Audio regions.

use crate::pool::{AudioClip, PoolId};
use crate::region::Region;
use crate::time::TimeInfo;
use serde::{Deserialize, Serialize};

/// Musical-mode stretch setting of an audio region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MusicalMode {
    /// Follow the global musical-mode setting.
    #[default]
    Inherit,
    /// Don't auto-stretch when the tempo changes.
    Off,
    /// Auto-stretch when the tempo changes.
    On,
}

/// Payload of an audio region: a pool clip reference plus playback gain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioRegionData {
    pub pool_id: PoolId,
    pub gain: f32,
    pub musical_mode: MusicalMode,
}

impl AudioRegionData {
    pub fn new(pool_id: PoolId) -> Self {
        Self {
            pool_id,
            gain: 1.0,
            musical_mode: MusicalMode::default(),
        }
    }
}

/// Mix one window of the region's clip into stereo buffers.
///
/// Handles loop traversal sample by sample (the caller does NOT need to
/// split at the region's internal loop points, only at transport loops),
/// applies region fades and gain. Mono clips are duplicated to both sides.
pub fn fill_stereo(
    region: &Region,
    clip: &AudioClip,
    time: TimeInfo,
    left: &mut [f32],
    right: &mut [f32],
) {
    if region.muted {
        return;
    }
    let Some(data) = region.as_audio() else {
        return;
    };

    let left_src = clip.channel(0);
    let right_src = clip.channel(if clip.channels > 1 { 1 } else { 0 });

    for i in 0..time.nframes {
        let tl = time.g_start_frame + i as i64;
        if !region.contains(tl) {
            continue;
        }
        let local = region.timeline_frames_to_local(tl, true);
        if local < 0 || local as usize >= clip.num_frames {
            continue;
        }
        let fade = region.fade_multiplier(tl - region.start_pos);
        let k = data.gain * fade;
        let out_idx = (time.local_offset + i) as usize;
        left[out_idx] += left_src[local as usize] * k;
        right[out_idx] += right_src[local as usize] * k;
    }
}
