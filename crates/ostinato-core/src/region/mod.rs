//! Timeline regions.
//!
//! A region is a clip on the timeline. The shared base record carries the
//! timeline placement, internal loop window and fades; the per-kind payload
//! (MIDI notes, audio clip reference, chords, automation points) lives in
//! [`RegionKind`]. The polymorphic operations of the original class
//! hierarchy are match-dispatched functions here.

pub mod audio;
pub mod automation;
pub mod chord;
pub mod midi;

use ostinato_automation::CurveOptions;
use serde::{Deserialize, Serialize};

pub use audio::{AudioRegionData, MusicalMode};
pub use automation::AutomationRegionData;
pub use chord::{ChordObject, ChordQuality, ChordRegionData};
pub use midi::{MidiNote, MidiRegionData};

/// Stable region identity.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RegionId(pub u64);

/// Per-kind payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RegionKind {
    Midi(MidiRegionData),
    Audio(AudioRegionData),
    Chord(ChordRegionData),
    Automation(AutomationRegionData),
}

impl RegionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RegionKind::Midi(_) => "midi",
            RegionKind::Audio(_) => "audio",
            RegionKind::Chord(_) => "chord",
            RegionKind::Automation(_) => "automation",
        }
    }
}

/// A region on the timeline.
///
/// All `*_pos` fields are frames. `start_pos`/`end_pos` are timeline
/// positions; `clip_start_pos`, the loop window and the fade markers are
/// local (relative to the region contents).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub track_id: u64,
    /// Lane index for MIDI/audio regions, automation-track index for
    /// automation regions.
    pub lane_or_at_idx: usize,
    pub name: String,

    pub start_pos: i64,
    pub end_pos: i64,
    pub clip_start_pos: i64,
    pub loop_start_pos: i64,
    pub loop_end_pos: i64,

    pub fade_in_pos: i64,
    pub fade_out_pos: i64,
    pub fade_in_opts: CurveOptions,
    pub fade_out_opts: CurveOptions,

    pub muted: bool,
    /// Included when bouncing.
    pub bounce: bool,
    pub link_group: Option<u32>,

    pub kind: RegionKind,
}

impl Region {
    /// Create a region covering `[start_pos, end_pos)` whose loop window
    /// spans the whole length.
    pub fn new(
        id: RegionId,
        track_id: u64,
        lane_or_at_idx: usize,
        name: impl Into<String>,
        start_pos: i64,
        end_pos: i64,
        kind: RegionKind,
    ) -> Self {
        let length = end_pos - start_pos;
        Self {
            id,
            track_id,
            lane_or_at_idx,
            name: name.into(),
            start_pos,
            end_pos,
            clip_start_pos: 0,
            loop_start_pos: 0,
            loop_end_pos: length,
            fade_in_pos: 0,
            fade_out_pos: length,
            fade_in_opts: CurveOptions::linear(),
            fade_out_opts: CurveOptions::linear(),
            muted: false,
            bounce: false,
            link_group: None,
            kind,
        }
    }

    /// Check the base invariants.
    pub fn validate(&self) -> bool {
        let length = self.length();
        self.end_pos > self.start_pos
            && self.loop_start_pos < self.loop_end_pos
            && self.loop_start_pos >= 0
            && self.clip_start_pos >= 0
            && self.clip_start_pos < self.loop_end_pos
            && self.fade_in_pos <= self.fade_out_pos
            && self.fade_in_pos >= 0
            && self.fade_out_pos <= length
    }

    #[inline]
    pub fn length(&self) -> i64 {
        self.end_pos - self.start_pos
    }

    #[inline]
    pub fn loop_length(&self) -> i64 {
        self.loop_end_pos - self.loop_start_pos
    }

    /// Whether the timeline frame falls inside the region.
    #[inline]
    pub fn contains(&self, timeline_frames: i64) -> bool {
        timeline_frames >= self.start_pos && timeline_frames < self.end_pos
    }

    #[inline]
    pub fn is_looped(&self) -> bool {
        self.loop_start_pos > 0
            || self.clip_start_pos > 0
            || self.loop_length() < self.length()
    }

    /// Convert timeline frames to local frames inside the clip.
    ///
    /// With `normalize` the result traverses loop boundaries so it always
    /// lands in `[clip_start, loop_end)`; without it the raw distance from
    /// the region start (plus nothing else) is returned and may exceed
    /// `loop_end`.
    pub fn timeline_frames_to_local(&self, timeline_frames: i64, normalize: bool) -> i64 {
        let mut diff = timeline_frames - self.start_pos;
        if normalize {
            diff += self.clip_start_pos;
            let loop_size = self.loop_length();
            debug_assert!(loop_size > 0);
            while diff >= self.loop_end_pos {
                diff -= loop_size;
            }
        }
        diff
    }

    /// Frames until the next loop wrap or the region end, whichever comes
    /// first. The second element is true when the nearer boundary is a
    /// loop wrap.
    pub fn frames_till_next_loop_or_end(&self, timeline_frames: i64) -> (i64, bool) {
        let loop_size = self.loop_length();
        let mut local = timeline_frames - self.start_pos + self.clip_start_pos;
        while local >= self.loop_end_pos {
            local -= loop_size;
        }
        let till_loop = self.loop_end_pos - local;
        let till_end = self.end_pos - timeline_frames;
        if till_loop < till_end {
            (till_loop, true)
        } else {
            (till_end, false)
        }
    }

    /// Gain multiplier from the region fades at a local position (offset
    /// from the region start, loop-independent).
    pub fn fade_multiplier(&self, local_pos: i64) -> f32 {
        let mut k = 1.0f64;
        if self.fade_in_pos > 0 && local_pos < self.fade_in_pos {
            let ratio = local_pos as f64 / self.fade_in_pos as f64;
            k *= self.fade_in_opts.evaluate(ratio);
        }
        let length = self.length();
        if self.fade_out_pos < length && local_pos >= self.fade_out_pos {
            let fade_len = (length - self.fade_out_pos) as f64;
            let ratio = (local_pos - self.fade_out_pos) as f64 / fade_len;
            k *= self.fade_out_opts.evaluate_directed(ratio, true);
        }
        k as f32
    }

    pub fn as_midi(&self) -> Option<&MidiRegionData> {
        match &self.kind {
            RegionKind::Midi(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioRegionData> {
        match &self.kind {
            RegionKind::Audio(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_chord(&self) -> Option<&ChordRegionData> {
        match &self.kind {
            RegionKind::Chord(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_automation(&self) -> Option<&AutomationRegionData> {
        match &self.kind {
            RegionKind::Automation(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_automation_mut(&mut self) -> Option<&mut AutomationRegionData> {
        match &mut self.kind {
            RegionKind::Automation(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looped_region() -> Region {
        // 2 s region looping its first second (matching the loop-wrap
        // scenario from the engine's acceptance tests)
        let mut region = Region::new(
            RegionId(1),
            1,
            0,
            "loop",
            0,
            96_000,
            RegionKind::Midi(MidiRegionData::default()),
        );
        region.loop_end_pos = 48_000;
        region
    }

    #[test]
    fn test_validate() {
        let region = looped_region();
        assert!(region.validate());

        let mut bad = looped_region();
        bad.end_pos = bad.start_pos;
        assert!(!bad.validate());

        let mut bad = looped_region();
        bad.clip_start_pos = bad.loop_end_pos;
        assert!(!bad.validate());
    }

    #[test]
    fn test_timeline_to_local_no_wrap() {
        let region = looped_region();
        assert_eq!(region.timeline_frames_to_local(47_999, true), 47_999);
        assert_eq!(region.timeline_frames_to_local(0, true), 0);
    }

    #[test]
    fn test_timeline_to_local_wraps() {
        let region = looped_region();
        assert_eq!(region.timeline_frames_to_local(48_000, true), 0);
        assert_eq!(region.timeline_frames_to_local(48_002, true), 2);
        assert_eq!(region.timeline_frames_to_local(95_999, true), 47_999);
    }

    #[test]
    fn test_timeline_to_local_unnormalized() {
        let region = looped_region();
        assert_eq!(region.timeline_frames_to_local(50_000, false), 50_000);
    }

    #[test]
    fn test_normalized_local_stays_in_window() {
        let mut region = looped_region();
        region.clip_start_pos = 100;
        for tl in (0..region.end_pos).step_by(997) {
            let local = region.timeline_frames_to_local(tl, true);
            assert!(
                local < region.loop_end_pos,
                "tl {tl} gave local {local} beyond loop end"
            );
            assert!(local >= 0);
        }
    }

    #[test]
    fn test_frames_till_next_loop_or_end() {
        let region = looped_region();

        let (frames, is_loop) = region.frames_till_next_loop_or_end(47_996);
        assert_eq!(frames, 4);
        assert!(is_loop);

        // near the region end, the end is closer than the next wrap
        let (frames, is_loop) = region.frames_till_next_loop_or_end(95_990);
        assert_eq!(frames, 10);
        assert!(!is_loop);
    }

    #[test]
    fn test_fade_multiplier() {
        let mut region = Region::new(
            RegionId(1),
            1,
            0,
            "fades",
            0,
            1000,
            RegionKind::Audio(AudioRegionData::new(0)),
        );
        region.fade_in_pos = 100;
        region.fade_out_pos = 900;

        assert_eq!(region.fade_multiplier(0), 0.0);
        assert!((region.fade_multiplier(50) - 0.5).abs() < 1e-6);
        assert_eq!(region.fade_multiplier(500), 1.0);
        assert!((region.fade_multiplier(950) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_serde_roundtrip_preserves_mapping() {
        let mut region = looped_region();
        region.clip_start_pos = 7;
        let json = serde_json::to_string(&region).unwrap();
        let back: Region = serde_json::from_str(&json).unwrap();

        let mut state = 0x12345678u64;
        for _ in 0..1000 {
            // xorshift for reproducible pseudo-random positions
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let tl = (state % (region.end_pos as u64)) as i64;
            assert_eq!(
                region.timeline_frames_to_local(tl, true),
                back.timeline_frames_to_local(tl, true)
            );
        }
    }
}
