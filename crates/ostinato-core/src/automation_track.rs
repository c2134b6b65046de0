//! Automation tracks.
//!
//! An automation track binds a control port to a list of automation
//! regions and evaluates the port's value at any timeline position. During
//! playback the engine asks [`AutomationTrack::val_at_pos`] once per window
//! for every track in read mode; in record mode new points are written into
//! the region under the playhead instead.

use crate::config::AUTOMATION_RECORDING_TOUCH_REL_MS;
use crate::port::PortId;
use crate::region::{Region, RegionId, RegionKind};
use ostinato_automation::AutomationPoint;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomationMode {
    #[default]
    Read,
    Record,
    Off,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomationRecordMode {
    /// Record only while the port is being touched.
    #[default]
    Touch,
    /// Record continuously once armed.
    Latch,
}

/// Automation lane for one control port.
#[derive(Debug)]
pub struct AutomationTrack {
    pub port_id: PortId,
    pub mode: AutomationMode,
    pub record_mode: AutomationRecordMode,
    pub height: f64,
    pub visible: bool,
    pub index: usize,
    regions: Vec<Region>,
    /// Immutable copies taken at playback start, so edits on the control
    /// thread don't disturb a rolling transport.
    region_snapshots: Vec<Region>,
    /// Set once latch/touch recording has produced a point.
    recording_started: bool,
}

impl AutomationTrack {
    pub fn new(port_id: PortId, index: usize) -> Self {
        Self {
            port_id,
            mode: AutomationMode::default(),
            record_mode: AutomationRecordMode::default(),
            height: 48.0,
            visible: false,
            index,
            regions: Vec::new(),
            region_snapshots: Vec::new(),
            recording_started: false,
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn add_region(&mut self, mut region: Region) {
        debug_assert!(matches!(region.kind, RegionKind::Automation(_)));
        region.lane_or_at_idx = self.index;
        self.regions.push(region);
        self.regions.sort_by_key(|r| r.start_pos);
    }

    pub fn remove_region(&mut self, id: RegionId) -> Option<Region> {
        let idx = self.regions.iter().position(|r| r.id == id)?;
        Some(self.regions.remove(idx))
    }

    /// Refresh the playback snapshots from the live regions.
    pub fn take_snapshots(&mut self) {
        self.region_snapshots = self.regions.clone();
    }

    /// Latest region relevant for `pos`.
    ///
    /// With `ends_after`, only regions still covering `pos` qualify;
    /// otherwise the region whose end reaches furthest past (or least
    /// before) `pos` wins, which lets the last region's tail value persist.
    fn region_before_pos(&self, pos: i64, ends_after: bool, use_snapshots: bool) -> Option<&Region> {
        let regions = if use_snapshots {
            &self.region_snapshots
        } else {
            &self.regions
        };

        if ends_after {
            regions
                .iter()
                .rev()
                .find(|r| r.start_pos <= pos && r.end_pos >= pos)
        } else {
            let mut latest: Option<&Region> = None;
            let mut latest_distance = i64::MIN;
            for region in regions.iter().rev() {
                if region.start_pos > pos {
                    continue;
                }
                let distance_from_end = region.end_pos - pos;
                if distance_from_end > latest_distance {
                    latest_distance = distance_from_end;
                    latest = Some(region);
                }
            }
            latest
        }
    }

    /// Evaluate the automated (normalized) value at a timeline position.
    ///
    /// Returns `None` when no region/point governs the position; the caller
    /// falls back to the port's current value.
    pub fn val_at_pos(&self, pos: i64, ends_after: bool, use_snapshots: bool) -> Option<f32> {
        let region = self.region_before_pos(pos, ends_after, use_snapshots)?;
        if region.muted {
            return None;
        }
        let data = region.as_automation()?;

        // if the region ends before pos, evaluate at its last frame
        let eval_pos = if !ends_after && region.end_pos < pos {
            region.end_pos - 1
        } else {
            pos
        };
        let local_pos = region.timeline_frames_to_local(eval_pos, true);

        let (idx, ap) = data.point_before(local_pos)?;
        let Some(next_ap) = data.next_point(idx) else {
            return Some(ap.normalized_value);
        };

        let numerator = local_pos - ap.local_pos;
        let denominator = next_ap.local_pos - ap.local_pos;
        let ratio = if numerator == 0 {
            0.0
        } else if denominator == 0 {
            1.0
        } else {
            (numerator as f64 / denominator as f64).clamp(0.0, 1.0)
        };

        let diff = (next_ap.normalized_value - ap.normalized_value).abs();
        let progress = ap.normalized_curve_progress(next_ap, ratio) as f32;
        let base = ap.normalized_value.min(next_ap.normalized_value);
        Some(base + progress * diff)
    }

    /// Whether the engine should apply automation to the port right now.
    pub fn should_read_automation(&self, now_ms: u64, last_port_change_ms: u64) -> bool {
        if self.mode == AutomationMode::Off {
            return false;
        }
        !self.should_be_recording(now_ms, last_port_change_ms)
    }

    /// Whether a value sample should be recorded this window.
    ///
    /// Latch mode records continuously once armed. Touch mode records while
    /// the port changed within the release window, then keeps the region
    /// open until the touch times out.
    pub fn should_be_recording(&self, now_ms: u64, last_port_change_ms: u64) -> bool {
        if self.mode != AutomationMode::Record {
            return false;
        }
        match self.record_mode {
            AutomationRecordMode::Latch => true,
            AutomationRecordMode::Touch => {
                let since_touch = now_ms.saturating_sub(last_port_change_ms);
                since_touch < AUTOMATION_RECORDING_TOUCH_REL_MS || self.recording_started
            }
        }
    }

    /// Record one normalized value sample at a timeline position, growing
    /// the region under the playhead (or starting a new one).
    pub fn record_sample(&mut self, pos: i64, normalized_value: f32, region_id: RegionId) {
        // while a take is running, keep growing the take's region instead of
        // spawning one region per block
        let existing = if self.recording_started {
            self.regions.iter().rposition(|r| r.start_pos <= pos)
        } else {
            self.regions.iter().position(|r| r.contains(pos))
        };
        let region = match existing {
            Some(idx) => &mut self.regions[idx],
            None => {
                let region = Region::new(
                    region_id,
                    0,
                    self.index,
                    "recorded",
                    pos,
                    pos + 1,
                    RegionKind::Automation(Default::default()),
                );
                self.regions.push(region);
                self.regions.sort_by_key(|r| r.start_pos);
                self.regions
                    .iter_mut()
                    .find(|r| r.contains(pos))
                    .expect("region just inserted")
            }
        };

        // grow the region as the playhead advances
        if pos >= region.end_pos - 1 {
            region.end_pos = pos + 1;
            let length = region.end_pos - region.start_pos;
            region.loop_end_pos = length.max(region.loop_end_pos);
            region.fade_out_pos = length;
        }
        let local = pos - region.start_pos;
        if let Some(data) = region.as_automation_mut() {
            data.add_point(AutomationPoint::new(local, normalized_value));
        }
        self.recording_started = true;
    }

    /// Reset the latch/touch state (transport stop).
    pub fn finish_recording(&mut self) {
        self.recording_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::AutomationRegionData;
    use ostinato_automation::{CurveAlgorithm, CurveOptions};

    fn track_with_points(points: Vec<AutomationPoint>) -> AutomationTrack {
        let mut data = AutomationRegionData::new();
        for p in points {
            data.add_point(p);
        }
        let region = Region::new(
            RegionId(1),
            1,
            0,
            "auto",
            0,
            100_000,
            RegionKind::Automation(data),
        );
        let mut at = AutomationTrack::new(PortId(1), 0);
        at.add_region(region);
        at
    }

    #[test]
    fn test_value_at_point_is_exact() {
        let at = track_with_points(vec![
            AutomationPoint::new(0, 0.0),
            AutomationPoint::new(1000, 1.0),
        ]);
        assert!((at.val_at_pos(0, true, false).unwrap() - 0.0).abs() < 1e-6);
        assert!((at.val_at_pos(1000, true, false).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_interpolation() {
        let at = track_with_points(vec![
            AutomationPoint::new(0, 0.0),
            AutomationPoint::new(1000, 1.0),
        ]);
        let val = at.val_at_pos(500, true, false).unwrap();
        assert!((val - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_descending_interpolation() {
        let at = track_with_points(vec![
            AutomationPoint::new(0, 1.0),
            AutomationPoint::new(1000, 0.0),
        ]);
        let val = at.val_at_pos(250, true, false).unwrap();
        assert!((val - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_value_after_last_point_holds() {
        let at = track_with_points(vec![
            AutomationPoint::new(0, 0.25),
            AutomationPoint::new(1000, 0.75),
        ]);
        let val = at.val_at_pos(50_000, true, false).unwrap();
        assert!((val - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_no_region_returns_none() {
        let at = AutomationTrack::new(PortId(1), 0);
        assert!(at.val_at_pos(100, true, false).is_none());
    }

    #[test]
    fn test_region_tail_persists_when_ends_after_false() {
        let mut at = track_with_points(vec![
            AutomationPoint::new(0, 0.0),
            AutomationPoint::new(1000, 0.6),
        ]);
        // shrink the region so pos falls past its end
        at.regions[0].end_pos = 2000;
        at.regions[0].loop_end_pos = 2000;

        assert!(at.val_at_pos(5000, true, false).is_none());
        let val = at.val_at_pos(5000, false, false).unwrap();
        assert!((val - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_curved_segment_midpoint() {
        let curve = CurveOptions::new(CurveAlgorithm::Exponent, 0.7);
        let at = track_with_points(vec![
            AutomationPoint::new(0, 0.0).with_curve(curve),
            AutomationPoint::new(1000, 1.0),
        ]);
        let val = at.val_at_pos(500, true, false).unwrap();
        assert!(val < 0.5);
    }

    #[test]
    fn test_snapshots_isolated_from_edits() {
        let mut at = track_with_points(vec![
            AutomationPoint::new(0, 0.0),
            AutomationPoint::new(1000, 1.0),
        ]);
        at.take_snapshots();
        at.regions.clear();

        assert!(at.val_at_pos(500, true, false).is_none());
        let val = at.val_at_pos(500, true, true).unwrap();
        assert!((val - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_touch_mode_release_window() {
        let mut at = AutomationTrack::new(PortId(1), 0);
        at.mode = AutomationMode::Record;
        at.record_mode = AutomationRecordMode::Touch;

        // touched 100 ms ago: recording
        assert!(at.should_be_recording(10_000, 9_900));
        // touched long ago, never started: not recording
        assert!(!at.should_be_recording(10_000, 1_000));
        // read mode is suppressed while recording
        assert!(!at.should_read_automation(10_000, 9_900));
    }

    #[test]
    fn test_latch_mode_always_records() {
        let mut at = AutomationTrack::new(PortId(1), 0);
        at.mode = AutomationMode::Record;
        at.record_mode = AutomationRecordMode::Latch;
        assert!(at.should_be_recording(10_000, 0));
    }

    #[test]
    fn test_record_sample_creates_and_grows_region() {
        let mut at = AutomationTrack::new(PortId(1), 0);
        at.mode = AutomationMode::Record;
        at.record_mode = AutomationRecordMode::Latch;

        at.record_sample(1000, 0.5, RegionId(9));
        at.record_sample(1256, 0.6, RegionId(10));

        assert_eq!(at.regions().len(), 1);
        let region = &at.regions()[0];
        assert_eq!(region.start_pos, 1000);
        assert_eq!(region.end_pos, 1257);
        assert_eq!(region.as_automation().unwrap().points().len(), 2);

        // recorded points evaluate back exactly
        let val = at.val_at_pos(1000, true, false).unwrap();
        assert!((val - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_off_mode_reads_nothing() {
        let mut at = track_with_points(vec![AutomationPoint::new(0, 0.3)]);
        at.mode = AutomationMode::Off;
        assert!(!at.should_read_automation(0, 0));
    }
}
