//! MIDI regions.

use crate::region::Region;
use crate::time::TimeInfo;
use ostinato_midi::{MidiEvent, MidiEventList};
use serde::{Deserialize, Serialize};

/// A note inside a MIDI region, in local frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start_local: i64,
    pub end_local: i64,
    pub muted: bool,
}

impl MidiNote {
    pub fn new(pitch: u8, velocity: u8, start_local: i64, end_local: i64) -> Self {
        Self {
            pitch,
            velocity,
            start_local,
            end_local,
            muted: false,
        }
    }
}

/// Payload of a MIDI region.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MidiRegionData {
    pub notes: Vec<MidiNote>,
}

impl MidiRegionData {
    pub fn add_note(&mut self, note: MidiNote) {
        self.notes.push(note);
        self.notes.sort_by_key(|n| n.start_local);
    }
}

/// Emit the region's events for one window into `out`.
///
/// Pre-condition: the caller has split its call range so no loop wrap
/// occurs inside this invocation. Event offsets land in
/// `[local_offset, local_offset + nframes)`.
///
/// With `add_note_off_at_end`, notes still sounding at the window end are
/// terminated: per-note note-offs when `end_is_region_end` (the boundary is
/// the region's end), a single all-notes-off otherwise (loop wrap).
pub fn fill_midi_events(
    region: &Region,
    time: TimeInfo,
    add_note_off_at_end: bool,
    end_is_region_end: bool,
    out: &mut MidiEventList,
) {
    if region.muted {
        return;
    }
    let Some(data) = region.as_midi() else {
        return;
    };

    let local_start = region.timeline_frames_to_local(time.g_start_frame, true);
    let local_end = local_start + time.nframes as i64;

    for note in &data.notes {
        if note.muted {
            continue;
        }
        if note.start_local >= local_start && note.start_local < local_end {
            let offset = time.local_offset + (note.start_local - local_start) as u32;
            out.push(MidiEvent::note_on(offset, 0, note.pitch, note.velocity));
        }
        if note.end_local >= local_start && note.end_local < local_end {
            let offset = time.local_offset + (note.end_local - local_start) as u32;
            out.push(MidiEvent::note_off(offset, 0, note.pitch, 0));
        }
    }

    if add_note_off_at_end {
        let boundary_offset = time.local_offset + time.nframes - 1;
        if end_is_region_end {
            for note in &data.notes {
                if note.muted {
                    continue;
                }
                if note.start_local < local_end && note.end_local >= local_end {
                    out.push(MidiEvent::note_off(boundary_offset, 0, note.pitch, 0));
                }
            }
        } else {
            out.add_all_notes_off(boundary_offset);
        }
    }

    out.sort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{RegionId, RegionKind};

    fn region_with_notes(notes: Vec<MidiNote>) -> Region {
        let mut region = Region::new(
            RegionId(1),
            1,
            0,
            "midi",
            0,
            96_000,
            RegionKind::Midi(MidiRegionData { notes }),
        );
        region.loop_end_pos = 48_000;
        region
    }

    #[test]
    fn test_note_on_in_window() {
        let region = region_with_notes(vec![MidiNote::new(60, 100, 100, 200)]);
        let mut out = MidiEventList::new();
        fill_midi_events(
            &region,
            TimeInfo::new(64, 0, 256),
            false,
            false,
            &mut out,
        );

        assert_eq!(out.len(), 2);
        let events = out.as_slice();
        assert!(events[0].is_note_on());
        assert_eq!(events[0].frame_offset, 36); // 100 - 64
        assert!(events[1].is_note_off());
        assert_eq!(events[1].frame_offset, 136); // 200 - 64
    }

    #[test]
    fn test_event_after_loop_wrap() {
        // loop wraps at 48000; after the wrap, local positions restart
        let region = region_with_notes(vec![MidiNote::new(62, 90, 2, 4000)]);
        let mut out = MidiEventList::new();
        fill_midi_events(
            &region,
            TimeInfo::new(48_000, 0, 64),
            false,
            false,
            &mut out,
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out.as_slice()[0].frame_offset, 2);
        assert!(out.as_slice()[0].is_note_on());
    }

    #[test]
    fn test_all_notes_off_at_loop_boundary() {
        let region = region_with_notes(vec![MidiNote::new(60, 100, 0, 47_999_999)]);
        let mut out = MidiEventList::new();
        fill_midi_events(
            &region,
            TimeInfo::new(47_936, 0, 64),
            true,
            false,
            &mut out,
        );

        assert!(out.has_all_notes_off());
        assert_eq!(out.as_slice().last().unwrap().frame_offset, 63);
    }

    #[test]
    fn test_per_note_offs_at_region_end() {
        let region = region_with_notes(vec![
            MidiNote::new(60, 100, 0, 1 << 40),
            MidiNote::new(64, 100, 0, 1 << 40),
        ]);
        let mut out = MidiEventList::new();
        // final window of the region
        fill_midi_events(
            &region,
            TimeInfo::new(95_936, 64, 64),
            true,
            true,
            &mut out,
        );

        let offs: Vec<_> = out.iter().filter(|e| e.is_note_off()).collect();
        assert_eq!(offs.len(), 2);
        assert!(offs.iter().all(|e| e.frame_offset == 127));
        assert!(!out.has_all_notes_off());
    }

    #[test]
    fn test_muted_region_emits_nothing() {
        let mut region = region_with_notes(vec![MidiNote::new(60, 100, 0, 100)]);
        region.muted = true;
        let mut out = MidiEventList::new();
        fill_midi_events(&region, TimeInfo::new(0, 0, 256), false, false, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_muted_note_skipped() {
        let mut note = MidiNote::new(60, 100, 10, 20);
        note.muted = true;
        let region = region_with_notes(vec![note, MidiNote::new(64, 100, 10, 20)]);
        let mut out = MidiEventList::new();
        fill_midi_events(&region, TimeInfo::new(0, 0, 256), false, false, &mut out);

        assert_eq!(out.iter().filter(|e| e.is_note_on()).count(), 1);
        assert_eq!(out.as_slice()[0].note(), Some(64));
    }
}
