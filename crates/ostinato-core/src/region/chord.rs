//! Chord regions.

use crate::region::Region;
use crate::time::TimeInfo;
use ostinato_midi::{MidiEvent, MidiEventList};
use serde::{Deserialize, Serialize};

/// Chord quality, described by semitone offsets from the root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    #[default]
    Major,
    Minor,
    Diminished,
    Augmented,
    MajorSeventh,
    MinorSeventh,
    DominantSeventh,
}

impl ChordQuality {
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::MajorSeventh => &[0, 4, 7, 11],
            ChordQuality::MinorSeventh => &[0, 3, 7, 10],
            ChordQuality::DominantSeventh => &[0, 4, 7, 10],
        }
    }
}

/// One chord hit inside a chord region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordObject {
    /// Root note (MIDI number).
    pub root: u8,
    pub quality: ChordQuality,
    pub velocity: u8,
    pub start_local: i64,
    /// Frames the chord sounds for.
    pub duration: i64,
}

impl ChordObject {
    pub fn new(root: u8, quality: ChordQuality, start_local: i64, duration: i64) -> Self {
        Self {
            root,
            quality,
            velocity: 90,
            start_local,
            duration,
        }
    }

    pub fn pitches(&self) -> impl Iterator<Item = u8> + '_ {
        self.quality
            .intervals()
            .iter()
            .map(|&interval| (self.root + interval).min(127))
    }
}

/// Payload of a chord region.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChordRegionData {
    pub chords: Vec<ChordObject>,
}

impl ChordRegionData {
    pub fn add_chord(&mut self, chord: ChordObject) {
        self.chords.push(chord);
        self.chords.sort_by_key(|c| c.start_local);
    }
}

/// Emit the region's chord notes for one window into `out`.
///
/// Same contract as the MIDI variant: the caller splits at loop wraps;
/// `end_is_region_end` selects per-note offs vs a single all-notes-off when
/// `add_note_off_at_end` is set.
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
    let Some(data) = region.as_chord() else {
        return;
    };

    let local_start = region.timeline_frames_to_local(time.g_start_frame, true);
    let local_end = local_start + time.nframes as i64;

    for chord in &data.chords {
        let chord_end = chord.start_local + chord.duration;
        if chord.start_local >= local_start && chord.start_local < local_end {
            let offset = time.local_offset + (chord.start_local - local_start) as u32;
            for pitch in chord.pitches() {
                out.push(MidiEvent::note_on(offset, 0, pitch, chord.velocity));
            }
        }
        if chord_end >= local_start && chord_end < local_end {
            let offset = time.local_offset + (chord_end - local_start) as u32;
            for pitch in chord.pitches() {
                out.push(MidiEvent::note_off(offset, 0, pitch, 0));
            }
        }
    }

    if add_note_off_at_end {
        let boundary_offset = time.local_offset + time.nframes - 1;
        if end_is_region_end {
            for chord in &data.chords {
                if chord.start_local < local_end && chord.start_local + chord.duration >= local_end
                {
                    for pitch in chord.pitches() {
                        out.push(MidiEvent::note_off(boundary_offset, 0, pitch, 0));
                    }
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

    fn chord_region(chords: Vec<ChordObject>) -> Region {
        Region::new(
            RegionId(1),
            1,
            0,
            "chords",
            0,
            48_000,
            RegionKind::Chord(ChordRegionData { chords }),
        )
    }

    #[test]
    fn test_major_triad_pitches() {
        let chord = ChordObject::new(60, ChordQuality::Major, 0, 100);
        let pitches: Vec<u8> = chord.pitches().collect();
        assert_eq!(pitches, vec![60, 64, 67]);
    }

    #[test]
    fn test_chord_hit_emitted() {
        let region = chord_region(vec![ChordObject::new(57, ChordQuality::Minor, 10, 40)]);
        let mut out = MidiEventList::new();
        fill_midi_events(&region, TimeInfo::new(0, 0, 128), false, false, &mut out);

        let ons: Vec<_> = out.iter().filter(|e| e.is_note_on()).collect();
        let offs: Vec<_> = out.iter().filter(|e| e.is_note_off()).collect();
        assert_eq!(ons.len(), 3);
        assert_eq!(offs.len(), 3);
        assert!(ons.iter().all(|e| e.frame_offset == 10));
        assert!(offs.iter().all(|e| e.frame_offset == 50));
    }

    #[test]
    fn test_all_notes_off_at_loop_wrap() {
        let region = chord_region(vec![ChordObject::new(60, ChordQuality::Major, 0, 47_999)]);
        let mut out = MidiEventList::new();
        fill_midi_events(&region, TimeInfo::new(1000, 0, 64), true, false, &mut out);
        assert!(out.has_all_notes_off());
    }

    #[test]
    fn test_sustained_chord_off_at_region_end() {
        let region = chord_region(vec![ChordObject::new(60, ChordQuality::Major, 0, 1 << 40)]);
        let mut out = MidiEventList::new();
        fill_midi_events(
            &region,
            TimeInfo::new(47_936, 0, 64),
            true,
            true,
            &mut out,
        );

        let offs: Vec<_> = out.iter().filter(|e| e.is_note_off()).collect();
        assert_eq!(offs.len(), 3);
        assert!(offs.iter().all(|e| e.frame_offset == 63));
    }
}
