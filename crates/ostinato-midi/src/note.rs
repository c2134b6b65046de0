//! MIDI note helpers.
//!
//! Middle C (MIDI 60) is C4 in scientific pitch notation; concert A
//! (440 Hz) is MIDI 69.

/// A MIDI note number (0-127) with pitch-class/octave accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Note(pub u8);

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl Note {
    pub const MIDDLE_C: Note = Note(60);
    pub const CONCERT_A: Note = Note(69);

    #[inline]
    pub fn new(number: u8) -> Self {
        Self(number.min(127))
    }

    /// Pitch class 0-11 (0 = C).
    #[inline]
    pub fn pitch_class(self) -> u8 {
        self.0 % 12
    }

    /// Octave in scientific pitch notation (MIDI 0 is octave -1).
    #[inline]
    pub fn octave(self) -> i8 {
        (self.0 / 12) as i8 - 1
    }

    /// Transpose by semitones, saturating at the MIDI range.
    #[inline]
    pub fn transposed(self, semitones: i16) -> Self {
        Self((self.0 as i16 + semitones).clamp(0, 127) as u8)
    }

    /// Frequency in Hz under 12-TET with A4 = 440 Hz.
    #[inline]
    pub fn frequency(self) -> f32 {
        440.0 * 2f32.powf((self.0 as f32 - 69.0) / 12.0)
    }
}

impl From<Note> for u8 {
    fn from(note: Note) -> u8 {
        note.0
    }
}

impl From<u8> for Note {
    fn from(number: u8) -> Note {
        Note::new(number)
    }
}

/// Name in scientific pitch notation, e.g. `"C4"`, `"A#2"`.
pub fn midi_note_name(number: u8) -> String {
    let note = Note::new(number);
    format!(
        "{}{}",
        PITCH_CLASS_NAMES[note.pitch_class() as usize],
        note.octave()
    )
}
