//! Ordered MIDI event lists with the queued/active split used by MIDI ports.

use crate::event::MidiEvent;
use smallvec::SmallVec;

/// Channel mask with all 16 channels enabled.
pub const ALL_CHANNELS_MASK: u16 = 0xFFFF;

/// An ordered list of MIDI events, timestamp-sorted by frame offset.
///
/// Note-offs sort before note-ons at the same offset so that re-triggered
/// notes are never swallowed by a synth's voice reuse.
#[derive(Clone, Debug, Default)]
pub struct MidiEventList {
    events: SmallVec<[MidiEvent; 16]>,
}

impl MidiEventList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.events.clear();
    }

    #[inline]
    pub fn push(&mut self, event: MidiEvent) {
        self.events.push(event);
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MidiEvent> {
        self.events.iter_mut()
    }

    #[inline]
    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Append all events from `other` whose offset falls inside
    /// `[local_offset, local_offset + nframes)`, keeping their offsets.
    pub fn append(&mut self, other: &MidiEventList, local_offset: u32, nframes: u32) {
        self.append_filtered(other, local_offset, nframes, ALL_CHANNELS_MASK, None);
    }

    /// Append with a channel mask filter and optional channel translation.
    ///
    /// Bit `n` of `channel_mask` enables channel `n`. When
    /// `translate_to_channel` is set, every copied event is re-addressed to
    /// that channel.
    pub fn append_filtered(
        &mut self,
        other: &MidiEventList,
        local_offset: u32,
        nframes: u32,
        channel_mask: u16,
        translate_to_channel: Option<u8>,
    ) {
        let end = local_offset + nframes;
        for ev in other.events.iter() {
            if ev.frame_offset < local_offset || ev.frame_offset >= end {
                continue;
            }
            if channel_mask & (1 << ev.channel_num()) == 0 {
                continue;
            }
            let copied = match translate_to_channel {
                Some(ch) => ev.with_channel(ch),
                None => *ev,
            };
            self.events.push(copied);
        }
    }

    /// Append a single "all notes off" (CC 123) at the given offset.
    ///
    /// Used at transport loop boundaries, where per-note offs would be
    /// redundant because every sounding note must stop.
    pub fn add_all_notes_off(&mut self, frame_offset: u32) {
        self.events
            .push(MidiEvent::control_change(frame_offset, 0, 123, 0));
    }

    /// Sort by frame offset, note-offs first at equal offsets.
    pub fn sort(&mut self) {
        self.events.sort_by(|a, b| {
            a.frame_offset
                .cmp(&b.frame_offset)
                .then_with(|| b.is_note_off().cmp(&a.is_note_off()))
        });
    }

    /// True if any event is an all-notes-off or all-sound-off control.
    pub fn has_all_notes_off(&self) -> bool {
        self.events.iter().any(|ev| {
            matches!(
                ev.msg,
                midi_msg::ChannelVoiceMsg::ControlChange {
                    control: midi_msg::ControlChange::CC { control: 120 | 123, .. },
                }
            )
        })
    }
}

impl<'a> IntoIterator for &'a MidiEventList {
    type Item = &'a MidiEvent;
    type IntoIter = core::slice::Iter<'a, MidiEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// The queued/active pair owned by every MIDI port.
///
/// Non-realtime producers push into `queued`; at the start of each cycle the
/// audio thread moves the window's worth of queued events into `active`.
/// The active list is what downstream ports and plugins consume.
#[derive(Clone, Debug, Default)]
pub struct MidiEvents {
    pub active: MidiEventList,
    pub queued: MidiEventList,
}

impl MidiEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the active list, retaining queued events.
    #[inline]
    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    /// Move queued events inside the window into the active list, then drop
    /// them from the queue. Remaining queued events have their offsets
    /// rebased so they stay valid for the next window.
    pub fn dequeue(&mut self, local_offset: u32, nframes: u32) {
        let end = local_offset + nframes;
        let mut remaining: SmallVec<[MidiEvent; 16]> = SmallVec::new();
        for ev in self.queued.events.drain(..) {
            if ev.frame_offset < end {
                let mut moved = ev;
                moved.frame_offset = moved.frame_offset.max(local_offset);
                self.active.push(moved);
            } else {
                let mut later = ev;
                later.frame_offset -= nframes;
                remaining.push(later);
            }
        }
        self.queued.events = remaining;
        self.active.sort();
    }
}
