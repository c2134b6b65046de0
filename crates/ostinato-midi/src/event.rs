//! Sample-accurate MIDI events.

use midi_msg::{Channel, ChannelVoiceMsg, MidiMsg};

/// A channel voice message stamped with its offset inside the current block.
///
/// `frame_offset` is always in `[0, nframes)` for events on an active list;
/// events on a queued list may carry offsets relative to a future window and
/// are re-stamped when dequeued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Offset within the current buffer (0 = first sample of the block).
    pub frame_offset: u32,
    pub channel: Channel,
    pub msg: ChannelVoiceMsg,
}

impl MidiEvent {
    #[inline]
    pub fn new(frame_offset: u32, channel: Channel, msg: ChannelVoiceMsg) -> Self {
        Self {
            frame_offset,
            channel,
            msg,
        }
    }

    #[inline]
    pub fn note_on(frame_offset: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            frame_offset,
            channel: Channel::from_u8(channel),
            msg: ChannelVoiceMsg::NoteOn { note, velocity },
        }
    }

    #[inline]
    pub fn note_off(frame_offset: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            frame_offset,
            channel: Channel::from_u8(channel),
            msg: ChannelVoiceMsg::NoteOff { note, velocity },
        }
    }

    #[inline]
    pub fn control_change(frame_offset: u32, channel: u8, cc: u8, value: u8) -> Self {
        Self {
            frame_offset,
            channel: Channel::from_u8(channel),
            msg: ChannelVoiceMsg::ControlChange {
                control: midi_msg::ControlChange::CC { control: cc, value },
            },
        }
    }

    #[inline]
    pub fn pitch_bend(frame_offset: u32, channel: u8, bend: u16) -> Self {
        Self {
            frame_offset,
            channel: Channel::from_u8(channel),
            msg: ChannelVoiceMsg::PitchBend { bend },
        }
    }

    /// Builder starting from a note-on; chain `.channel()` / `.offset()`.
    #[inline]
    pub fn note_on_builder(note: u8, velocity: u8) -> MidiEventBuilder {
        MidiEventBuilder {
            frame_offset: 0,
            channel: 0,
            msg: ChannelVoiceMsg::NoteOn { note, velocity },
        }
    }

    #[inline]
    pub fn note_off_builder(note: u8) -> MidiEventBuilder {
        MidiEventBuilder {
            frame_offset: 0,
            channel: 0,
            msg: ChannelVoiceMsg::NoteOff { note, velocity: 0 },
        }
    }

    #[inline]
    pub fn channel_num(&self) -> u8 {
        self.channel as u8
    }

    /// True for note-on with non-zero velocity (velocity 0 is a note-off on
    /// the wire).
    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.msg, ChannelVoiceMsg::NoteOn { velocity, .. } if velocity > 0)
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.msg,
            ChannelVoiceMsg::NoteOff { .. } | ChannelVoiceMsg::NoteOn { velocity: 0, .. }
        )
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.msg {
            ChannelVoiceMsg::NoteOn { note, .. }
            | ChannelVoiceMsg::NoteOff { note, .. }
            | ChannelVoiceMsg::PolyPressure { note, .. } => Some(note),
            _ => None,
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<u8> {
        match self.msg {
            ChannelVoiceMsg::NoteOn { velocity, .. } | ChannelVoiceMsg::NoteOff { velocity, .. } => {
                Some(velocity)
            }
            _ => None,
        }
    }

    /// Replace the velocity of a note message, leaving others untouched.
    #[inline]
    pub fn set_velocity(&mut self, velocity: u8) {
        match &mut self.msg {
            ChannelVoiceMsg::NoteOn { velocity: v, .. }
            | ChannelVoiceMsg::NoteOff { velocity: v, .. } => *v = velocity,
            _ => {}
        }
    }

    /// Return the same event re-addressed to another channel.
    #[inline]
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Channel::from_u8(channel);
        self
    }

    #[inline]
    pub fn to_midi_msg(&self) -> MidiMsg {
        MidiMsg::ChannelVoice {
            channel: self.channel,
            msg: self.msg,
        }
    }

    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_midi_msg().to_midi()
    }

    pub fn from_bytes(bytes: &[u8], frame_offset: u32) -> Result<Self, midi_msg::ParseError> {
        let (msg, _len) = MidiMsg::from_midi(bytes)?;
        match msg {
            MidiMsg::ChannelVoice { channel, msg } => Ok(Self {
                frame_offset,
                channel,
                msg,
            }),
            _ => Err(midi_msg::ParseError::Invalid(
                "expected channel voice message",
            )),
        }
    }
}

/// Raw 3-byte wire representation, for backends and ring buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawMidiEvent {
    pub frame_offset: u32,
    pub data: [u8; 3],
    /// Valid bytes in `data` (1-3).
    pub len: u8,
}

impl RawMidiEvent {
    #[inline]
    pub fn new(frame_offset: u32, data: [u8; 3], len: u8) -> Self {
        Self {
            frame_offset,
            data,
            len,
        }
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.data[0] & 0x0F
    }

    pub fn to_midi_event(&self) -> Result<MidiEvent, midi_msg::ParseError> {
        MidiEvent::from_bytes(&self.data[..self.len as usize], self.frame_offset)
    }
}

impl From<MidiEvent> for RawMidiEvent {
    fn from(event: MidiEvent) -> Self {
        let bytes = event.to_bytes();
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            frame_offset: event.frame_offset,
            data,
            len: len as u8,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MidiEventBuilder {
    frame_offset: u32,
    channel: u8,
    msg: ChannelVoiceMsg,
}

impl MidiEventBuilder {
    #[inline]
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    #[inline]
    pub fn offset(mut self, frame_offset: u32) -> Self {
        self.frame_offset = frame_offset;
        self
    }

    #[inline]
    pub fn build(self) -> MidiEvent {
        MidiEvent {
            frame_offset: self.frame_offset,
            channel: Channel::from_u8(self.channel),
            msg: self.msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_predicates() {
        let ev = MidiEvent::note_on(12, 0, 60, 100);
        assert!(ev.is_note_on());
        assert!(!ev.is_note_off());
        assert_eq!(ev.note(), Some(60));
        assert_eq!(ev.velocity(), Some(100));
        assert_eq!(ev.frame_offset, 12);
    }

    #[test]
    fn test_zero_velocity_note_on_is_note_off() {
        let ev = MidiEvent::note_on(0, 3, 64, 0);
        assert!(ev.is_note_off());
        assert!(!ev.is_note_on());
        assert_eq!(ev.channel_num(), 3);
    }

    #[test]
    fn test_set_velocity() {
        let mut ev = MidiEvent::note_on(0, 0, 60, 100);
        ev.set_velocity(42);
        assert_eq!(ev.velocity(), Some(42));

        // non-note messages are left untouched
        let mut cc = MidiEvent::control_change(0, 0, 7, 127);
        cc.set_velocity(10);
        assert_eq!(cc.velocity(), None);
    }

    #[test]
    fn test_channel_translate() {
        let ev = MidiEvent::note_on(0, 2, 60, 100).with_channel(9);
        assert_eq!(ev.channel_num(), 9);
        assert_eq!(ev.note(), Some(60));
    }

    #[test]
    fn test_wire_roundtrip() {
        let ev = MidiEvent::note_on(480, 5, 61, 99);
        let raw: RawMidiEvent = ev.into();
        assert_eq!(raw.status(), 0x90);
        assert_eq!(raw.channel(), 5);
        assert_eq!(raw.frame_offset, 480);

        let back = raw.to_midi_event().unwrap();
        assert_eq!(back.channel, ev.channel);
        assert_eq!(back.msg, ev.msg);
    }

    #[test]
    fn test_builder() {
        let ev = MidiEvent::note_on_builder(67, 120).channel(4).offset(7).build();
        assert_eq!(ev.note(), Some(67));
        assert_eq!(ev.channel_num(), 4);
        assert_eq!(ev.frame_offset, 7);
    }
}
