//! Lock-free metering rings from the audio thread to non-realtime readers.
//!
//! Every port exposed to the backend writes its processed block into an
//! SPSC ring so meters and scopes can read recent audio without touching
//! the RT path. A separate ring carries MIDI activity to the UI.

use crate::config::METER_RING_BLOCKS;
use ostinato_midi::RawMidiEvent;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Audio-thread half of a port meter.
pub struct MeterRing {
    prod: HeapProd<f32>,
}

/// Non-realtime half of a port meter.
pub struct MeterTap {
    cons: HeapCons<f32>,
}

/// Create a linked meter pair sized for `block_length` frames of history.
pub fn meter_pair(block_length: u32) -> (MeterRing, MeterTap) {
    let rb = HeapRb::<f32>::new(block_length as usize * METER_RING_BLOCKS);
    let (prod, cons) = rb.split();
    (MeterRing { prod }, MeterTap { cons })
}

impl MeterRing {
    /// Push one processed block. RT-safe: when the reader lags and the ring
    /// is full, the oldest unread audio is dropped in favor of keeping the
    /// audio thread wait-free.
    #[inline]
    pub fn push_block(&mut self, block: &[f32]) {
        let _ = self.prod.push_slice(block);
    }
}

impl MeterTap {
    /// Drain up to `out.len()` samples; returns the count written.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.cons.pop_slice(out)
    }

    /// Samples currently buffered.
    pub fn available(&self) -> usize {
        self.cons.occupied_len()
    }

    /// Peak of everything buffered right now, consuming it.
    pub fn drain_peak(&mut self) -> f32 {
        let mut peak = 0.0f32;
        while let Some(sample) = self.cons.try_pop() {
            peak = peak.max(sample.abs());
        }
        peak
    }
}

/// Audio-thread half of the MIDI activity feed.
pub struct MidiActivityRing {
    prod: HeapProd<RawMidiEvent>,
}

/// UI half of the MIDI activity feed.
pub struct MidiActivityTap {
    cons: HeapCons<RawMidiEvent>,
}

pub fn midi_activity_pair(capacity: usize) -> (MidiActivityRing, MidiActivityTap) {
    let rb = HeapRb::<RawMidiEvent>::new(capacity);
    let (prod, cons) = rb.split();
    (MidiActivityRing { prod }, MidiActivityTap { cons })
}

impl MidiActivityRing {
    /// Push an event, dropping it if the UI reader lags.
    #[inline]
    pub fn push(&mut self, event: RawMidiEvent) {
        let _ = self.prod.try_push(event);
    }
}

impl MidiActivityTap {
    pub fn pop(&mut self) -> Option<RawMidiEvent> {
        self.cons.try_pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_midi::MidiEvent;

    #[test]
    fn test_meter_roundtrip() {
        let (mut ring, mut tap) = meter_pair(4);
        ring.push_block(&[0.1, -0.5, 0.3, 0.2]);

        let mut out = [0.0f32; 4];
        assert_eq!(tap.read(&mut out), 4);
        assert_eq!(out, [0.1, -0.5, 0.3, 0.2]);
    }

    #[test]
    fn test_meter_drops_when_full() {
        let (mut ring, mut tap) = meter_pair(1);
        let capacity = METER_RING_BLOCKS;
        for _ in 0..capacity + 4 {
            ring.push_block(&[1.0]);
        }
        assert_eq!(tap.available(), capacity);
    }

    #[test]
    fn test_drain_peak() {
        let (mut ring, mut tap) = meter_pair(4);
        ring.push_block(&[0.1, -0.9, 0.3, 0.2]);
        assert!((tap.drain_peak() - 0.9).abs() < 1e-9);
        assert_eq!(tap.available(), 0);
    }

    #[test]
    fn test_midi_activity() {
        let (mut ring, mut tap) = midi_activity_pair(8);
        ring.push(MidiEvent::note_on(3, 0, 60, 100).into());

        let ev = tap.pop().unwrap();
        assert_eq!(ev.status(), 0x90);
        assert_eq!(ev.frame_offset, 3);
        assert!(tap.pop().is_none());
    }
}
