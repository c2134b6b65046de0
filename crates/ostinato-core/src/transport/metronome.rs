//! Metronome click generation.

use crate::lockfree::{AtomicFlag, AtomicFloat};
use crate::transport::Transport;

/// Click length in samples (at any rate; short enough to stay percussive).
const CLICK_LENGTH: usize = 1024;
/// Strong (bar) and weak (beat) click frequencies.
const STRONG_HZ: f32 = 1760.0;
const WEAK_HZ: f32 = 880.0;

struct ActiveClick {
    /// Samples rendered so far.
    pos: usize,
    strong: bool,
}

/// Sample-accurate metronome.
///
/// Emits a synthesized decaying-sine click at every bar (strong) and beat
/// (weak) crossing. `enabled`/`volume` are atomic so the UI flips them
/// without locks; the render state itself is audio-thread-only.
pub struct Metronome {
    pub enabled: AtomicFlag,
    pub volume: AtomicFloat,
    active: Option<ActiveClick>,
    sample_rate: f32,
}

impl Metronome {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            enabled: AtomicFlag::new(false),
            volume: AtomicFloat::new(0.5),
            active: None,
            sample_rate: sample_rate as f32,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;
    }

    /// Mix clicks for the window starting at the transport playhead into
    /// the given stereo buffers. Call before the playhead advances.
    pub fn process(
        &mut self,
        transport: &Transport,
        out_l: &mut [f32],
        out_r: &mut [f32],
        nframes: u32,
    ) {
        if !self.enabled.get() || !transport.is_rolling() {
            self.active = None;
            return;
        }

        let sig = transport.time_signature();
        let ticks_per_beat = sig.ticks_per_beat();
        let ticks_per_bar = sig.ticks_per_bar();
        let t0 = transport.playhead_ticks();
        let t1 = t0 + transport.frames_to_ticks(nframes as i64);

        // continue a click left over from the previous block
        self.render(out_l, out_r, 0, nframes as usize);

        // beat crossings inside the window (bars are also beats)
        let mut k = (t0 / ticks_per_beat).ceil();
        while k * ticks_per_beat < t1 {
            let tick = k * ticks_per_beat;
            let offset = transport.ticks_to_frames(tick - t0) as usize;
            let strong = (tick / ticks_per_bar).fract().abs() < 1e-9;
            self.active = Some(ActiveClick { pos: 0, strong });
            if offset < nframes as usize {
                self.render(out_l, out_r, offset, nframes as usize);
            }
            k += 1.0;
        }
    }

    /// Render the active click into `[offset, end)`.
    fn render(&mut self, out_l: &mut [f32], out_r: &mut [f32], offset: usize, end: usize) {
        let volume = self.volume.get();
        let sample_rate = self.sample_rate;
        let Some(click) = self.active.as_mut() else {
            return;
        };
        let freq = if click.strong { STRONG_HZ } else { WEAK_HZ };

        let mut finished = false;
        for i in offset..end {
            if click.pos >= CLICK_LENGTH {
                finished = true;
                break;
            }
            let t = click.pos as f32 / sample_rate;
            let env = (-(click.pos as f32) / (CLICK_LENGTH as f32 / 5.0)).exp();
            let sample = (2.0 * std::f32::consts::PI * freq * t).sin() * env * volume;
            out_l[i] += sample;
            out_r[i] += sample;
            click.pos += 1;
        }
        if finished {
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rolling_transport() -> Transport {
        let t = Transport::new(48000);
        t.request_roll();
        t
    }

    #[test]
    fn test_disabled_is_silent() {
        let transport = rolling_transport();
        let mut metronome = Metronome::new(48000);
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        metronome.process(&transport, &mut l, &mut r, 256);
        assert!(l.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_click_at_bar_start() {
        let transport = rolling_transport();
        let mut metronome = Metronome::new(48000);
        metronome.enabled.set(true);

        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        // playhead at 0: a (strong) click lands on the first sample window
        metronome.process(&transport, &mut l, &mut r, 256);
        assert!(l.iter().any(|&v| v.abs() > 1e-4));
    }

    #[test]
    fn test_no_click_mid_beat() {
        let transport = rolling_transport();
        let mut metronome = Metronome::new(48000);
        metronome.enabled.set(true);

        // 120 BPM, 48 kHz: beat every 24000 frames; window [100, 356) has
        // no crossing
        transport.locate_frames(100);
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        metronome.process(&transport, &mut l, &mut r, 256);
        assert!(l.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_click_spans_blocks() {
        let transport = rolling_transport();
        let mut metronome = Metronome::new(48000);
        metronome.enabled.set(true);

        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        metronome.process(&transport, &mut l, &mut r, 256);

        // second block continues the click tail
        transport.add_frames(256);
        let mut l2 = vec![0.0; 256];
        let mut r2 = vec![0.0; 256];
        metronome.process(&transport, &mut l2, &mut r2, 256);
        assert!(l2.iter().any(|&v| v.abs() > 1e-5));
    }

    #[test]
    fn test_beat_click_offset() {
        let transport = rolling_transport();
        let mut metronome = Metronome::new(48000);
        metronome.enabled.set(true);

        // beat 2 starts at frame 24000; window [23936, 24192)
        transport.locate_frames(23_936);
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        metronome.process(&transport, &mut l, &mut r, 256);

        assert!(l[..64].iter().all(|&v| v == 0.0));
        assert!(l[64..].iter().any(|&v| v.abs() > 1e-4));
    }
}
