//! Transport: playhead, tempo, loop and musical-time arithmetic.
//!
//! All mutable state is atomic so the UI can read (and request changes to)
//! the transport without locks; the playhead itself is only written by
//! `post_process` on the audio thread.

pub mod metronome;

use crate::config::TICKS_PER_QUARTER_NOTE;
use crate::lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub use metronome::Metronome;

/// Time signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u16,
    pub denominator: u16,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    fn pack(self) -> u32 {
        (self.numerator as u32) << 16 | self.denominator as u32
    }

    fn unpack(packed: u32) -> Self {
        Self {
            numerator: (packed >> 16) as u16,
            denominator: (packed & 0xFFFF) as u16,
        }
    }

    /// Ticks in one beat (a beat is the denominator note value).
    pub fn ticks_per_beat(self) -> f64 {
        TICKS_PER_QUARTER_NOTE as f64 * 4.0 / self.denominator as f64
    }

    pub fn ticks_per_bar(self) -> f64 {
        self.ticks_per_beat() * self.numerator as f64
    }
}

/// Musical position cache derived from playhead ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PositionInfo {
    pub is_rolling: bool,
    pub bpm: f32,
    pub playhead_ticks: f64,
    /// 1-based bar.
    pub bar: i32,
    /// 1-based beat within the bar.
    pub beat: i32,
    /// 1-based sixteenth within the beat.
    pub sixteenth: i32,
    /// 1-based sixteenth within the bar.
    pub sixteenth_within_bar: i32,
    pub sixteenth_within_song: i32,
    pub tick_within_beat: f64,
    pub tick_within_bar: f64,
    /// Total 1/96th notes completed up to this position.
    pub ninetysixths: i32,
}

/// The timeline clock.
pub struct Transport {
    sample_rate: AtomicU32,
    bpm: AtomicFloat,
    time_sig: AtomicU32,

    /// Playhead in ticks; written only by the audio thread.
    playhead_ticks: AtomicDouble,
    pub rolling: AtomicFlag,
    pub looping: AtomicFlag,
    loop_start_ticks: AtomicDouble,
    loop_end_ticks: AtomicDouble,
    pub punch_enabled: AtomicFlag,
    punch_in_ticks: AtomicDouble,
    punch_out_ticks: AtomicDouble,
    pub preroll_frames: AtomicU64,

    frames_per_tick: AtomicDouble,
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        let transport = Self {
            sample_rate: AtomicU32::new(sample_rate),
            bpm: AtomicFloat::new(120.0),
            time_sig: AtomicU32::new(TimeSignature::default().pack()),
            playhead_ticks: AtomicDouble::new(0.0),
            rolling: AtomicFlag::new(false),
            looping: AtomicFlag::new(false),
            loop_start_ticks: AtomicDouble::new(0.0),
            loop_end_ticks: AtomicDouble::new(4.0 * TICKS_PER_QUARTER_NOTE as f64 * 4.0),
            punch_enabled: AtomicFlag::new(false),
            punch_in_ticks: AtomicDouble::new(0.0),
            punch_out_ticks: AtomicDouble::new(0.0),
            preroll_frames: AtomicU64::new(0),
            frames_per_tick: AtomicDouble::new(0.0),
        };
        transport.update_frames_per_tick();
        transport
    }

    /// frames_per_tick = sample_rate * 60 / (bpm * ticks_per_quarter).
    pub fn update_frames_per_tick(&self) {
        let sample_rate = self.sample_rate.load(Ordering::Acquire) as f64;
        let bpm = self.bpm.get() as f64;
        let fpt = sample_rate * 60.0 / (bpm * TICKS_PER_QUARTER_NOTE as f64);
        self.frames_per_tick.set(fpt);
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.update_frames_per_tick();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn bpm(&self) -> f32 {
        self.bpm.get()
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.bpm.set(bpm.clamp(20.0, 999.0));
        self.update_frames_per_tick();
    }

    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature::unpack(self.time_sig.load(Ordering::Acquire))
    }

    pub fn set_time_signature(&self, sig: TimeSignature) {
        self.time_sig.store(sig.pack(), Ordering::Release);
    }

    #[inline]
    pub fn frames_per_tick(&self) -> f64 {
        self.frames_per_tick.get()
    }

    #[inline]
    pub fn ticks_per_frame(&self) -> f64 {
        1.0 / self.frames_per_tick.get()
    }

    #[inline]
    pub fn ticks_to_frames(&self, ticks: f64) -> i64 {
        (ticks * self.frames_per_tick()).round() as i64
    }

    #[inline]
    pub fn frames_to_ticks(&self, frames: i64) -> f64 {
        frames as f64 * self.ticks_per_frame()
    }

    pub fn playhead_ticks(&self) -> f64 {
        self.playhead_ticks.get()
    }

    pub fn playhead_frames(&self) -> i64 {
        self.ticks_to_frames(self.playhead_ticks.get())
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling.get()
    }

    pub fn request_roll(&self) {
        self.rolling.set(true);
    }

    pub fn request_pause(&self) {
        self.rolling.set(false);
    }

    /// Move the playhead (control thread, transport stopped or between
    /// cycles).
    pub fn locate_frames(&self, frames: i64) {
        self.playhead_ticks.set(self.frames_to_ticks(frames.max(0)));
    }

    pub fn locate_ticks(&self, ticks: f64) {
        self.playhead_ticks.set(ticks.max(0.0));
    }

    pub fn set_loop_range_frames(&self, start: i64, end: i64) {
        debug_assert!(0 <= start && start < end);
        self.loop_start_ticks.set(self.frames_to_ticks(start));
        self.loop_end_ticks.set(self.frames_to_ticks(end));
    }

    pub fn loop_start_frames(&self) -> i64 {
        self.ticks_to_frames(self.loop_start_ticks.get())
    }

    pub fn loop_end_frames(&self) -> i64 {
        self.ticks_to_frames(self.loop_end_ticks.get())
    }

    pub fn set_punch_range_frames(&self, punch_in: i64, punch_out: i64) {
        self.punch_in_ticks.set(self.frames_to_ticks(punch_in));
        self.punch_out_ticks.set(self.frames_to_ticks(punch_out));
    }

    pub fn punch_in_frames(&self) -> i64 {
        self.ticks_to_frames(self.punch_in_ticks.get())
    }

    pub fn punch_out_frames(&self) -> i64 {
        self.ticks_to_frames(self.punch_out_ticks.get())
    }

    /// Frames until the loop end, when looping and the playhead is inside
    /// the loop.
    pub fn frames_till_loop_end(&self) -> Option<i64> {
        if !self.looping.get() {
            return None;
        }
        let playhead = self.playhead_frames();
        let loop_end = self.loop_end_frames();
        (playhead < loop_end).then(|| loop_end - playhead)
    }

    /// Advance the playhead after a cycle window, wrapping at the loop end
    /// while preserving the fractional sub-loop offset.
    ///
    /// Audio thread only.
    pub fn add_frames(&self, frames: u32) {
        let mut ticks = self.playhead_ticks.get() + frames as f64 * self.ticks_per_frame();
        if self.looping.get() {
            let loop_start = self.loop_start_ticks.get();
            let loop_end = self.loop_end_ticks.get();
            if ticks >= loop_end && loop_end > loop_start {
                ticks = loop_start + (ticks - loop_end);
            }
        }
        self.playhead_ticks.set(ticks);
    }

    /// Advance the playhead and report the new musical position.
    ///
    /// `roll_nframes` is zero when stopped or still in preroll.
    pub fn post_process(&self, roll_nframes: u32, _nframes: u32) -> PositionInfo {
        if roll_nframes > 0 && self.rolling.get() {
            self.add_frames(roll_nframes);
        }
        self.position_info()
    }

    /// Musical position for the current playhead.
    pub fn position_info(&self) -> PositionInfo {
        self.position_info_at(self.playhead_ticks.get())
    }

    pub fn position_info_at(&self, ticks: f64) -> PositionInfo {
        let sig = self.time_signature();
        let ticks_per_beat = sig.ticks_per_beat();
        let ticks_per_bar = sig.ticks_per_bar();
        let ticks_per_sixteenth = TICKS_PER_QUARTER_NOTE as f64 / 4.0;
        let ticks_per_ninetysixth = TICKS_PER_QUARTER_NOTE as f64 / 24.0;

        let bar = (ticks / ticks_per_bar).floor() as i32;
        let tick_within_bar = ticks - bar as f64 * ticks_per_bar;
        let beat = (tick_within_bar / ticks_per_beat).floor() as i32;
        let tick_within_beat = tick_within_bar - beat as f64 * ticks_per_beat;
        let sixteenth = (tick_within_beat / ticks_per_sixteenth).floor() as i32;
        let sixteenth_within_bar = (tick_within_bar / ticks_per_sixteenth).floor() as i32;
        let sixteenth_within_song = (ticks / ticks_per_sixteenth).floor() as i32;

        PositionInfo {
            is_rolling: self.rolling.get(),
            bpm: self.bpm.get(),
            playhead_ticks: ticks,
            bar: bar + 1,
            beat: beat + 1,
            sixteenth: sixteenth + 1,
            sixteenth_within_bar: sixteenth_within_bar + 1,
            sixteenth_within_song: sixteenth_within_song + 1,
            tick_within_beat,
            tick_within_bar,
            ninetysixths: (ticks / ticks_per_ninetysixth).floor() as i32,
        }
    }
}
