//! Faders.
//!
//! A fader is the gain/pan/mute stage of a channel (or of the monitor bus
//! and the sample processor). Every parameter is a control port so it can
//! be automated and connected like anything else. Mute transitions are
//! de-clicked with short linear fades instead of hard cuts.

use crate::config::{FADER_DEFAULT_FADE_FRAMES, FADER_DEFAULT_FADE_FRAMES_SHORT};
use crate::dsp;
use crate::port::{
    PortFlags, PortFlow, PortId, PortOwner, PortRange, PortRegistry, PortType,
};
use crate::time::TimeInfo;

/// What a fader fronts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaderType {
    AudioChannel,
    MidiChannel,
    Monitor,
    SampleProcessor,
}

/// How a MIDI fader applies its amp value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MidiFaderMode {
    /// Scale note-on velocities.
    #[default]
    VelMultiplier,
    /// Send volume CC (7) when the amp changes.
    CcVolume,
}

/// Context a fader needs from the rest of the engine for one window.
///
/// The original reached into global singletons for these; here the engine
/// assembles an immutable view per cycle.
pub struct FaderProcessCtx<'a> {
    pub any_track_soloed: bool,
    pub implied_soloed: bool,
    pub is_master: bool,
    pub bouncing: bool,
    pub track_bounce: bool,
    pub denormal_prevention_val: f32,
    /// Control-room mute level applied to muted channel faders.
    pub mute_amp: f32,
    pub dim_amp: f32,
    pub listen_amp: f32,
    pub dim_output: bool,
    pub any_track_listened: bool,
    /// Post-fader stereo outs of listened tracks, mixed into the monitor.
    pub listened_fader_outs: &'a [(PortId, PortId)],
}

impl Default for FaderProcessCtx<'_> {
    fn default() -> Self {
        Self {
            any_track_soloed: false,
            implied_soloed: false,
            is_master: false,
            bouncing: false,
            track_bounce: false,
            denormal_prevention_val: 1e-12,
            mute_amp: 0.0,
            dim_amp: 0.1,
            listen_amp: 1.0,
            dim_output: false,
            any_track_listened: false,
            listened_fader_outs: &[],
        }
    }
}

/// A fader (or prefader when `passthrough`).
pub struct Fader {
    pub id: u64,
    pub fader_type: FaderType,
    /// Prefaders copy input to output without applying any stage.
    pub passthrough: bool,
    pub track_id: Option<u64>,
    pub midi_mode: MidiFaderMode,

    pub amp: PortId,
    pub balance: PortId,
    pub mute: PortId,
    pub solo: PortId,
    pub listen: PortId,
    pub mono_compat: PortId,
    pub swap_phase: PortId,
    pub stereo_in: Option<(PortId, PortId)>,
    pub stereo_out: Option<(PortId, PortId)>,
    pub midi_in: Option<PortId>,
    pub midi_out: Option<PortId>,

    fade_in_samples: u32,
    fade_out_samples: u32,
    fading_out: bool,
    was_effectively_muted: bool,
    last_cc_volume: f32,

    /// Cached dBFS volume for display.
    pub volume_db: f32,
    /// Cached fader widget value in `[0, 1]`.
    pub fader_val: f32,
}

impl Fader {
    pub fn new(
        id: u64,
        fader_type: FaderType,
        passthrough: bool,
        track_id: Option<u64>,
        registry: &PortRegistry,
    ) -> Self {
        let owner = PortOwner::Fader(id);
        let prefix = if passthrough { "Prefader" } else { "Fader" };
        let sym_prefix = if passthrough { "prefader" } else { "fader" };
        let channel_automatable = matches!(
            fader_type,
            FaderType::AudioChannel | FaderType::MidiChannel
        ) && !passthrough;

        let mut amp_flags = PortFlags::AMPLITUDE;
        let mut balance_flags = PortFlags::STEREO_BALANCE;
        if channel_automatable {
            amp_flags = amp_flags | PortFlags::AUTOMATABLE | PortFlags::CHANNEL_FADER;
            balance_flags = balance_flags | PortFlags::AUTOMATABLE;
        }

        let amp_id = registry.alloc_id();
        let amp = crate::port::Port::new(
            amp_id,
            PortType::Control,
            PortFlow::Input,
            format!("{prefix} Volume"),
            format!("{sym_prefix}_volume"),
            owner,
        )
        .with_flags(amp_flags)
        .with_range(PortRange::new(0.0, 2.0, 0.0), 1.0);
        registry.insert(amp);

        let balance_id = registry.alloc_id();
        let balance = crate::port::Port::new(
            balance_id,
            PortType::Control,
            PortFlow::Input,
            format!("{prefix} Balance"),
            format!("{sym_prefix}_balance"),
            owner,
        )
        .with_flags(balance_flags)
        .with_range(PortRange::new(0.0, 1.0, 0.5), 0.5);
        registry.insert(balance);

        let toggle = |label: &str, sym: &str, flags: PortFlags| {
            let id = registry.alloc_id();
            let port = crate::port::Port::new(
                id,
                PortType::Control,
                PortFlow::Input,
                format!("{prefix} {label}"),
                format!("{sym_prefix}_{sym}"),
                owner,
            )
            .with_flags(flags | PortFlags::TOGGLE);
            registry.insert(port);
            id
        };

        let mute = toggle("Mute", "mute", PortFlags::FADER_MUTE);
        let solo = toggle("Solo", "solo", PortFlags::FADER_SOLO);
        let listen = toggle("Listen", "listen", PortFlags::FADER_LISTEN);
        let mono_compat = toggle("Mono Compat", "mono_compat", PortFlags::FADER_MONO_COMPAT);
        let swap_phase = toggle("Swap Phase", "swap_phase", PortFlags::FADER_SWAP_PHASE);

        let has_audio = matches!(
            fader_type,
            FaderType::AudioChannel | FaderType::Monitor | FaderType::SampleProcessor
        );
        let has_midi = fader_type == FaderType::MidiChannel;

        let stereo_in = has_audio.then(|| {
            (
                registry.create(
                    PortType::Audio,
                    PortFlow::Input,
                    format!("{prefix} in L"),
                    format!("{sym_prefix}_in_l"),
                    owner,
                ),
                registry.create(
                    PortType::Audio,
                    PortFlow::Input,
                    format!("{prefix} in R"),
                    format!("{sym_prefix}_in_r"),
                    owner,
                ),
            )
        });
        let stereo_out = has_audio.then(|| {
            (
                registry.create(
                    PortType::Audio,
                    PortFlow::Output,
                    format!("{prefix} out L"),
                    format!("{sym_prefix}_out_l"),
                    owner,
                ),
                registry.create(
                    PortType::Audio,
                    PortFlow::Output,
                    format!("{prefix} out R"),
                    format!("{sym_prefix}_out_r"),
                    owner,
                ),
            )
        });
        let midi_in = has_midi.then(|| {
            registry.create(
                PortType::Midi,
                PortFlow::Input,
                format!("{prefix} MIDI in"),
                format!("{sym_prefix}_midi_in"),
                owner,
            )
        });
        let midi_out = has_midi.then(|| {
            registry.create(
                PortType::Midi,
                PortFlow::Output,
                format!("{prefix} MIDI out"),
                format!("{sym_prefix}_midi_out"),
                owner,
            )
        });

        Self {
            id,
            fader_type,
            passthrough,
            track_id,
            midi_mode: MidiFaderMode::default(),
            amp: amp_id,
            balance: balance_id,
            mute,
            solo,
            listen,
            mono_compat,
            swap_phase,
            stereo_in,
            stereo_out,
            midi_in,
            midi_out,
            fade_in_samples: 0,
            fade_out_samples: 0,
            fading_out: false,
            was_effectively_muted: false,
            last_cc_volume: 1.0,
            volume_db: 0.0,
            fader_val: dsp::fader_val_from_amp(1.0),
        }
    }

    /// Anti-click fade window for this fader type.
    pub fn fade_frames(&self) -> u32 {
        if self.fader_type == FaderType::Monitor {
            FADER_DEFAULT_FADE_FRAMES
        } else {
            FADER_DEFAULT_FADE_FRAMES_SHORT
        }
    }

    pub fn ports(&self) -> Vec<PortId> {
        let mut ports = vec![
            self.amp,
            self.balance,
            self.mute,
            self.solo,
            self.listen,
            self.mono_compat,
            self.swap_phase,
        ];
        if let Some((l, r)) = self.stereo_in {
            ports.push(l);
            ports.push(r);
        }
        if let Some((l, r)) = self.stereo_out {
            ports.push(l);
            ports.push(r);
        }
        ports.extend(self.midi_in);
        ports.extend(self.midi_out);
        ports
    }

    pub fn set_amp(&mut self, registry: &PortRegistry, amp: f32) {
        registry.with_port(self.amp, |p| p.set_control_value(amp, false));
        self.update_volume_and_fader_val(registry);
    }

    pub fn get_amp(&self, registry: &PortRegistry) -> f32 {
        registry
            .with_port(self.amp, |p| p.control_value(false))
            .unwrap_or(1.0)
    }

    pub fn set_fader_val(&mut self, registry: &PortRegistry, fader_val: f32) {
        let amp = dsp::amp_from_fader_val(fader_val);
        self.set_amp(registry, amp);
    }

    fn update_volume_and_fader_val(&mut self, registry: &PortRegistry) {
        let amp = self.get_amp(registry);
        self.volume_db = dsp::amp_to_dbfs(amp);
        self.fader_val = dsp::fader_val_from_amp(amp);
    }

    pub fn set_muted(&self, registry: &PortRegistry, mute: bool) {
        registry.with_port(self.mute, |p| p.set_toggled(mute));
    }

    pub fn get_muted(&self, registry: &PortRegistry) -> bool {
        registry
            .with_port(self.mute, |p| p.is_toggled())
            .unwrap_or(false)
    }

    pub fn set_soloed(&self, registry: &PortRegistry, solo: bool) {
        registry.with_port(self.solo, |p| p.set_toggled(solo));
    }

    pub fn get_soloed(&self, registry: &PortRegistry) -> bool {
        registry
            .with_port(self.solo, |p| p.is_toggled())
            .unwrap_or(false)
    }

    pub fn set_listened(&self, registry: &PortRegistry, listen: bool) {
        registry.with_port(self.listen, |p| p.set_toggled(listen));
    }

    pub fn get_listened(&self, registry: &PortRegistry) -> bool {
        registry
            .with_port(self.listen, |p| p.is_toggled())
            .unwrap_or(false)
    }

    /// Muted, or silenced by someone else's solo, or not part of a bounce.
    pub fn effectively_muted(&self, registry: &PortRegistry, ctx: &FaderProcessCtx<'_>) -> bool {
        if self.passthrough {
            return false;
        }
        let is_channel = matches!(
            self.fader_type,
            FaderType::AudioChannel | FaderType::MidiChannel
        );
        self.get_muted(registry)
            || (is_channel
                && ctx.any_track_soloed
                && !self.get_soloed(registry)
                && !ctx.implied_soloed
                && !ctx.is_master)
            || (ctx.bouncing && is_channel && !ctx.is_master && !ctx.track_bounce)
    }

    /// Process one window.
    pub fn process(
        &mut self,
        registry: &PortRegistry,
        ctx: &FaderProcessCtx<'_>,
        time: TimeInfo,
    ) {
        let effectively_muted = self.effectively_muted(registry, ctx);

        if self.stereo_in.is_some() {
            self.process_audio(registry, ctx, time, effectively_muted);
        } else if self.fader_type == FaderType::MidiChannel {
            self.process_midi(registry, time, effectively_muted);
        }

        self.was_effectively_muted = effectively_muted;
    }

    fn process_audio(
        &mut self,
        registry: &PortRegistry,
        ctx: &FaderProcessCtx<'_>,
        time: TimeInfo,
        effectively_muted: bool,
    ) {
        let range = time.range();
        let nframes = time.nframes as usize;
        let (in_l, in_r) = self.stereo_in.expect("audio fader has stereo in");
        let (out_l, out_r) = self.stereo_out.expect("audio fader has stereo out");

        let (Some(in_l_cell), Some(in_r_cell), Some(out_l_cell), Some(out_r_cell)) = (
            registry.cell(in_l),
            registry.cell(in_r),
            registry.cell(out_l),
            registry.cell(out_r),
        ) else {
            return;
        };

        // SAFETY: inputs were fully written by predecessors; the outs are
        // owned by this node for the window. See PortCell.
        let (in_l_buf, in_r_buf, out_l_buf, out_r_buf) = unsafe {
            (
                &in_l_cell.get().buf[range.clone()],
                &in_r_cell.get().buf[range.clone()],
                &mut out_l_cell.get_mut().buf[range.clone()],
                &mut out_r_cell.get_mut().buf[range.clone()],
            )
        };

        dsp::copy(out_l_buf, in_l_buf);
        dsp::copy(out_r_buf, in_r_buf);

        if self.passthrough {
            return;
        }

        let default_fade_frames = self.fade_frames();
        let mute_amp;

        if self.fader_type == FaderType::Monitor {
            mute_amp = ctx.denormal_prevention_val;

            if ctx.any_track_listened {
                // dim the main mix, then add the listened buses on top
                dsp::mul_k2(out_l_buf, ctx.dim_amp);
                dsp::mul_k2(out_r_buf, ctx.dim_amp);

                for &(listen_l, listen_r) in ctx.listened_fader_outs {
                    let (Some(l_cell), Some(r_cell)) =
                        (registry.cell(listen_l), registry.cell(listen_r))
                    else {
                        continue;
                    };
                    // SAFETY: listened faders are upstream of the monitor.
                    unsafe {
                        dsp::mix_product(
                            out_l_buf,
                            &l_cell.get().buf[range.clone()],
                            ctx.listen_amp,
                        );
                        dsp::mix_product(
                            out_r_buf,
                            &r_cell.get().buf[range.clone()],
                            ctx.listen_amp,
                        );
                    }
                }
            }

            if ctx.dim_output {
                dsp::mul_k2(out_l_buf, ctx.dim_amp);
                dsp::mul_k2(out_r_buf, ctx.dim_amp);
            }
        } else {
            mute_amp = ctx.mute_amp;

            // arm a fade when the mute state flipped since the last block
            if effectively_muted && !self.was_effectively_muted {
                self.fade_out_samples = default_fade_frames;
                self.fading_out = true;
            } else if !effectively_muted && self.was_effectively_muted {
                self.fading_out = false;
                self.fade_in_samples = default_fade_frames;
            }
        }

        // fade in
        if self.fade_in_samples > 0 {
            let start_offset = default_fade_frames - self.fade_in_samples;
            dsp::linear_fade_in_from(out_l_buf, start_offset, default_fade_frames, mute_amp);
            dsp::linear_fade_in_from(out_r_buf, start_offset, default_fade_frames, mute_amp);
            self.fade_in_samples = self.fade_in_samples.saturating_sub(time.nframes);
        }

        // fade out
        let mut faded_out_frames = 0usize;
        if self.fading_out {
            let samples_to_process = self.fade_out_samples.min(time.nframes) as usize;
            if self.fade_out_samples > 0 {
                let start_offset = default_fade_frames - self.fade_out_samples;
                dsp::linear_fade_out_to(
                    &mut out_l_buf[..samples_to_process],
                    start_offset,
                    default_fade_frames,
                    mute_amp,
                );
                dsp::linear_fade_out_to(
                    &mut out_r_buf[..samples_to_process],
                    start_offset,
                    default_fade_frames,
                    mute_amp,
                );
                self.fade_out_samples -= samples_to_process as u32;
                faded_out_frames += samples_to_process;
            }

            // fade exhausted: keep the tail at the mute level
            if self.fade_out_samples == 0 {
                let remaining = nframes - faded_out_frames;
                if remaining > 0 {
                    dsp::mul_k2(&mut out_l_buf[faded_out_frames..], mute_amp);
                    dsp::mul_k2(&mut out_r_buf[faded_out_frames..], mute_amp);
                    faded_out_frames = nframes;
                }
            }
        }

        // pan, then amp
        let pan = registry
            .with_port(self.balance, |p| p.control_value(false))
            .unwrap_or(0.5);
        let amp = registry
            .with_port(self.amp, |p| p.control_value(false))
            .unwrap_or(1.0);
        let (calc_l, calc_r) = dsp::balance_control_linear(pan);
        dsp::mul_k2(out_l_buf, amp * calc_l);
        dsp::mul_k2(out_r_buf, amp * calc_r);

        if registry
            .with_port(self.mono_compat, |p| p.is_toggled())
            .unwrap_or(false)
        {
            dsp::make_mono(out_l_buf, out_r_buf);
        }

        if registry
            .with_port(self.swap_phase, |p| p.is_toggled())
            .unwrap_or(false)
        {
            dsp::mul_k2(out_l_buf, -1.0);
            dsp::mul_k2(out_r_buf, -1.0);
        }

        if effectively_muted && self.fade_out_samples == 0 && nframes - faded_out_frames > 0 {
            // steady-state mute
            if mute_amp < 1e-5 {
                dsp::fill(
                    &mut out_l_buf[faded_out_frames..],
                    ctx.denormal_prevention_val,
                );
                dsp::fill(
                    &mut out_r_buf[faded_out_frames..],
                    ctx.denormal_prevention_val,
                );
            } else {
                dsp::mul_k2(&mut out_l_buf[faded_out_frames..], mute_amp);
                dsp::mul_k2(&mut out_r_buf[faded_out_frames..], mute_amp);
            }
        }

        // hard limit on the terminal stages
        let is_terminal = (self.fader_type == FaderType::AudioChannel && ctx.is_master)
            || matches!(
                self.fader_type,
                FaderType::Monitor | FaderType::SampleProcessor
            );
        if is_terminal {
            dsp::clip(out_l_buf, -2.0, 2.0);
            dsp::clip(out_r_buf, -2.0, 2.0);
        }
    }

    fn process_midi(
        &mut self,
        registry: &PortRegistry,
        time: TimeInfo,
        effectively_muted: bool,
    ) {
        if effectively_muted {
            return;
        }
        let (Some(midi_in), Some(midi_out)) = (self.midi_in, self.midi_out) else {
            return;
        };
        let (Some(in_cell), Some(out_cell)) = (registry.cell(midi_in), registry.cell(midi_out))
        else {
            return;
        };

        let amp = registry
            .with_port(self.amp, |p| p.control_value(false))
            .unwrap_or(1.0);

        // SAFETY: in written by predecessors, out owned by this node.
        unsafe {
            let src = &in_cell.get().midi_events.active;
            let dst = out_cell.get_mut();
            dst.midi_events
                .active
                .append(src, time.local_offset, time.nframes);

            if !self.passthrough {
                match self.midi_mode {
                    MidiFaderMode::VelMultiplier => {
                        for ev in dst.midi_events.active.iter_mut() {
                            if ev.is_note_on() {
                                let vel = ev.velocity().unwrap_or(0) as f32;
                                let scaled = (vel * amp).min(127.0) as u8;
                                ev.set_velocity(scaled);
                            }
                        }
                    }
                    MidiFaderMode::CcVolume => {
                        if (self.last_cc_volume - amp).abs() > 1e-6 {
                            // amp range [0, 2] maps onto the CC's 0-127
                            let value = ((amp / 2.0) * 127.0).min(127.0) as u8;
                            dst.midi_events.active.push(
                                ostinato_midi::MidiEvent::control_change(
                                    time.local_offset,
                                    0,
                                    7,
                                    value,
                                ),
                            );
                            self.last_cc_volume = amp;
                        }
                    }
                }
            }
        }
    }
}
