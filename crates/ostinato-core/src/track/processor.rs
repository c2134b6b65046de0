//! Per-track input stage.
//!
//! The track processor sits at the head of every channel: it merges
//! external input, the piano-roll manual-press port and the track's playing
//! regions into one stream at the track's inputs, honoring the MIDI channel
//! filter and the monitoring switch.

use crate::pool::AudioPool;
use crate::port::{PortFlow, PortId, PortOwner, PortRegistry, PortType};
use crate::region::{audio, chord, midi, Region, RegionKind};
use crate::time::TimeInfo;
use ostinato_midi::{MidiEventList, ALL_CHANNELS_MASK};

/// Context the processor needs for one window.
pub struct TrackProcessCtx<'a> {
    pub rolling: bool,
    /// Manual-press events from the piano roll, when this track is the
    /// piano roll's target.
    pub piano_roll_events: Option<&'a MidiEventList>,
    pub pool: &'a AudioPool,
}

/// Input stage of one track.
pub struct TrackProcessor {
    pub track_id: u64,
    pub is_midi: bool,

    pub midi_in: Option<PortId>,
    pub midi_out: Option<PortId>,
    pub stereo_in: Option<(PortId, PortId)>,
    pub stereo_out: Option<(PortId, PortId)>,

    /// Bit `n` enables MIDI channel `n` from external input.
    pub all_midi_channels_mask: u16,
    /// Pass external input through even when not rolling.
    pub monitoring: bool,
    /// Record-armed.
    pub armed: bool,
    /// One-shot guard so a missing pool clip is reported once, not per
    /// cycle.
    missing_clip_logged: bool,
}

impl TrackProcessor {
    pub fn new(track_id: u64, is_midi: bool, registry: &PortRegistry) -> Self {
        let owner = PortOwner::Track(track_id);
        let (midi_in, midi_out, stereo_in, stereo_out) = if is_midi {
            (
                Some(registry.create(
                    PortType::Midi,
                    PortFlow::Input,
                    "TP MIDI in",
                    "track_processor_midi_in",
                    owner,
                )),
                Some(registry.create(
                    PortType::Midi,
                    PortFlow::Output,
                    "TP MIDI out",
                    "track_processor_midi_out",
                    owner,
                )),
                None,
                None,
            )
        } else {
            (
                None,
                None,
                Some((
                    registry.create(
                        PortType::Audio,
                        PortFlow::Input,
                        "TP Stereo in L",
                        "track_processor_stereo_in_l",
                        owner,
                    ),
                    registry.create(
                        PortType::Audio,
                        PortFlow::Input,
                        "TP Stereo in R",
                        "track_processor_stereo_in_r",
                        owner,
                    ),
                )),
                Some((
                    registry.create(
                        PortType::Audio,
                        PortFlow::Output,
                        "TP Stereo out L",
                        "track_processor_stereo_out_l",
                        owner,
                    ),
                    registry.create(
                        PortType::Audio,
                        PortFlow::Output,
                        "TP Stereo out R",
                        "track_processor_stereo_out_r",
                        owner,
                    ),
                )),
            )
        };

        Self {
            track_id,
            is_midi,
            midi_in,
            midi_out,
            stereo_in,
            stereo_out,
            all_midi_channels_mask: ALL_CHANNELS_MASK,
            monitoring: false,
            armed: false,
            missing_clip_logged: false,
        }
    }

    pub fn ports(&self) -> Vec<PortId> {
        let mut ports = Vec::new();
        ports.extend(self.midi_in);
        ports.extend(self.midi_out);
        if let Some((l, r)) = self.stereo_in {
            ports.push(l);
            ports.push(r);
        }
        if let Some((l, r)) = self.stereo_out {
            ports.push(l);
            ports.push(r);
        }
        ports
    }

    /// Process one window: merge inputs and playing regions into the
    /// track's output ports.
    ///
    /// `regions` are the track's lane regions. The caller has split the
    /// cycle at transport loop points; internal region loops are split
    /// here.
    pub fn process(
        &mut self,
        registry: &PortRegistry,
        ctx: &TrackProcessCtx<'_>,
        regions: &[Region],
        time: TimeInfo,
    ) {
        if self.is_midi {
            self.process_midi(registry, ctx, regions, time);
        } else {
            self.process_audio(registry, ctx, regions, time);
        }
    }

    fn process_midi(
        &mut self,
        registry: &PortRegistry,
        ctx: &TrackProcessCtx<'_>,
        regions: &[Region],
        time: TimeInfo,
    ) {
        let (Some(midi_in), Some(midi_out)) = (self.midi_in, self.midi_out) else {
            return;
        };
        let (Some(in_cell), Some(out_cell)) = (registry.cell(midi_in), registry.cell(midi_out))
        else {
            return;
        };

        // SAFETY: see PortCell; in was written upstream, out is ours.
        let (in_port, out_port) = unsafe { (in_cell.get(), out_cell.get_mut()) };
        let out = &mut out_port.midi_events.active;

        // external input, filtered by the channel mask
        out.append_filtered(
            &in_port.midi_events.active,
            time.local_offset,
            time.nframes,
            self.all_midi_channels_mask,
            None,
        );

        // piano-roll manual presses
        if let Some(piano_roll) = ctx.piano_roll_events {
            out.append(piano_roll, time.local_offset, time.nframes);
        }

        // playing regions
        if ctx.rolling {
            for region in regions {
                fill_region_events(region, time, out);
            }
        }

        out.sort();
    }

    fn process_audio(
        &mut self,
        registry: &PortRegistry,
        ctx: &TrackProcessCtx<'_>,
        regions: &[Region],
        time: TimeInfo,
    ) {
        let (Some((in_l, in_r)), Some((out_l, out_r))) = (self.stereo_in, self.stereo_out) else {
            return;
        };
        let range = time.range();

        let (Some(in_l_cell), Some(in_r_cell), Some(out_l_cell), Some(out_r_cell)) = (
            registry.cell(in_l),
            registry.cell(in_r),
            registry.cell(out_l),
            registry.cell(out_r),
        ) else {
            return;
        };

        // SAFETY: see PortCell.
        let (in_l_buf, in_r_buf, out_l_buf, out_r_buf) = unsafe {
            (
                &in_l_cell.get().buf[range.clone()],
                &in_r_cell.get().buf[range.clone()],
                &mut out_l_cell.get_mut().buf[range.clone()],
                &mut out_r_cell.get_mut().buf[range.clone()],
            )
        };

        // monitor input only when armed or monitoring
        if self.monitoring || self.armed {
            crate::dsp::copy(out_l_buf, in_l_buf);
            crate::dsp::copy(out_r_buf, in_r_buf);
        }

        if ctx.rolling {
            for region in regions {
                if let RegionKind::Audio(data) = &region.kind {
                    match ctx.pool.get(data.pool_id) {
                        Ok(clip) => {
                            // windowed buffers are region-relative here
                            let window = TimeInfo::new(time.g_start_frame, 0, time.nframes);
                            audio::fill_stereo(region, &clip, window, out_l_buf, out_r_buf);
                        }
                        Err(err) => {
                            if !self.missing_clip_logged {
                                self.missing_clip_logged = true;
                                tracing::warn!(region = %region.name, %err, "clip missing, region silent");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Emit a region's MIDI events for the window, splitting at the region's
/// internal loop points so [`midi::fill_midi_events`]'s no-wrap
/// pre-condition holds.
fn fill_region_events(region: &Region, time: TimeInfo, out: &mut MidiEventList) {
    if !matches!(region.kind, RegionKind::Midi(_) | RegionKind::Chord(_)) {
        return;
    }

    let mut offset = 0u32;
    while offset < time.nframes {
        let tl = time.g_start_frame + offset as i64;

        if tl < region.start_pos {
            // region starts inside this window: skip ahead to it
            let skip = (region.start_pos - tl).min((time.nframes - offset) as i64) as u32;
            offset += skip;
            continue;
        }
        if tl >= region.end_pos {
            break;
        }

        let (frames, is_loop) = region.frames_till_next_loop_or_end(tl);
        let remaining = time.nframes - offset;
        let sub = frames.max(1).min(remaining as i64) as u32;
        let boundary_reached = sub as i64 == frames;

        let window = TimeInfo::new(tl, time.local_offset + offset, sub);
        let add_note_off = boundary_reached;
        let end_is_region_end = !is_loop;

        match &region.kind {
            RegionKind::Midi(_) => {
                midi::fill_midi_events(region, window, add_note_off, end_is_region_end, out)
            }
            RegionKind::Chord(_) => {
                chord::fill_midi_events(region, window, add_note_off, end_is_region_end, out)
            }
            _ => {}
        }

        offset += sub;
    }
}
