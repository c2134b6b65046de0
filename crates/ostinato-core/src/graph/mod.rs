//! The processing graph.
//!
//! Built from the tracklist and the connection table: every track
//! processor, plugin, prefader, fader and boundary port becomes a node;
//! edges are port connections plus the fixed intra-strip links. Nodes run
//! once per window in topological order, optionally fanned out to a worker
//! pool for independent subgraphs.

pub mod scheduler;

use crate::cell::ProcCell;
use crate::control_room::ControlRoom;
use crate::error::{Error, Result};
use crate::fader::{Fader, FaderProcessCtx};
use crate::pdc::MonoDelay;
use crate::plugin::PluginInstance;
use crate::pool::AudioPool;
use crate::port::{
    connections::process_port_inputs, ConnectionsSnapshot, PortCell, PortId, PortRegistry,
};
use crate::track::{processor::TrackProcessCtx, Track, Tracklist};
use crate::transport::Transport;
use crate::time::TimeInfo;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// What a node processes.
pub enum NodeKind {
    TrackProcessor {
        track: Arc<ProcCell<Track>>,
    },
    Plugin {
        plugin: Arc<ProcCell<PluginInstance>>,
    },
    Fader {
        fader: Arc<ProcCell<Fader>>,
        track_id: Option<u64>,
        is_monitor: bool,
    },
    /// A bare port at a boundary (channel outs, engine I/O): sums its
    /// fan-in, applies latency compensation, feeds its meter.
    Port {
        id: PortId,
    },
}

/// One schedulable unit.
pub struct GraphNode {
    pub name: String,
    pub kind: NodeKind,
    /// Input ports whose fan-in is summed before the node runs.
    pub input_ports: Vec<PortId>,
    /// Output ports, for meter updates and edge derivation.
    pub output_ports: Vec<PortId>,
    /// The node's own processing latency (plugins).
    pub own_latency: u32,
    /// Accumulated latency of the deepest upstream path, own included.
    /// Atomic so the soft graph recalculation can run without rebuilding
    /// node storage.
    up_latency: AtomicU32,
    successors: Vec<usize>,
    predecessors: Vec<usize>,
    /// Compensation delay on this node's port (channel outs only).
    delay: Option<ProcCell<MonoDelay>>,
}

impl GraphNode {
    pub(crate) fn predecessor_count(&self) -> usize {
        self.predecessors.len()
    }

    pub fn up_latency(&self) -> u32 {
        self.up_latency.load(Ordering::Acquire)
    }
}

/// Immutable cycle context shared by every node (and worker thread).
#[derive(Clone)]
pub struct GraphCtx {
    pub registry: Arc<PortRegistry>,
    pub connections: Arc<ConnectionsSnapshot>,
    pub pool: Arc<AudioPool>,
    pub transport: Arc<Transport>,
    pub tracklist: Arc<ProcCell<Tracklist>>,
    pub control_room: Arc<ControlRoom>,
    pub denormal_prevention_val: f32,
    pub rolling: bool,
    pub bouncing: bool,
    /// The engine's manual-press port and the track it currently targets.
    pub piano_roll_port: Option<PortId>,
    pub piano_roll_track: Option<u64>,
}

/// A compiled, schedulable processing graph.
pub struct ProcessingGraph {
    nodes: Vec<GraphNode>,
    topo_order: Vec<usize>,
    trigger_nodes: Vec<usize>,
    /// Every registered port at build time, cached so per-cycle prepare
    /// avoids registry iteration.
    port_cells: Vec<Arc<PortCell>>,
    max_up_latency: AtomicU32,
}

impl ProcessingGraph {
    /// Build the graph from the current tracklist and connections.
    ///
    /// `boundary_ports` are engine-owned ports that exist outside any
    /// track (hardware I/O, monitor outs); source ports become trigger
    /// nodes, sink ports become terminal nodes.
    pub fn build(
        tracklist: &Tracklist,
        control_room: &ControlRoom,
        registry: &PortRegistry,
        connections: &ConnectionsSnapshot,
        boundary_ports: &[PortId],
    ) -> Result<Self> {
        let mut nodes: Vec<GraphNode> = Vec::new();

        for track_cell in tracklist.iter() {
            track_cell.with(|track| {
                let processor = track.processor.clone();
                let (input_ports, output_ports) = processor.with(|p| {
                    let mut ins = Vec::new();
                    let mut outs = Vec::new();
                    ins.extend(p.midi_in);
                    outs.extend(p.midi_out);
                    if let Some((l, r)) = p.stereo_in {
                        ins.push(l);
                        ins.push(r);
                    }
                    if let Some((l, r)) = p.stereo_out {
                        outs.push(l);
                        outs.push(r);
                    }
                    (ins, outs)
                });
                nodes.push(GraphNode {
                    name: format!("{} processor", track.name),
                    kind: NodeKind::TrackProcessor {
                        track: track_cell.clone(),
                    },
                    input_ports,
                    output_ports,
                    own_latency: 0,
                    up_latency: AtomicU32::new(0),
                    successors: Vec::new(),
                    predecessors: Vec::new(),
                    delay: None,
                });

                for plugin in track.channel.plugins() {
                    let (name, ins, outs, latency) = plugin.with(|p| {
                        let mut ins = Vec::new();
                        let mut outs = Vec::new();
                        if let Some((l, r)) = p.stereo_in {
                            ins.push(l);
                            ins.push(r);
                        }
                        ins.extend(p.midi_in);
                        if let Some((l, r)) = p.stereo_out {
                            outs.push(l);
                            outs.push(r);
                        }
                        outs.extend(p.midi_out);
                        (p.name.clone(), ins, outs, p.latency())
                    });
                    nodes.push(GraphNode {
                        name: format!("{} / {}", track.name, name),
                        kind: NodeKind::Plugin { plugin },
                        input_ports: ins,
                        output_ports: outs,
                        own_latency: latency,
                        up_latency: AtomicU32::new(0),
                        successors: Vec::new(),
                        predecessors: Vec::new(),
                        delay: None,
                    });
                }

                for (fader, label) in [
                    (track.channel.prefader.clone(), "prefader"),
                    (track.channel.fader.clone(), "fader"),
                ] {
                    let (ins, outs) = fader.with(|f| {
                        let mut ins = Vec::new();
                        let mut outs = Vec::new();
                        if let Some((l, r)) = f.stereo_in {
                            ins.push(l);
                            ins.push(r);
                        }
                        ins.extend(f.midi_in);
                        if let Some((l, r)) = f.stereo_out {
                            outs.push(l);
                            outs.push(r);
                        }
                        outs.extend(f.midi_out);
                        (ins, outs)
                    });
                    nodes.push(GraphNode {
                        name: format!("{} {label}", track.name),
                        kind: NodeKind::Fader {
                            fader,
                            track_id: Some(track.id),
                            is_monitor: false,
                        },
                        input_ports: ins,
                        output_ports: outs,
                        own_latency: 0,
                        up_latency: AtomicU32::new(0),
                        successors: Vec::new(),
                        predecessors: Vec::new(),
                        delay: None,
                    });
                }

                // channel boundary ports
                let mut channel_ports = Vec::new();
                if let Some((l, r)) = track.channel.stereo_out {
                    channel_ports.push(l);
                    channel_ports.push(r);
                }
                channel_ports.extend(track.channel.midi_out);
                for port in channel_ports {
                    nodes.push(GraphNode {
                        name: format!("{} out {port}", track.name),
                        kind: NodeKind::Port { id: port },
                        input_ports: vec![port],
                        output_ports: vec![port],
                        own_latency: 0,
                        up_latency: AtomicU32::new(0),
                        successors: Vec::new(),
                        predecessors: Vec::new(),
                        delay: Some(ProcCell::new(MonoDelay::new(0))),
                    });
                }
            });
        }

        // monitor fader
        {
            let fader = control_room.monitor_fader.clone();
            let (ins, outs) = fader.with(|f| {
                let mut ins = Vec::new();
                let mut outs = Vec::new();
                if let Some((l, r)) = f.stereo_in {
                    ins.push(l);
                    ins.push(r);
                }
                if let Some((l, r)) = f.stereo_out {
                    outs.push(l);
                    outs.push(r);
                }
                (ins, outs)
            });
            nodes.push(GraphNode {
                name: "monitor fader".into(),
                kind: NodeKind::Fader {
                    fader,
                    track_id: None,
                    is_monitor: true,
                },
                input_ports: ins,
                output_ports: outs,
                own_latency: 0,
                up_latency: AtomicU32::new(0),
                successors: Vec::new(),
                predecessors: Vec::new(),
                delay: None,
            });
        }

        for &port in boundary_ports {
            nodes.push(GraphNode {
                name: format!("engine {port}"),
                kind: NodeKind::Port { id: port },
                input_ports: vec![port],
                output_ports: vec![port],
                own_latency: 0,
                up_latency: AtomicU32::new(0),
                successors: Vec::new(),
                predecessors: Vec::new(),
                delay: None,
            });
        }

        // port -> node map; inputs take priority so connections land on the
        // consuming node
        let mut port_to_node: HashMap<PortId, usize> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for &port in &node.output_ports {
                port_to_node.entry(port).or_insert(idx);
            }
        }
        let mut input_port_to_node: HashMap<PortId, usize> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for &port in &node.input_ports {
                input_port_to_node.entry(port).or_insert(idx);
            }
        }

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for conn in connections.all() {
            let (Some(&src_node), Some(&dst_node)) = (
                port_to_node.get(&conn.src),
                input_port_to_node.get(&conn.dst),
            ) else {
                continue;
            };
            if src_node != dst_node {
                edges.push((src_node, dst_node));
            }
        }

        // every channel fader runs before the monitor fader, so listen
        // buses are valid when the monitor mixes them
        let monitor_idx = nodes
            .iter()
            .position(|n| matches!(n.kind, NodeKind::Fader { is_monitor: true, .. }));
        if let Some(monitor_idx) = monitor_idx {
            for (idx, node) in nodes.iter().enumerate() {
                if let NodeKind::Fader {
                    is_monitor: false,
                    track_id: Some(_),
                    ..
                } = node.kind
                {
                    edges.push((idx, monitor_idx));
                }
            }
        }

        edges.sort_unstable();
        edges.dedup();
        for &(src, dst) in &edges {
            nodes[src].successors.push(dst);
            nodes[dst].predecessors.push(src);
        }

        // Kahn's toposort; leftovers mean a cycle
        let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.predecessors.len()).collect();
        let mut queue: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let trigger_nodes = queue.clone();
        let mut topo_order = Vec::with_capacity(nodes.len());
        while let Some(idx) = queue.pop() {
            topo_order.push(idx);
            for &succ in &nodes[idx].successors {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    queue.push(succ);
                }
            }
        }
        if topo_order.len() != nodes.len() {
            let stuck = in_degree
                .iter()
                .position(|&d| d > 0)
                .map(|i| nodes[i].name.clone())
                .unwrap_or_default();
            return Err(Error::CycleDetected(stuck));
        }

        let port_cells = registry
            .ids()
            .into_iter()
            .filter_map(|id| registry.cell(id))
            .collect();

        let mut graph = Self {
            nodes,
            topo_order,
            trigger_nodes,
            port_cells,
            max_up_latency: AtomicU32::new(0),
        };
        graph.update_latencies();
        tracing::debug!(
            nodes = graph.nodes.len(),
            max_latency = graph.max_up_latency.load(Ordering::Relaxed),
            "graph rebuilt"
        );
        Ok(graph)
    }

    /// Recompute per-node accumulated latencies and compensation delays
    /// without touching node storage (the `soft` recalculation).
    pub fn update_latencies(&self) {
        for &idx in &self.topo_order {
            let pred_max = self.nodes[idx]
                .predecessors
                .iter()
                .map(|&p| self.nodes[p].up_latency())
                .max()
                .unwrap_or(0);
            self.nodes[idx]
                .up_latency
                .store(self.nodes[idx].own_latency + pred_max, Ordering::Release);
        }
        let max = self
            .nodes
            .iter()
            .map(|n| n.up_latency())
            .max()
            .unwrap_or(0);
        self.max_up_latency.store(max, Ordering::Release);

        for node in &self.nodes {
            if let Some(delay) = &node.delay {
                let compensation = (max - node.up_latency()) as usize;
                delay.with_mut(|d| d.set_delay(compensation));
            }
        }
    }

    /// The preroll needed so latency-compensated paths are warm when
    /// playback starts.
    pub fn remaining_latency_preroll(&self) -> u32 {
        self.max_up_latency.load(Ordering::Acquire)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn trigger_nodes(&self) -> &[usize] {
        &self.trigger_nodes
    }

    pub(crate) fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub(crate) fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    pub(crate) fn successors_of(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].successors
    }

    /// Reset every port for a new cycle: audio buffers are filled with the
    /// denormal-prevention bias, MIDI queues are drained into active lists.
    pub fn prepare_ports(&self, nframes: u32, denormal_prevention_val: f32) {
        for cell in &self.port_cells {
            // SAFETY: called by the audio thread before any node runs.
            unsafe { cell.get_mut() }.prepare(nframes, denormal_prevention_val);
        }
    }

    /// Run the whole graph on the calling thread.
    pub fn run_single_threaded(&self, ctx: &GraphCtx, time: TimeInfo) {
        for &idx in &self.topo_order {
            self.process_node(idx, ctx, time);
        }
    }

    /// Run one node: sum its fan-in, then dispatch on kind.
    pub(crate) fn process_node(&self, idx: usize, ctx: &GraphCtx, time: TimeInfo) {
        let node = &self.nodes[idx];
        for &port in &node.input_ports {
            process_port_inputs(&ctx.registry, &ctx.connections, port, time);
        }

        match &node.kind {
            NodeKind::TrackProcessor { track } => {
                // SAFETY: shared read of track metadata; only the processor
                // itself is mutated, exclusively by this node.
                let track_ref = unsafe { track.get() };
                let piano_cell = if ctx.piano_roll_track == Some(track_ref.id) {
                    ctx.piano_roll_port.and_then(|id| ctx.registry.cell(id))
                } else {
                    None
                };
                // SAFETY: the manual-press port is prepared before the
                // cycle and only read here.
                let piano_events = piano_cell
                    .as_ref()
                    .map(|cell| unsafe { &cell.get().midi_events.active });

                let tctx = TrackProcessCtx {
                    rolling: ctx.rolling,
                    piano_roll_events: piano_events,
                    pool: &ctx.pool,
                };
                // SAFETY: exclusive per scheduling.
                unsafe { track_ref.processor.get_mut() }.process(
                    &ctx.registry,
                    &tctx,
                    &track_ref.lanes,
                    time,
                );
            }
            NodeKind::Plugin { plugin } => {
                // SAFETY: exclusive per scheduling.
                unsafe { plugin.get_mut() }.process_block(&ctx.registry, time);
            }
            NodeKind::Fader {
                fader,
                track_id,
                is_monitor,
            } => {
                // SAFETY: tracklist reads are stable during a cycle.
                let tracklist = unsafe { ctx.tracklist.get() };
                let any_track_soloed = tracklist.has_soloed(&ctx.registry);
                let any_track_listened = tracklist.has_listened(&ctx.registry);

                let (implied_soloed, is_master, track_bounce) = match track_id {
                    Some(id) => {
                        let implied = tracklist.implied_soloed(*id, &ctx.registry);
                        tracklist
                            .get(*id)
                            .map(|t| t.with(|tr| (implied, tr.is_master(), tr.bounce)))
                            .unwrap_or((implied, false, false))
                    }
                    None => (false, false, false),
                };

                let listened_outs = if *is_monitor && any_track_listened {
                    tracklist.listened_fader_outs(&ctx.registry)
                } else {
                    Vec::new()
                };

                let fctx = FaderProcessCtx {
                    any_track_soloed,
                    implied_soloed,
                    is_master,
                    bouncing: ctx.bouncing,
                    track_bounce,
                    denormal_prevention_val: ctx.denormal_prevention_val,
                    mute_amp: ctx.control_room.mute_amp.get(),
                    dim_amp: ctx.control_room.dim_amp.get(),
                    listen_amp: ctx.control_room.listen_amp.get(),
                    dim_output: ctx.control_room.dim_output.get(),
                    any_track_listened,
                    listened_fader_outs: &listened_outs,
                };
                // SAFETY: exclusive per scheduling.
                unsafe { fader.get_mut() }.process(&ctx.registry, &fctx, time);
            }
            NodeKind::Port { id } => {
                if let Some(cell) = ctx.registry.cell(*id) {
                    // SAFETY: exclusive per scheduling.
                    let port = unsafe { cell.get_mut() };
                    if let Some(delay) = &node.delay {
                        delay.with_mut(|d| {
                            if d.delay_samples() > 0 {
                                let range = time.range();
                                if range.end <= port.buf.len() {
                                    d.process(&mut port.buf[range]);
                                }
                            }
                        });
                    }
                }
            }
        }

        // exposed outputs feed their meter rings after the node ran
        for &port in &node.output_ports {
            if let Some(cell) = ctx.registry.cell(port) {
                // SAFETY: exclusive per scheduling.
                let port = unsafe { cell.get_mut() };
                if port.is_exposed() {
                    port.update_meter(time);
                }
            }
        }
    }
}
