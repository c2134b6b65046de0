//! Registry of port connections.
//!
//! The manager is mutated on the control thread and publishes an immutable
//! snapshot through `ArcSwap`; the audio thread only ever loads the
//! snapshot, so rewiring never blocks a cycle (mutators additionally hold
//! the port operation lock so buffers are not swapped mid-sum).

use crate::error::{Error, Result};
use crate::port::{PortConnection, PortId, PortRegistry, PortType};
use crate::time::TimeInfo;
use arc_swap::ArcSwap;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable connection table read by the audio thread.
#[derive(Debug, Default)]
pub struct ConnectionsSnapshot {
    by_dst: HashMap<PortId, SmallVec<[PortConnection; 4]>>,
    by_src: HashMap<PortId, SmallVec<[PortConnection; 4]>>,
    all: Vec<PortConnection>,
}

impl ConnectionsSnapshot {
    /// Enabled or disabled connections into `dst`.
    pub fn sources_of(&self, dst: PortId) -> &[PortConnection] {
        self.by_dst.get(&dst).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Enabled or disabled connections out of `src`.
    pub fn dests_of(&self, src: PortId) -> &[PortConnection] {
        self.by_src.get(&src).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn all(&self) -> &[PortConnection] {
        &self.all
    }
}

/// Registry of directed connections with audio-thread snapshots.
pub struct PortConnectionManager {
    connections: parking_lot::Mutex<Vec<PortConnection>>,
    snapshot: ArcSwap<ConnectionsSnapshot>,
}

impl Default for PortConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PortConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: parking_lot::Mutex::new(Vec::new()),
            snapshot: ArcSwap::new(Arc::new(ConnectionsSnapshot::default())),
        }
    }

    /// Connect `src` to `dst`. Fails with [`Error::ConnectionRejected`] when
    /// the pair is already connected.
    pub fn connect(
        &self,
        src: PortId,
        dst: PortId,
        multiplier: f32,
        locked: bool,
    ) -> Result<PortConnection> {
        let mut connections = self.connections.lock();
        if connections.iter().any(|c| c.src == src && c.dst == dst) {
            return Err(Error::ConnectionRejected(format!(
                "{src} is already connected to {dst}"
            )));
        }
        let conn = PortConnection::new(src, dst, multiplier, locked);
        connections.push(conn);
        self.publish(&connections);
        Ok(conn)
    }

    /// Connect unless the pair already exists; existing connections are left
    /// untouched. Used by the fixed engine wiring.
    pub fn ensure_connect(
        &self,
        src: PortId,
        dst: PortId,
        multiplier: f32,
        locked: bool,
    ) -> PortConnection {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.iter().find(|c| c.src == src && c.dst == dst) {
            return *existing;
        }
        let conn = PortConnection::new(src, dst, multiplier, locked);
        connections.push(conn);
        self.publish(&connections);
        conn
    }

    /// Remove the `(src, dst)` connection.
    pub fn disconnect(&self, src: PortId, dst: PortId) -> Result<()> {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| !(c.src == src && c.dst == dst));
        if connections.len() == before {
            return Err(Error::ConnectionRejected(format!(
                "{src} is not connected to {dst}"
            )));
        }
        self.publish(&connections);
        Ok(())
    }

    /// Remove every connection touching `port`, locked ones included.
    /// Used when a port's owner is destroyed.
    pub fn disconnect_all_for_port(&self, port: PortId) {
        let mut connections = self.connections.lock();
        connections.retain(|c| c.src != port && c.dst != port);
        self.publish(&connections);
    }

    pub fn set_enabled(&self, src: PortId, dst: PortId, enabled: bool) -> Result<()> {
        let mut connections = self.connections.lock();
        let conn = connections
            .iter_mut()
            .find(|c| c.src == src && c.dst == dst)
            .ok_or_else(|| {
                Error::ConnectionRejected(format!("{src} is not connected to {dst}"))
            })?;
        conn.enabled = enabled;
        self.publish(&connections);
        Ok(())
    }

    pub fn set_multiplier(&self, src: PortId, dst: PortId, multiplier: f32) -> Result<()> {
        let mut connections = self.connections.lock();
        let conn = connections
            .iter_mut()
            .find(|c| c.src == src && c.dst == dst)
            .ok_or_else(|| {
                Error::ConnectionRejected(format!("{src} is not connected to {dst}"))
            })?;
        conn.multiplier = multiplier;
        self.publish(&connections);
        Ok(())
    }

    /// Latest snapshot for the audio thread. Cheap (`Arc` clone).
    pub fn snapshot(&self) -> Arc<ConnectionsSnapshot> {
        self.snapshot.load_full()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn publish(&self, connections: &[PortConnection]) {
        let mut by_dst: HashMap<PortId, SmallVec<[PortConnection; 4]>> = HashMap::new();
        let mut by_src: HashMap<PortId, SmallVec<[PortConnection; 4]>> = HashMap::new();
        for conn in connections {
            by_dst.entry(conn.dst).or_default().push(*conn);
            by_src.entry(conn.src).or_default().push(*conn);
        }
        self.snapshot.store(Arc::new(ConnectionsSnapshot {
            by_dst,
            by_src,
            all: connections.to_vec(),
        }));
    }
}

/// Sum every enabled incoming connection into the destination port.
///
/// Audio/CV sources are mixed with their multipliers; MIDI sources have
/// their active events merged (multiplier ignored). Must run after all
/// source-owning nodes processed this window — the graph's topological
/// order guarantees it.
pub fn process_port_inputs(
    registry: &PortRegistry,
    snapshot: &ConnectionsSnapshot,
    dst: PortId,
    time: TimeInfo,
) {
    let incoming = snapshot.sources_of(dst);
    if incoming.is_empty() {
        return;
    }
    let Some(dst_cell) = registry.cell(dst) else {
        return;
    };
    // SAFETY: this node is the only one touching `dst` in this window.
    let dst_port = unsafe { dst_cell.get_mut() };

    for conn in incoming {
        if !conn.enabled {
            continue;
        }
        let Some(src_cell) = registry.cell(conn.src) else {
            continue;
        };
        // SAFETY: source writers have finished; reads only.
        let src_port = unsafe { src_cell.get() };

        match dst_port.port_type() {
            PortType::Audio | PortType::Cv => {
                let range = time.range();
                if range.end <= dst_port.buf.len() && range.end <= src_port.buf.len() {
                    crate::dsp::mix_product(
                        &mut dst_port.buf[range.clone()],
                        &src_port.buf[range],
                        conn.multiplier,
                    );
                }
            }
            PortType::Midi => {
                dst_port.midi_events.active.append(
                    &src_port.midi_events.active,
                    time.local_offset,
                    time.nframes,
                );
            }
            PortType::Control => {}
        }
    }

    if dst_port.port_type() == PortType::Midi {
        dst_port.midi_events.active.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortFlow, PortOwner};

    fn audio_port(registry: &PortRegistry, flow: PortFlow, label: &str) -> PortId {
        let id = registry.create(PortType::Audio, flow, label, label, PortOwner::Engine);
        registry.with_port_mut(id, |p| p.alloc_buffer(8));
        id
    }

    #[test]
    fn test_connect_rejects_duplicates() {
        let mgr = PortConnectionManager::new();
        let (a, b) = (PortId(1), PortId(2));
        mgr.connect(a, b, 1.0, false).unwrap();
        assert!(matches!(
            mgr.connect(a, b, 0.5, false),
            Err(Error::ConnectionRejected(_))
        ));
        assert_eq!(mgr.connection_count(), 1);
    }

    #[test]
    fn test_ensure_connect_idempotent() {
        let mgr = PortConnectionManager::new();
        let first = mgr.ensure_connect(PortId(1), PortId(2), 1.0, true);
        let second = mgr.ensure_connect(PortId(1), PortId(2), 0.3, false);
        assert_eq!(first.multiplier, second.multiplier);
        assert_eq!(mgr.connection_count(), 1);
    }

    #[test]
    fn test_snapshot_lookup() {
        let mgr = PortConnectionManager::new();
        mgr.connect(PortId(1), PortId(3), 1.0, false).unwrap();
        mgr.connect(PortId(2), PortId(3), 0.5, false).unwrap();

        let snap = mgr.snapshot();
        assert_eq!(snap.sources_of(PortId(3)).len(), 2);
        assert_eq!(snap.dests_of(PortId(1)).len(), 1);
        assert!(snap.sources_of(PortId(1)).is_empty());
    }

    #[test]
    fn test_disconnect() {
        let mgr = PortConnectionManager::new();
        mgr.connect(PortId(1), PortId(2), 1.0, false).unwrap();
        mgr.disconnect(PortId(1), PortId(2)).unwrap();
        assert_eq!(mgr.connection_count(), 0);
        assert!(mgr.disconnect(PortId(1), PortId(2)).is_err());
    }

    #[test]
    fn test_fan_in_summation() {
        let registry = PortRegistry::new();
        let src_a = audio_port(&registry, PortFlow::Output, "a");
        let src_b = audio_port(&registry, PortFlow::Output, "b");
        let dst = audio_port(&registry, PortFlow::Input, "dst");

        registry.with_port_mut(src_a, |p| crate::dsp::fill(&mut p.buf, 1.0));
        registry.with_port_mut(src_b, |p| crate::dsp::fill(&mut p.buf, 2.0));

        let mgr = PortConnectionManager::new();
        mgr.connect(src_a, dst, 1.0, false).unwrap();
        mgr.connect(src_b, dst, 0.5, false).unwrap();

        let time = TimeInfo::new(0, 0, 8);
        process_port_inputs(&registry, &mgr.snapshot(), dst, time);

        registry.with_port(dst, |p| {
            assert!(p.buf.iter().all(|&v| (v - 2.0).abs() < 1e-6));
        });
    }

    #[test]
    fn test_disabled_connection_carries_nothing() {
        let registry = PortRegistry::new();
        let src = audio_port(&registry, PortFlow::Output, "src");
        let dst = audio_port(&registry, PortFlow::Input, "dst");
        registry.with_port_mut(src, |p| crate::dsp::fill(&mut p.buf, 1.0));

        let mgr = PortConnectionManager::new();
        mgr.connect(src, dst, 1.0, false).unwrap();
        mgr.set_enabled(src, dst, false).unwrap();

        process_port_inputs(&registry, &mgr.snapshot(), dst, TimeInfo::new(0, 0, 8));
        registry.with_port(dst, |p| {
            assert!(p.buf.iter().all(|&v| v == 0.0));
        });
    }
}
