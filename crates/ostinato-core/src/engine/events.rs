//! Cross-thread engine events.
//!
//! Buffer-size and sample-rate change requests travel from backend/UI
//! threads to the non-realtime event pump through a bounded MPMC queue.
//! Event slots come from a fixed pool of recycled boxes so the hot path
//! never allocates; both the pool and the queue are bounded channels.

use crate::config::ENGINE_MAX_EVENTS;
use crossbeam_channel::{bounded, Receiver, Sender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEventKind {
    BufferSizeChange,
    SampleRateChange,
}

/// One queued engine event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    pub uint_arg: u32,
    pub float_arg: f32,
}

/// Bounded event queue with a recycling object pool.
pub struct EngineEventQueue {
    queue_tx: Sender<Box<EngineEvent>>,
    queue_rx: Receiver<Box<EngineEvent>>,
    pool_tx: Sender<Box<EngineEvent>>,
    pool_rx: Receiver<Box<EngineEvent>>,
}

impl Default for EngineEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineEventQueue {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = bounded(ENGINE_MAX_EVENTS);
        let (pool_tx, pool_rx) = bounded(ENGINE_MAX_EVENTS);
        for _ in 0..ENGINE_MAX_EVENTS {
            pool_tx
                .send(Box::new(EngineEvent {
                    kind: EngineEventKind::BufferSizeChange,
                    uint_arg: 0,
                    float_arg: 0.0,
                }))
                .expect("pool sized to capacity");
        }
        Self {
            queue_tx,
            queue_rx,
            pool_tx,
            pool_rx,
        }
    }

    /// Queue an event. Returns false when the pool is exhausted (the event
    /// is dropped rather than blocking the producer).
    pub fn push(&self, kind: EngineEventKind, uint_arg: u32, float_arg: f32) -> bool {
        let Ok(mut slot) = self.pool_rx.try_recv() else {
            tracing::warn!("engine event pool exhausted, dropping {kind:?}");
            return false;
        };
        slot.kind = kind;
        slot.uint_arg = uint_arg;
        slot.float_arg = float_arg;
        self.queue_tx.try_send(slot).is_ok()
    }

    /// Observed by the audio thread to decide whether to skip the cycle.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue_rx.is_empty()
    }

    /// Drain everything, deduplicating identical consecutive events, and
    /// return the slots to the pool.
    pub fn drain_deduped(&self) -> Vec<EngineEvent> {
        let mut events: Vec<EngineEvent> = Vec::new();
        while let Ok(slot) = self.queue_rx.try_recv() {
            if events.last() != Some(&*slot) {
                events.push(*slot);
            }
            let _ = self.pool_tx.try_send(slot);
        }
        events
    }
}
