//! Control room: monitor fader plus the listen/dim/mute gain stages.

use crate::cell::ProcCell;
use crate::fader::{Fader, FaderType};
use crate::ids::IdAllocator;
use crate::lockfree::{AtomicFlag, AtomicFloat};
use crate::port::PortRegistry;
use std::sync::Arc;

/// Monitoring section of the engine.
pub struct ControlRoom {
    pub monitor_fader: Arc<ProcCell<Fader>>,
    /// Residual level of muted channels.
    pub mute_amp: AtomicFloat,
    /// Attenuation applied while dimming.
    pub dim_amp: AtomicFloat,
    /// Gain of listened buses mixed into the monitor.
    pub listen_amp: AtomicFloat,
    /// Dim the monitor output unconditionally.
    pub dim_output: AtomicFlag,
}

impl ControlRoom {
    pub fn new(ids: &IdAllocator, registry: &PortRegistry) -> Self {
        let monitor_fader = Arc::new(ProcCell::new(Fader::new(
            ids.alloc(),
            FaderType::Monitor,
            false,
            None,
            registry,
        )));
        Self {
            monitor_fader,
            mute_amp: AtomicFloat::new(0.0),
            dim_amp: AtomicFloat::new(0.1),
            listen_amp: AtomicFloat::new(1.0),
            dim_output: AtomicFlag::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_fader_has_audio_ports() {
        let registry = PortRegistry::new();
        let ids = IdAllocator::new();
        let control_room = ControlRoom::new(&ids, &registry);
        assert!(control_room.monitor_fader.with(|f| f.stereo_in.is_some()));
        assert_eq!(control_room.mute_amp.get(), 0.0);
    }
}
