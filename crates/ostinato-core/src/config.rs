//! Engine configuration and fixed constants.

use crate::{Error, Result};

/// Number of slots in each section of a channel's plugin strip.
pub const STRIP_SIZE: usize = 9;

/// Capacity of the cross-thread engine event queue and its object pool.
pub const ENGINE_MAX_EVENTS: usize = 128;

/// Default audio block length, per channel.
pub const BLOCK_LENGTH_DEFAULT: u32 = 4096;

/// Size of MIDI port buffers, in events.
pub const MIDI_BUF_SIZE: usize = 1024;

/// Sample rates the engine accepts from a backend.
pub const SAMPLE_RATES: [u32; 7] = [22050, 32000, 44100, 48000, 88200, 96000, 192000];

/// Block lengths the engine accepts from a backend.
pub const BLOCK_LENGTHS: [u32; 9] = [16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

/// Pulses per quarter note used for tick arithmetic.
pub const TICKS_PER_QUARTER_NOTE: u32 = 960;

/// How long after the last control-port touch the engine keeps recording
/// automation in touch mode, in milliseconds.
pub const AUTOMATION_RECORDING_TOUCH_REL_MS: u64 = 800;

/// Anti-click fade length for the monitor fader, in samples.
pub const FADER_DEFAULT_FADE_FRAMES: u32 = 8192;

/// Anti-click fade length for channel faders, in samples.
pub const FADER_DEFAULT_FADE_FRAMES_SHORT: u32 = 1024;

/// Blocks of history each exposed port's meter ring retains.
pub const METER_RING_BLOCKS: usize = 8;

/// Configuration for the audio engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_length: u32,
    /// Router worker threads; the effective count is
    /// `min(available_parallelism, workers)`. Zero disables the pool and
    /// runs the graph on the audio thread alone.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_length: BLOCK_LENGTH_DEFAULT,
            workers: 0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(Error::SampleRateUnsupported(self.sample_rate));
        }
        if !BLOCK_LENGTHS.contains(&self.block_length) {
            return Err(Error::BufferSizeUnsupported(self.block_length));
        }
        Ok(())
    }

    /// Effective worker thread count for the router pool.
    pub fn effective_workers(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers.min(cores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_length, BLOCK_LENGTH_DEFAULT);
    }

    #[test]
    fn test_rejects_unknown_sample_rate() {
        let config = EngineConfig {
            sample_rate: 44056,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::SampleRateUnsupported(44056))
        ));
    }

    #[test]
    fn test_rejects_unknown_block_length() {
        let config = EngineConfig {
            block_length: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::BufferSizeUnsupported(100))
        ));
    }
}
