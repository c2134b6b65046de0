//! Engine builder.

use crate::engine::OstinatoEngine;
use ostinato_core::{AudioEngine, DummyAudioThread, EngineConfig, Result};
use std::sync::Arc;

/// Builder for [`OstinatoEngine`].
///
/// # Example
/// ```ignore
/// let engine = OstinatoEngine::builder()
///     .sample_rate(48000)
///     .block_length(512)
///     .workers(2)
///     .build()?;
/// ```
#[derive(Default)]
pub struct OstinatoEngineBuilder {
    sample_rate: Option<u32>,
    block_length: Option<u32>,
    workers: Option<usize>,
    /// Spawn the dummy DSP thread (no backend).
    dummy_dsp_thread: bool,
}

impl OstinatoEngineBuilder {
    /// Sample rate in Hz (default 48000).
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Block length in frames per channel (default 4096).
    pub fn block_length(mut self, block_length: u32) -> Self {
        self.block_length = Some(block_length);
        self
    }

    /// Router worker threads (default 0: graph runs on the audio thread).
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Drive cycles from the built-in dummy DSP thread instead of an
    /// external backend.
    pub fn dummy_dsp_thread(mut self) -> Self {
        self.dummy_dsp_thread = true;
        self
    }

    /// Validate the configuration, set the engine up and activate it.
    pub fn build(self) -> Result<OstinatoEngine> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            sample_rate: self.sample_rate.unwrap_or(defaults.sample_rate),
            block_length: self.block_length.unwrap_or(defaults.block_length),
            workers: self.workers.unwrap_or(defaults.workers),
        };

        let engine = Arc::new(AudioEngine::new(config)?);
        engine.pre_setup();
        engine.setup()?;
        engine.activate(true);

        let dsp_thread = self
            .dummy_dsp_thread
            .then(|| DummyAudioThread::start(engine.clone()));

        Ok(OstinatoEngine::from_parts(engine, dsp_thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_defaults() {
        let engine = OstinatoEngineBuilder::default().build().unwrap();
        assert_eq!(engine.sample_rate(), 48000);
        assert_eq!(engine.block_length(), 4096);
    }

    #[test]
    fn test_invalid_sample_rate_rejected() {
        let result = OstinatoEngineBuilder::default().sample_rate(44055).build();
        assert!(result.is_err());
    }
}
