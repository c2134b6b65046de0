//! Dummy DSP thread.
//!
//! Drives `engine.process` at the configured rate when no audio backend is
//! present — the engine's test harness and headless fallback. The thread
//! also runs the non-realtime event pump between cycles, which a real
//! deployment would do from its control thread.

use crate::engine::AudioEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to a running dummy DSP thread.
pub struct DummyAudioThread {
    engine: Arc<AudioEngine>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DummyAudioThread {
    /// Spawn the thread; it calls `process(block_length)` on a block-rate
    /// schedule until stopped.
    pub fn start(engine: Arc<AudioEngine>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread_engine = engine.clone();

        let handle = std::thread::Builder::new()
            .name("ostinato-dummy-dsp".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    thread_engine.process_events();
                    let block = thread_engine.block_length();
                    thread_engine.process(block);
                    let ns =
                        block as u64 * 1_000_000_000 / thread_engine.sample_rate() as u64;
                    std::thread::sleep(Duration::from_nanos(ns));
                }
            })
            .expect("spawn dummy dsp thread");

        Self {
            engine,
            stop,
            handle: Some(handle),
        }
    }

    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DummyAudioThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_dummy_thread_runs_cycles() {
        let engine = Arc::new(
            AudioEngine::new(EngineConfig {
                sample_rate: 48000,
                block_length: 256,
                workers: 0,
            })
            .unwrap(),
        );
        engine.pre_setup();
        engine.setup().unwrap();
        engine.activate(true);

        let mut thread = DummyAudioThread::start(engine.clone());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while engine.cycle.load(Ordering::Acquire) < 3 {
            assert!(
                std::time::Instant::now() < deadline,
                "dummy thread produced no cycles"
            );
            std::thread::sleep(Duration::from_millis(1));
        }
        thread.stop();
    }
}
