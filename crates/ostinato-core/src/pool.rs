//! Content-addressed audio clip pool.
//!
//! Clips are immutable once inserted: real-time readers hold `Arc`s while
//! insertion and file I/O stay on non-realtime threads. On disk a clip
//! lives at `<project>/pool/<name>.<ext>` — WAV for 32-bit float material,
//! FLAC for 16/24-bit integer material.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a clip inside the pool.
pub type PoolId = u32;

/// An immutable sample buffer referenced by audio regions.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub pool_id: PoolId,
    pub name: String,
    pub channels: u16,
    pub num_frames: usize,
    pub samplerate: u32,
    /// 16 or 24 for integer material, 32 for float.
    pub bit_depth: u16,
    /// Interleaved samples, `num_frames * channels` long.
    pub frames: Vec<f32>,
    /// Deinterleaved per-channel cache.
    pub ch_frames: Vec<Vec<f32>>,
    /// Transport tempo when the clip entered the project, for musical-mode
    /// stretching.
    pub bpm_at_creation: f32,
    /// FNV-1a over the raw sample bytes; the pool's content address.
    pub file_hash: u64,
}

impl AudioClip {
    /// Build a clip from interleaved samples.
    pub fn from_frames(
        name: impl Into<String>,
        frames: Vec<f32>,
        channels: u16,
        samplerate: u32,
        bit_depth: u16,
        bpm_at_creation: f32,
    ) -> Result<Self> {
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(Error::UnsupportedBitDepth(bit_depth));
        }
        let channels = channels.max(1);
        let num_frames = frames.len() / channels as usize;
        let ch_frames = deinterleave(&frames, channels as usize, num_frames);
        let file_hash = hash_samples(&frames);
        Ok(Self {
            pool_id: 0,
            name: name.into(),
            channels,
            num_frames,
            samplerate,
            bit_depth,
            frames,
            ch_frames,
            bpm_at_creation,
            file_hash,
        })
    }

    /// Load a clip from a WAV or FLAC file.
    pub fn from_file(path: &Path, bpm_at_creation: f32) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("clip")
            .to_string();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "wav" => Self::from_wav(path, name, bpm_at_creation),
            "flac" => Self::from_flac(path, name, bpm_at_creation),
            other => Err(Error::AudioFile(format!("unsupported extension '{other}'"))),
        }
    }

    fn from_wav(path: &Path, name: String, bpm: f32) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let frames: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .into_iter()
                    .map(|s| s as f32 / max_val)
                    .collect()
            }
        };
        let bit_depth = match spec.sample_format {
            hound::SampleFormat::Float => 32,
            hound::SampleFormat::Int => spec.bits_per_sample,
        };
        Self::from_frames(name, frames, spec.channels, spec.sample_rate, bit_depth, bpm)
    }

    fn from_flac(path: &Path, name: String, bpm: f32) -> Result<Self> {
        let mut reader = claxon::FlacReader::open(path)?;
        let info = reader.streaminfo();
        let max_val = (1i64 << (info.bits_per_sample - 1)) as f32;
        let mut frames = Vec::new();
        for sample in reader.samples() {
            frames.push(sample? as f32 / max_val);
        }
        Self::from_frames(
            name,
            frames,
            info.channels as u16,
            info.sample_rate,
            info.bits_per_sample as u16,
            bpm,
        )
    }

    /// File extension for this clip's on-disk representation.
    pub fn extension(&self) -> &'static str {
        if self.bit_depth == 32 {
            "wav"
        } else {
            "flac"
        }
    }

    /// Path of this clip inside a project directory.
    pub fn path_in_project(&self, project_dir: &Path) -> PathBuf {
        project_dir
            .join("pool")
            .join(format!("{}.{}", self.name, self.extension()))
    }

    /// Write the clip under `<project>/pool/`.
    pub fn write_to_project(&self, project_dir: &Path) -> Result<PathBuf> {
        let path = self.path_in_project(project_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.bit_depth == 32 {
            self.write_wav(&path)?;
        } else {
            self.write_flac(&path)?;
        }
        tracing::debug!(clip = %self.name, path = %path.display(), "wrote pool clip");
        Ok(path)
    }

    fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.samplerate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.frames {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    fn write_flac(&self, path: &Path) -> Result<()> {
        use flacenc::bitsink::ByteSink;
        use flacenc::component::BitRepr;
        use flacenc::error::Verify;

        let scale = (1i64 << (self.bit_depth - 1)) as f32 - 1.0;
        let ints: Vec<i32> = self
            .frames
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * scale) as i32)
            .collect();

        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|e| Error::AudioFile(format!("invalid FLAC config: {e:?}")))?;
        let source = flacenc::source::MemSource::from_samples(
            &ints,
            self.channels as usize,
            self.bit_depth as usize,
            self.samplerate as usize,
        );
        let stream = flacenc::encode_with_fixed_block_size(&config, source, 4096)
            .map_err(|e| Error::AudioFile(format!("FLAC encoding failed: {e:?}")))?;

        let mut sink = ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|e| Error::AudioFile(format!("FLAC write failed: {e:?}")))?;
        std::fs::write(path, sink.into_inner())?;
        Ok(())
    }

    /// One channel's samples, clamped to the available channels.
    pub fn channel(&self, ch: usize) -> &[f32] {
        let ch = ch.min(self.ch_frames.len().saturating_sub(1));
        &self.ch_frames[ch]
    }
}

fn deinterleave(frames: &[f32], channels: usize, num_frames: usize) -> Vec<Vec<f32>> {
    let mut out = vec![Vec::with_capacity(num_frames); channels];
    for (i, &sample) in frames.iter().enumerate() {
        out[i % channels].push(sample);
    }
    out
}

/// FNV-1a over the raw sample bytes.
fn hash_samples(frames: &[f32]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &sample in frames {
        for byte in sample.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

/// The project's audio clip store.
pub struct AudioPool {
    clips: RwLock<Vec<Option<Arc<AudioClip>>>>,
}

impl Default for AudioPool {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPool {
    pub fn new() -> Self {
        Self {
            clips: RwLock::new(Vec::new()),
        }
    }

    /// Insert a clip, assigning its `pool_id`. Clips whose hash already
    /// exists in the pool are deduplicated to the existing entry.
    pub fn add(&self, mut clip: AudioClip) -> PoolId {
        let mut clips = self.clips.write();
        if let Some(existing) = clips
            .iter()
            .flatten()
            .find(|c| c.file_hash == clip.file_hash)
        {
            return existing.pool_id;
        }
        let id = clips.len() as PoolId;
        clip.pool_id = id;
        clips.push(Some(Arc::new(clip)));
        id
    }

    pub fn get(&self, pool_id: PoolId) -> Result<Arc<AudioClip>> {
        self.clips
            .read()
            .get(pool_id as usize)
            .and_then(|slot| slot.clone())
            .ok_or(Error::ClipNotFound(pool_id))
    }

    /// Duplicate a clip under a new id (e.g. before a destructive edit).
    /// When `write` is set the copy is flushed to the project directory.
    pub fn duplicate(
        &self,
        pool_id: PoolId,
        write: bool,
        project_dir: Option<&Path>,
    ) -> Result<PoolId> {
        let source = self.get(pool_id)?;
        let mut copy = (*source).clone();
        copy.name = format!("{} (copy)", source.name);
        // the copy is a distinct pool entry even with identical content
        copy.file_hash = copy.file_hash.wrapping_add(1 + pool_id as u64);

        let new_id = {
            let mut clips = self.clips.write();
            let id = clips.len() as PoolId;
            copy.pool_id = id;
            let arc = Arc::new(copy);
            if write {
                if let Some(dir) = project_dir {
                    arc.write_to_project(dir)?;
                }
            }
            clips.push(Some(arc));
            id
        };
        Ok(new_id)
    }

    pub fn remove(&self, pool_id: PoolId) {
        let mut clips = self.clips.write();
        if let Some(slot) = clips.get_mut(pool_id as usize) {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.clips.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_clip(name: &str, value: f32) -> AudioClip {
        let frames: Vec<f32> = (0..64).map(|i| value * (i % 2) as f32).collect();
        AudioClip::from_frames(name, frames, 2, 48000, 32, 120.0).unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let pool = AudioPool::new();
        let id = pool.add(stereo_clip("kick", 0.5));
        let clip = pool.get(id).unwrap();
        assert_eq!(clip.pool_id, id);
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.num_frames, 32);
    }

    #[test]
    fn test_content_addressing_dedupes() {
        let pool = AudioPool::new();
        let a = pool.add(stereo_clip("kick", 0.5));
        let b = pool.add(stereo_clip("kick-again", 0.5));
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);

        let c = pool.add(stereo_clip("snare", 0.9));
        assert_ne!(a, c);
    }

    #[test]
    fn test_missing_clip() {
        let pool = AudioPool::new();
        assert!(matches!(pool.get(7), Err(Error::ClipNotFound(7))));
    }

    #[test]
    fn test_duplicate_gets_new_id() {
        let pool = AudioPool::new();
        let a = pool.add(stereo_clip("kick", 0.5));
        let b = pool.duplicate(a, false, None).unwrap();
        assert_ne!(a, b);

        let dup = pool.get(b).unwrap();
        assert_eq!(dup.num_frames, 32);
        assert!(dup.name.contains("copy"));
    }

    #[test]
    fn test_deinterleave_cache() {
        let frames = vec![1.0, -1.0, 2.0, -2.0];
        let clip = AudioClip::from_frames("x", frames, 2, 48000, 32, 120.0).unwrap();
        assert_eq!(clip.ch_frames[0], vec![1.0, 2.0]);
        assert_eq!(clip.ch_frames[1], vec![-1.0, -2.0]);
    }

    #[test]
    fn test_rejects_unknown_bit_depth() {
        let result = AudioClip::from_frames("x", vec![0.0; 8], 1, 48000, 12, 120.0);
        assert!(matches!(result, Err(Error::UnsupportedBitDepth(12))));
    }

    #[test]
    fn test_wav_roundtrip() {
        let dir = std::env::temp_dir().join("ostinato-pool-test");
        let clip = stereo_clip("roundtrip", 0.25);
        let path = clip.write_to_project(&dir).unwrap();
        assert!(path.ends_with("pool/roundtrip.wav"));

        let loaded = AudioClip::from_file(&path, 120.0).unwrap();
        assert_eq!(loaded.num_frames, clip.num_frames);
        assert_eq!(loaded.channels, clip.channels);
        assert_eq!(loaded.file_hash, clip.file_hash);
        std::fs::remove_dir_all(&dir).ok();
    }
}
