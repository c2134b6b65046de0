//! Error types for ostinato-core.

use thiserror::Error;

/// Error type for engine operations.
///
/// The audio thread never surfaces these: on any internal precondition
/// failure it emits silence for the rest of the cycle and sets a flag for
/// the UI. Everything below travels on control-thread paths only.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unsupported buffer size: {0}")]
    BufferSizeUnsupported(u32),

    #[error("Unsupported sample rate: {0}")]
    SampleRateUnsupported(u32),

    #[error("Processing graph contains a cycle involving node '{0}'")]
    CycleDetected(String),

    #[error("Audio clip {0} not found in pool")]
    ClipNotFound(u32),

    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    #[error("Port {0} not found")]
    PortNotFound(u64),

    #[error("Track {0} not found")]
    TrackNotFound(u64),

    #[error("Region {0} not found")]
    RegionNotFound(u64),

    #[error("Graph mutation attempted during processing; retry after the cycle ends")]
    GraphMutationDuringProcess,

    #[error("Plugin '{0}' failed to instantiate")]
    PluginInstantiationFailed(String),

    #[error("Plugin slot {0} is occupied")]
    SlotOccupied(usize),

    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Audio file error: {0}")]
    AudioFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::AudioFile(err.to_string())
    }
}

impl From<claxon::Error> for Error {
    fn from(err: claxon::Error) -> Self {
        Error::AudioFile(err.to_string())
    }
}
