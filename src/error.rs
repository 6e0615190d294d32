use std::path::PathBuf;

/// Errors returned from the engine's control-plane API.
///
/// Real-time audio callbacks never surface these directly — they only ever
/// set atomic flags (`DeviceLost` is observed by the facade after the fact,
/// not thrown from inside a callback).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("driver open failed: {0}")]
    DriverOpenFailed(String),

    #[error("driver start failed: {0}")]
    DriverStartFailed(String),

    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("source file too small to be a valid WAV: {0}")]
    SourceTooSmall(PathBuf),

    #[error("source has a malformed RIFF/WAVE header: {0}")]
    SourceBadHeader(PathBuf),

    #[error("source has no data chunk: {0}")]
    SourceNoDataChunk(PathBuf),

    #[error("failed to map source into memory: {0}")]
    SourceMapFailed(#[source] std::io::Error),

    #[error("no recording is active")]
    RecordingNotActive,

    #[error("timed out awaiting the first capture buffer")]
    TimeoutAwaitingFirstBuffer,

    #[error("output device lost")]
    DeviceLost,

    #[error("driver burst of {burst} frames exceeds the configured max_callback_frames of {max}")]
    BurstTooLarge { burst: u32, max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
