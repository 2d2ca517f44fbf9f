use thiserror::Error;

/// All errors produced by lingualive-core.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Missing credential or invalid engine configuration. Fatal to a start attempt.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Microphone or output device could not be acquired. Fatal to a start attempt.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    /// Remote session failed to open or dropped mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single wire frame could not be decoded. The frame is dropped.
    #[error("malformed audio data: {0}")]
    MalformedAudioData(String),

    /// A teardown step failed. Logged, never escalated past the teardown.
    #[error("cleanup warning: {0}")]
    Cleanup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LiveError>;
