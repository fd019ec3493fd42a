//! Error types shared by the audio modules.

use thiserror::Error;

/// Errors that can occur while decoding, generating kernels or driving the device.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No playable audio track found")]
    NoTrack,

    /// A parameter outside the set of supported values, e.g. a kernel with 3 channels.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No audio output device found")]
    NoDevice,

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
