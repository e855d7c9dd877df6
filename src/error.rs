use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the capture, scheduling and timelapse operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("No photos to generate video")]
    EmptyInput,

    #[error("Failed to decode image {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("Failed to start video encoder: {0}")]
    EncoderInit(String),

    #[error("Video encoder error: {0}")]
    EncoderWrite(String),

    #[error("Captured data is not a readable image: {0}")]
    UnreadableCapture(String),

    #[error("File error on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A timelapse is already being generated")]
    Busy,

    #[error("Timelapse generation was cancelled")]
    Cancelled,

    #[error("Invalid frame rate: {0} (must be greater than 0)")]
    InvalidFrameRate(f64),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Failed to spawn worker thread: {0}")]
    Thread(String),
}

impl Error {
    pub(crate) fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
