//! Video encoder seam
//!
//! The assembler only talks to these traits. A session is opened per output
//! file, receives frames in presentation order and is finished exactly once.

use image::RgbImage;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Terminal status reported when a session is finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderStatus {
    Completed,
    Failed(String),
}

pub trait VideoEncoder: Send + Sync {
    /// Start a session writing `width` x `height` frames at `frame_rate` to `output`.
    /// Errors are `Error::EncoderInit`.
    fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        frame_rate: f64,
    ) -> Result<Box<dyn EncoderSession>>;
}

pub trait EncoderSession: Send {
    /// Block for at most `timeout` until the session can take another frame.
    ///
    /// `Ok(false)` means "not yet"; the caller polls again. An error means the
    /// session can never become ready (e.g. the encoder exited).
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool>;

    /// Submit one frame. `pts` must be strictly increasing across calls.
    fn append(&mut self, frame: &RgbImage, pts: Duration) -> Result<()>;

    /// Flush and close the output
    fn finish(self: Box<Self>) -> EncoderStatus;
}
