//! ffmpeg-backed encoder session
//!
//! Frames are streamed as raw RGB24 into `ffmpeg` over stdin and encoded to
//! H.264/MP4. The pipe is the backpressure: a write blocks while ffmpeg is
//! behind, so readiness only has to confirm the child is still alive.

use image::RgbImage;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::encoder::{EncoderSession, EncoderStatus, VideoEncoder};
use crate::error::{Error, Result};

pub const DEFAULT_FFMPEG: &str = "ffmpeg";

/// Check if ffmpeg is available on the system
pub fn is_ffmpeg_available(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    codec: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            codec: "libx264".to_string(),
        }
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, output: &Path, width: u32, height: u32, frame_rate: f64) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostats"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &format!("{}", frame_rate)])
            .args(["-i", "-"])
            .args(["-an", "-sn"])
            // yuv420p needs even dimensions
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
            .args(["-c:v", &self.codec])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            .arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        frame_rate: f64,
    ) -> Result<Box<dyn EncoderSession>> {
        debug!(
            program = %self.program,
            output = %output.display(),
            "starting ffmpeg {}x{} @ {} fps",
            width,
            height,
            frame_rate
        );

        let mut child = self
            .command(output, width, height, frame_rate)
            .spawn()
            .map_err(|e| Error::EncoderInit(format!("Failed to spawn {}: {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EncoderInit("ffmpeg stdin is not available".to_string()))?;

        // Drain stderr continuously so a chatty ffmpeg never blocks on a full pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        Ok(Box::new(FfmpegSession {
            child,
            stdin: Some(stdin),
            stderr,
            width,
            height,
            last_pts: None,
            finished: false,
        }))
    }
}

struct FfmpegSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    last_pts: Option<Duration>,
    finished: bool,
}

impl FfmpegSession {
    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

impl EncoderSession for FfmpegSession {
    fn wait_ready(&mut self, _timeout: Duration) -> Result<bool> {
        match self.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(status)) => {
                self.stdin.take();
                let stderr = self.collect_stderr();
                Err(Error::EncoderWrite(format!(
                    "ffmpeg exited early ({}): {}",
                    status, stderr
                )))
            }
            Err(e) => Err(Error::EncoderWrite(format!("Failed to poll ffmpeg: {}", e))),
        }
    }

    fn append(&mut self, frame: &RgbImage, pts: Duration) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::EncoderWrite(format!(
                "frame is {}x{}, session expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        if let Some(last) = self.last_pts {
            if pts <= last {
                return Err(Error::EncoderWrite(format!(
                    "presentation time {:?} is not after {:?}",
                    pts, last
                )));
            }
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::EncoderWrite("ffmpeg input is closed".to_string()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| Error::EncoderWrite(format!("Failed to write frame to ffmpeg: {}", e)))?;

        self.last_pts = Some(pts);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> EncoderStatus {
        // Closing stdin signals end of stream
        self.stdin.take();
        let status = self.child.wait();
        self.finished = true;
        let stderr = self.collect_stderr();

        match status {
            Ok(status) if status.success() => EncoderStatus::Completed,
            Ok(status) => EncoderStatus::Failed(format!("ffmpeg exited with {}: {}", status, stderr)),
            Err(e) => EncoderStatus::Failed(format!("Failed to wait for ffmpeg: {}", e)),
        }
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned session: stop ffmpeg instead of letting it finalize a partial file
        self.stdin.take();
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop ffmpeg: {}", e);
        }
        let _ = self.child.wait();
    }
}
