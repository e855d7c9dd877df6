//! Still capture devices
//!
//! The camera itself is an external collaborator: a device hands back one
//! encoded still per call, or `None` when nothing could be captured.

use image::{DynamicImage, ImageFormat};
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::photos::{CaptureRecord, PhotoStore};

pub trait CaptureDevice {
    /// Capture one still image as encoded bytes
    fn capture_still(&mut self) -> Option<Vec<u8>>;
}

/// Runs a shell command that writes one image to stdout (e.g. `imagesnap -`)
#[derive(Debug, Clone)]
pub struct CommandCamera {
    command: String,
    mirror: bool,
}

impl CommandCamera {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mirror: false,
        }
    }

    /// Flip captures horizontally and re-encode them as JPEG. Off by default.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    fn shell(&self) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", &self.command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", &self.command]);
            cmd
        }
    }
}

impl CaptureDevice for CommandCamera {
    fn capture_still(&mut self) -> Option<Vec<u8>> {
        debug!(command = %self.command, "capturing still");

        let output = match self
            .shell()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Error running camera command: {}", e);
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                "Error capturing photo ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        if output.stdout.is_empty() {
            warn!("Camera command produced no image data");
            return None;
        }

        if self.mirror {
            Some(mirror_or_original(output.stdout))
        } else {
            Some(output.stdout)
        }
    }
}

/// Reads an existing image file, used to import photos taken elsewhere
#[derive(Debug, Clone)]
pub struct FileCamera {
    path: PathBuf,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CaptureDevice for FileCamera {
    fn capture_still(&mut self) -> Option<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(data) if !data.is_empty() => Some(data),
            Ok(_) => {
                warn!(path = %self.path.display(), "image file is empty");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Error reading image: {}", e);
                None
            }
        }
    }
}

/// Flip a still horizontally and re-encode it as JPEG
pub fn mirror_jpeg(data: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(data).ok()?;
    let flipped = DynamicImage::ImageRgb8(img.fliph().to_rgb8());

    let mut output = Cursor::new(Vec::new());
    flipped.write_to(&mut output, ImageFormat::Jpeg).ok()?;
    Some(output.into_inner())
}

/// Mirrored JPEG, or the untouched bytes if they can't be decoded
pub fn mirror_or_original(data: Vec<u8>) -> Vec<u8> {
    match mirror_jpeg(&data) {
        Some(mirrored) => mirrored,
        None => {
            debug!("could not mirror capture, keeping original bytes");
            data
        }
    }
}

/// Capture a still and store it. `Ok(None)` when the device returned nothing.
///
/// Bytes that do not decode as an image are rejected before anything is written,
/// since a stored capture has to be usable as a timelapse frame.
pub fn capture_and_save(
    device: &mut dyn CaptureDevice,
    store: &PhotoStore,
) -> Result<Option<CaptureRecord>> {
    let Some(data) = device.capture_still() else {
        return Ok(None);
    };
    if let Err(e) = image::load_from_memory(&data) {
        warn!("Rejecting capture of {} bytes: {}", data.len(), e);
        return Err(Error::UnreadableCapture(e.to_string()));
    }
    store.save(&data).map(Some)
}
