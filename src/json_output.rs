//! JSON output for frontend integration
//!
//! When --json-progress flag is enabled, timelapse progress and the final
//! status are emitted as JSON lines to stdout, suppressing all other output.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::timelapse::{Progress, TimelapseReport};

/// Last progress emission timestamp (milliseconds since epoch)
/// Used for throttling progress updates to ~25 FPS (40ms between updates)
static LAST_PROGRESS_MS: AtomicU64 = AtomicU64::new(0);

const PROGRESS_INTERVAL_MS: u64 = 40;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonMessage {
    /// Frames written so far
    Progress {
        current: usize,
        total: usize,
        progress: f64,
        message: String,
    },
    /// Video written successfully
    Completed {
        output: String,
        frames: usize,
        duration_secs: f64,
        elapsed_secs: f64,
    },
    /// Generation failed, no output was kept
    Failed { error: String },
}

impl JsonMessage {
    /// Emit JSON message to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Create and emit progress message (throttled to ~25 FPS)
    ///
    /// The final progress (current == total) is always emitted to ensure 100% completion.
    pub fn progress(progress: &Progress) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let last_ms = LAST_PROGRESS_MS.load(Ordering::Relaxed);
        let is_final = progress.frames_written == progress.total_frames;

        if now_ms.saturating_sub(last_ms) >= PROGRESS_INTERVAL_MS || is_final {
            LAST_PROGRESS_MS.store(now_ms, Ordering::Relaxed);
            Self::from_progress(progress).emit();
        }
    }

    pub fn completed(report: &TimelapseReport) {
        Self::from_report(report).emit();
    }

    pub fn failed(error: impl Into<String>) {
        Self::Failed {
            error: error.into(),
        }
        .emit();
    }

    fn from_progress(progress: &Progress) -> Self {
        Self::Progress {
            current: progress.frames_written,
            total: progress.total_frames,
            progress: progress.fraction,
            message: format!(
                "Encoded frame {}/{}",
                progress.frames_written, progress.total_frames
            ),
        }
    }

    fn from_report(report: &TimelapseReport) -> Self {
        Self::Completed {
            output: display_path(&report.output),
            frames: report.frames_written,
            duration_secs: report.video_duration.as_secs_f64(),
            elapsed_secs: report.elapsed.as_secs_f64(),
        }
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
