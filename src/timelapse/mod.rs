//! Timelapse assembly
//!
//! Turns an ordered set of captures into one video: frames are decoded one at
//! a time, handed to the encoder session only when it reports readiness, and
//! stamped at `index / frame_rate`. Any failure aborts the whole job; partial
//! output is removed.

pub mod encoder;
pub mod ffmpeg;
pub mod frame;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::photos::CaptureRecord;

pub use encoder::{EncoderSession, EncoderStatus, VideoEncoder};
pub use ffmpeg::{is_ffmpeg_available, FfmpegEncoder};

/// Suggested file name for generated videos
pub const DEFAULT_OUTPUT_NAME: &str = "TakeMi_Timelapse.mp4";

/// Upper bound of one readiness wait before cancellation is re-checked
pub const READY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// State of one `generate` call
#[derive(Debug)]
pub struct EncodingJob {
    pub total_frames: usize,
    pub frames_written: usize,
    pub status: JobStatus,
    started: Instant,
}

impl EncodingJob {
    pub fn new(total_frames: usize) -> Self {
        Self {
            total_frames,
            frames_written: 0,
            status: JobStatus::Idle,
            started: Instant::now(),
        }
    }

    /// Get current progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_frames == 0 {
            1.0
        } else {
            self.frames_written as f64 / self.total_frames as f64
        }
    }

    /// Get estimated time remaining
    pub fn eta(&self) -> Option<Duration> {
        if self.frames_written == 0 {
            return None;
        }

        let remaining = self.total_frames.saturating_sub(self.frames_written);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }

        let time_per_frame = self.started.elapsed() / self.frames_written as u32;
        Some(time_per_frame * remaining as u32)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn snapshot(&self) -> Progress {
        Progress {
            frames_written: self.frames_written,
            total_frames: self.total_frames,
            fraction: self.progress(),
            eta: self.eta(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub frames_written: usize,
    pub total_frames: usize,
    /// `frames_written / total_frames`
    pub fraction: f64,
    pub eta: Option<Duration>,
}

/// Cooperative cancellation flag, checked before every frame and between readiness waits
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelapseReport {
    pub output: PathBuf,
    pub frames_written: usize,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Playback length of the video
    pub video_duration: Duration,
    /// Wall time spent generating
    pub elapsed: Duration,
}

/// Messages delivered from a background job, in order: progress updates, then one `Finished`
#[derive(Debug)]
pub enum JobEvent {
    Progress(Progress),
    Finished(Result<TimelapseReport>),
}

/// Presentation timestamp of frame `index`
///
/// Fails with `Error::InvalidFrameRate` when the timestamp does not fit a `Duration`.
pub fn presentation_time(index: usize, frame_rate: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(index as f64 / frame_rate)
        .map_err(|_| Error::InvalidFrameRate(frame_rate))
}

fn try_start(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Clears the in-progress flag on every exit path
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        try_start(flag).then(|| Self(flag))
    }

    /// Take over a flag already set with `try_start`
    fn adopt(flag: &'a AtomicBool) -> Self {
        Self(flag)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct TimelapseAssembler {
    encoder: Arc<dyn VideoEncoder>,
    running: AtomicBool,
    status: Mutex<JobStatus>,
    last_error: Mutex<Option<String>>,
}

impl TimelapseAssembler {
    pub fn new(encoder: Arc<dyn VideoEncoder>) -> Self {
        Self {
            encoder,
            running: AtomicBool::new(false),
            status: Mutex::new(JobStatus::Idle),
            last_error: Mutex::new(None),
        }
    }

    /// True while a job is running
    pub fn is_generating(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Status of the current job, or of the last one once it has ended
    pub fn status(&self) -> JobStatus {
        *lock(&self.status)
    }

    /// Human-readable message of the last failed job, cleared when a new job starts
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Generate a video on the calling thread.
    ///
    /// Fails with `Error::Busy` if another job of this assembler is running.
    pub fn generate<F>(
        &self,
        frames: &[CaptureRecord],
        output: &Path,
        frame_rate: f64,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<TimelapseReport>
    where
        F: FnMut(Progress),
    {
        let _guard = RunningGuard::acquire(&self.running).ok_or(Error::Busy)?;
        self.run_job(frames, output, frame_rate, cancel, on_progress)
    }

    /// Generate on a dedicated worker thread, delivering events over a channel
    pub fn spawn(
        self: &Arc<Self>,
        frames: Vec<CaptureRecord>,
        output: PathBuf,
        frame_rate: f64,
    ) -> Result<JobHandle> {
        // Claimed here so a second spawn is rejected before its thread exists
        if !try_start(&self.running) {
            return Err(Error::Busy);
        }

        let (tx, rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let assembler = Arc::clone(self);
        let worker_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name("takemi-timelapse".to_string())
            .spawn(move || {
                let result = {
                    let _guard = RunningGuard::adopt(&assembler.running);
                    assembler.run_job(&frames, &output, frame_rate, &worker_cancel, |p| {
                        let _ = tx.send(JobEvent::Progress(p));
                    })
                };
                let _ = tx.send(JobEvent::Finished(result));
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                Error::Thread(e.to_string())
            })?;

        Ok(JobHandle {
            events: rx,
            cancel,
            thread: Some(thread),
        })
    }

    fn run_job<F>(
        &self,
        frames: &[CaptureRecord],
        output: &Path,
        frame_rate: f64,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<TimelapseReport>
    where
        F: FnMut(Progress),
    {
        *lock(&self.last_error) = None;
        *lock(&self.status) = JobStatus::Running;

        let result = self.assemble(frames, output, frame_rate, cancel, on_progress);
        match &result {
            Ok(report) => {
                info!(
                    output = %report.output.display(),
                    "Timelapse completed: {} frames in {:?}",
                    report.frames_written,
                    report.elapsed
                );
                *lock(&self.status) = JobStatus::Completed;
            }
            Err(e) => {
                warn!(output = %output.display(), "Timelapse failed: {}", e);
                *lock(&self.last_error) = Some(e.to_string());
                *lock(&self.status) = JobStatus::Failed;
            }
        }
        result
    }

    fn assemble<F>(
        &self,
        frames: &[CaptureRecord],
        output: &Path,
        frame_rate: f64,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<TimelapseReport>
    where
        F: FnMut(Progress),
    {
        if frames.is_empty() {
            return Err(Error::EmptyInput);
        }
        if !(frame_rate > 0.0) || !frame_rate.is_finite() {
            return Err(Error::InvalidFrameRate(frame_rate));
        }
        // The last timestamp is the largest, so this bounds every frame
        let video_duration = presentation_time(frames.len(), frame_rate)?;

        // Oldest first, whatever order the caller used
        let mut ordered: Vec<&CaptureRecord> = frames.iter().collect();
        ordered.sort_by_key(|record| record.timestamp);

        let (width, height) = frame::frame_dimensions(&ordered[0].path)?;
        remove_existing(output)?;

        let session = self.encoder.open(output, width, height, frame_rate)?;
        debug!("encoder session open: {}x{} @ {} fps", width, height, frame_rate);

        let mut job = EncodingJob::new(ordered.len());
        let encoded = encode_frames(
            session,
            &ordered,
            width,
            height,
            frame_rate,
            cancel,
            &mut job,
            on_progress,
        );
        match encoded {
            Ok(()) => Ok(TimelapseReport {
                output: output.to_path_buf(),
                frames_written: job.frames_written,
                width,
                height,
                frame_rate,
                video_duration,
                elapsed: job.elapsed(),
            }),
            Err(e) => {
                discard_partial_output(output);
                Err(e)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Feed every frame to `session`, then finish it. The session is dropped on error.
///
/// `job.status` ends as `Completed` or `Failed` on every exit path.
#[allow(clippy::too_many_arguments)]
fn encode_frames<F>(
    session: Box<dyn EncoderSession>,
    ordered: &[&CaptureRecord],
    width: u32,
    height: u32,
    frame_rate: f64,
    cancel: &CancellationToken,
    job: &mut EncodingJob,
    on_progress: F,
) -> Result<()>
where
    F: FnMut(Progress),
{
    job.status = JobStatus::Running;
    let result = submit_frames(
        session,
        ordered,
        width,
        height,
        frame_rate,
        cancel,
        job,
        on_progress,
    );
    job.status = if result.is_ok() {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    result
}

#[allow(clippy::too_many_arguments)]
fn submit_frames<F>(
    mut session: Box<dyn EncoderSession>,
    ordered: &[&CaptureRecord],
    width: u32,
    height: u32,
    frame_rate: f64,
    cancel: &CancellationToken,
    job: &mut EncodingJob,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(Progress),
{
    for (index, record) in ordered.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let frame = frame::load_frame(&record.path, width, height)?;

        while !session.wait_ready(READY_POLL)? {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        session.append(&frame, presentation_time(index, frame_rate)?)?;
        job.frames_written += 1;
        on_progress(job.snapshot());
    }

    match session.finish() {
        EncoderStatus::Completed => Ok(()),
        EncoderStatus::Failed(message) => Err(Error::EncoderWrite(message)),
    }
}

fn remove_existing(output: &Path) -> Result<()> {
    match fs::remove_file(output) {
        Ok(()) => {
            debug!(output = %output.display(), "removed existing output");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::file_io(output, e)),
    }
}

fn discard_partial_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => debug!(output = %output.display(), "removed partial output"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(output = %output.display(), "Failed to remove partial output: {}", e),
    }
}

/// Handle to a job started with [`TimelapseAssembler::spawn`]
pub struct JobHandle {
    events: Receiver<JobEvent>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Block until the job finishes, discarding remaining progress events
    pub fn wait(mut self) -> Result<TimelapseReport> {
        let result = loop {
            match self.events.recv() {
                Ok(JobEvent::Progress(_)) => continue,
                Ok(JobEvent::Finished(result)) => break result,
                Err(_) => break Err(Error::Thread("timelapse worker exited without a result".to_string())),
            }
        };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}
