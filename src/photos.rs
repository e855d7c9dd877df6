//! Photo library on disk
//!
//! Captures are plain image files in the storage directory, named
//! `YYYY-MM-DD_HH-mm-ss.jpg` after the local time they were taken. The name is
//! the primary timestamp source; files that don't follow the convention fall
//! back to their creation time.

use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::utils::has_valid_extension;

/// Extensions recognized as captures (lowercase)
pub const PHOTO_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "heic"];

/// chrono format of the capture filename stem
pub const CAPTURE_STEM_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

static CAPTURE_STEM_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn capture_stem_regex() -> Option<&'static Regex> {
    CAPTURE_STEM_RE
        .get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}$").ok())
        .as_ref()
}

/// Identifier of a capture: its file name inside the storage directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureId(String);

impl CaptureId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub id: CaptureId,
    pub path: PathBuf,
    /// Local wall-clock time of the capture
    pub timestamp: NaiveDateTime,
}

impl CaptureRecord {
    pub fn new(path: impl Into<PathBuf>, timestamp: NaiveDateTime) -> Self {
        let path = path.into();
        let id = CaptureId::new(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        Self {
            id,
            path,
            timestamp,
        }
    }

    /// Build a record from a file, deriving the timestamp from its name or metadata
    pub fn from_path(path: &Path) -> Option<Self> {
        let timestamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_capture_timestamp)
            .or_else(|| file_creation_time(path))?;
        Some(Self::new(path, timestamp))
    }
}

/// File name for a capture taken at `timestamp`
pub fn capture_filename(timestamp: NaiveDateTime) -> String {
    format!("{}.jpg", timestamp.format(CAPTURE_STEM_FORMAT))
}

/// Parse `YYYY-MM-DD_HH-mm-ss` from a file name (extension ignored)
pub fn parse_capture_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    if !capture_stem_regex()?.is_match(stem) {
        return None;
    }
    NaiveDateTime::parse_from_str(stem, CAPTURE_STEM_FORMAT).ok()
}

/// Creation time in local time; modification time where birth time is unsupported
fn file_creation_time(path: &Path) -> Option<NaiveDateTime> {
    let metadata = fs::metadata(path).ok()?;
    let time: SystemTime = metadata.created().or_else(|_| metadata.modified()).ok()?;
    Some(DateTime::<Local>::from(time).naive_local())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Captures stored in a single directory
#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extensions: PHOTO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All captures, newest first. Listing errors degrade to an empty list.
    pub fn list(&self) -> Vec<CaptureRecord> {
        match self.try_list() {
            Ok(records) => records,
            Err(e) => {
                warn!("Error loading photos: {}", e);
                Vec::new()
            }
        }
    }

    fn try_list(&self) -> Result<Vec<CaptureRecord>> {
        let mut records = Vec::new();

        let walker = WalkDir::new(&self.dir)
            .follow_links(false)
            .min_depth(1)
            .max_depth(1);

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.dir).to_path_buf();
                Error::file_io(path, e.into())
            })?;
            let path = entry.path();

            if !entry.file_type().is_file()
                || is_hidden(path)
                || !has_valid_extension(path, &self.extensions)
            {
                continue;
            }

            match CaptureRecord::from_path(path) {
                Some(record) => records.push(record),
                None => debug!(path = %path.display(), "skipping photo without timestamp"),
            }
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Most recent capture
    pub fn latest(&self) -> Option<CaptureRecord> {
        self.list().into_iter().next()
    }

    pub fn find(&self, id: &CaptureId) -> Option<CaptureRecord> {
        self.list().into_iter().find(|r| &r.id == id)
    }

    /// Write `data` as a new capture named after the current local time
    pub fn save(&self, data: &[u8]) -> Result<CaptureRecord> {
        self.save_at(data, Local::now().naive_local())
    }

    pub fn save_at(&self, data: &[u8], timestamp: NaiveDateTime) -> Result<CaptureRecord> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::file_io(&self.dir, e))?;
        let path = self.dir.join(capture_filename(timestamp));
        fs::write(&path, data).map_err(|e| Error::file_io(&path, e))?;
        debug!(path = %path.display(), bytes = data.len(), "saved photo");
        Ok(CaptureRecord::new(path, timestamp))
    }

    /// Remove a capture. Failures are logged and otherwise ignored.
    pub fn delete(&self, record: &CaptureRecord) -> bool {
        match fs::remove_file(&record.path) {
            Ok(()) => {
                debug!(path = %record.path.display(), "deleted photo");
                true
            }
            Err(e) => {
                warn!(path = %record.path.display(), "Error deleting photo: {}", e);
                false
            }
        }
    }
}
