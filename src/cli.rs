use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "takemi",
    version,
    about = "Daily selfie prompter and timelapse maker",
    long_about = "
TakeMi - one photo a day, one video at the end

Once a day at the configured time TakeMi captures a still through your camera
command (or reminds you to take one). The photos collected in the storage
directory can be assembled into a timelapse video at any time.

Example Usage:
  # Capture at 09:30 every day using imagesnap
  takemi settings set --time 09:30 --camera-command \"imagesnap -q -\"

  # Keep running and capture when the time comes
  takemi run

  # Capture right now, or import a photo taken elsewhere
  takemi capture
  takemi capture --from ~/Desktop/selfie.jpg

  # Browse and prune the collection
  takemi list --limit 10
  takemi delete 2024-03-05_14-30-00.jpg

  # Build the video (defaults to <storage>/TakeMi_Timelapse.mp4 at 2 fps)
  takemi timelapse
  takemi timelapse -o ~/Movies/year.mp4 --fps 4

  # Machine-readable progress for frontends
  takemi timelapse --json-progress"
)]
pub struct Args {
    /// Settings file (defaults to <config dir>/takemi/settings.json)
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daily scheduler until interrupted
    Run {
        /// Seconds between schedule checks
        #[arg(long = "interval", default_value_t = 60, value_name = "SECS")]
        interval: u64,

        /// Flip captures horizontally (re-encodes them as JPEG)
        #[arg(long = "mirror")]
        mirror: bool,
    },

    /// Capture a photo now
    Capture {
        /// Import an existing image instead of using the camera command
        #[arg(long = "from", value_name = "FILE")]
        from: Option<PathBuf>,

        /// Flip the camera capture horizontally (re-encodes it as JPEG). Imports are kept as-is
        #[arg(long = "mirror")]
        mirror: bool,
    },

    /// Fire the capture prompt immediately, without touching today's trigger state
    Trigger {
        /// Flip the capture horizontally (re-encodes it as JPEG)
        #[arg(long = "mirror")]
        mirror: bool,
    },

    /// List stored photos, newest first
    List {
        /// Show at most this many photos
        #[arg(short = 'n', long = "limit", value_name = "N")]
        limit: Option<usize>,
    },

    /// Delete a stored photo by its file name
    Delete {
        /// Photo id as shown by `list`
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Assemble all stored photos into a video, oldest first
    Timelapse {
        /// Output video file
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,

        /// Frames per second (defaults to the configured frame rate)
        #[arg(long = "fps", value_name = "FPS")]
        fps: Option<f64>,

        /// Output progress as JSON lines (for frontend integration)
        #[arg(long = "json-progress")]
        json_progress: bool,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print the current settings
    Show,

    /// Change one or more settings
    Set {
        /// Daily capture time (format: HH:MM, 24h)
        #[arg(long = "time", value_name = "HH:MM", value_parser = parse_capture_time)]
        time: Option<(u32, u32)>,

        /// Directory where photos are stored
        #[arg(long = "storage", value_name = "DIR")]
        storage: Option<PathBuf>,

        /// Shell command writing one image to stdout (empty string clears it)
        #[arg(long = "camera-command", value_name = "CMD")]
        camera_command: Option<String>,

        /// ffmpeg executable (empty string restores the default)
        #[arg(long = "ffmpeg", value_name = "PATH")]
        ffmpeg: Option<String>,

        /// Default timelapse frame rate
        #[arg(long = "fps", value_name = "FPS")]
        fps: Option<f64>,

        /// Also fire when started up to this many seconds after the target (0 disables)
        #[arg(long = "catch-up-window", value_name = "SECS")]
        catch_up_window: Option<u64>,
    },
}

/// Parse a `HH:MM` capture time
pub fn parse_capture_time(value: &str) -> Result<(u32, u32), String> {
    let (hour, minute) = value
        .split_once(':')
        .ok_or_else(|| format!("Invalid time format '{}'. Use HH:MM (e.g., 09:30)", value))?;

    let hour = hour
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid hour: '{}'", hour))?;
    let minute = minute
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid minute: '{}'", minute))?;

    if hour > 23 || minute > 59 {
        return Err("Hour must be 0-23 and minute 0-59".to_string());
    }

    Ok((hour, minute))
}

/// Empty strings from the command line clear optional settings
pub fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
