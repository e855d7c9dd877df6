// Library exports for reuse by the CLI and other frontends
pub mod capture;
pub mod cli;
pub mod error;
pub mod json_output;
pub mod logging;
pub mod photos;
pub mod scheduler;
pub mod settings;
pub mod timelapse;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use json_output::JsonMessage;
pub use photos::{CaptureId, CaptureRecord, PhotoStore};
pub use scheduler::{
    Clock, DailyTriggerScheduler, ScheduleConfig, ScheduleStore, TriggerPolicy, TriggerState,
};
pub use settings::{Settings, SettingsStore};
pub use timelapse::{
    CancellationToken, EncoderSession, EncoderStatus, Progress, TimelapseAssembler,
    TimelapseReport, VideoEncoder,
};
