use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use console::style;
use prettytable::{format, Cell, Row, Table};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use takemi::capture::{capture_and_save, CaptureDevice, CommandCamera, FileCamera};
use takemi::cli::{non_empty, Args, Command, SettingsAction};
use takemi::logging;
use takemi::photos::{CaptureId, CaptureRecord, PhotoStore};
use takemi::scheduler::{DailyTriggerScheduler, SystemClock, TriggerEvent, TriggerKind, TriggerPolicy};
use takemi::settings::SettingsStore;
use takemi::timelapse::{
    is_ffmpeg_available, FfmpegEncoder, JobEvent, TimelapseAssembler, DEFAULT_OUTPUT_NAME,
};
use takemi::utils::{create_progress_bar, error_println, format_duration, verbose_println, warn_println};
use takemi::JsonMessage;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn open_settings(args: &Args, json_mode: bool) -> Result<Arc<SettingsStore>> {
    let store = match &args.config {
        Some(path) => SettingsStore::open(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SettingsStore::open_default().context("Failed to load settings")?,
    };
    if json_mode {
        debug!("Settings: {}", store.path().display());
    } else {
        verbose_println(
            args.verbose,
            &format!("Settings: {}", store.path().display()),
        );
    }
    Ok(Arc::new(store))
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn camera_from_settings(store: &SettingsStore, mirror: bool) -> Option<CommandCamera> {
    store
        .settings()
        .camera_command
        .map(|command| CommandCamera::new(command).with_mirror(mirror))
}

fn capture_with(device: &mut dyn CaptureDevice, photos: &PhotoStore) -> Result<Option<CaptureRecord>> {
    let record = capture_and_save(device, photos).context("Failed to save photo")?;
    match &record {
        Some(record) => println!(
            "{} Saved {}",
            style("✓").green().bold(),
            style(record.id.as_str()).bold()
        ),
        None => warn_println("No image was captured"),
    }
    Ok(record)
}

/// React to one trigger: capture through the camera command or remind the user
fn handle_trigger(event: &TriggerEvent, store: &SettingsStore, mirror: bool) -> Result<()> {
    let label = match event.kind {
        TriggerKind::Scheduled => "Time for your daily photo!",
        TriggerKind::Manual => "Capture requested",
    };
    println!(
        "{} {}",
        style(event.at.format(TIME_FORMAT).to_string()).dim(),
        style(label).bold().cyan()
    );

    let photos = PhotoStore::new(store.storage_dir());
    match camera_from_settings(store, mirror) {
        Some(mut camera) => {
            capture_with(&mut camera, &photos)?;
        }
        None => println!(
            "  No camera command configured. Take your photo and import it with {}",
            style("takemi capture --from FILE").yellow()
        ),
    }
    Ok(())
}

fn cmd_run(store: Arc<SettingsStore>, interval: u64, mirror: bool) -> Result<()> {
    let policy = store.settings().trigger_policy();
    let scheduler = Arc::new(DailyTriggerScheduler::new(
        store.clone(),
        Arc::new(SystemClock),
        policy,
    ));
    let events = scheduler.subscribe();

    println!(
        "Next capture at {} {}",
        style(store.next_capture_time(now()).format(TIME_FORMAT).to_string()).bold(),
        match policy {
            TriggerPolicy::ExactMinute => String::new(),
            TriggerPolicy::CatchUpWindow(window) => {
                format!("(catch-up window {})", format_duration(window))
            }
        }
    );
    println!("{}", style("Press Ctrl+C to stop").dim());

    let handle = scheduler
        .start(Duration::from_secs(interval.max(1)))
        .context("Failed to start scheduler")?;

    for event in events.iter() {
        if let Err(e) = handle_trigger(&event, &store, mirror) {
            error_println(&format!("{:#}", e));
        }
        scheduler.signal().acknowledge();
        println!(
            "Next capture at {}",
            style(store.next_capture_time(now()).format(TIME_FORMAT).to_string()).bold()
        );
    }

    handle.stop();
    Ok(())
}

fn cmd_trigger(store: Arc<SettingsStore>, mirror: bool) -> Result<()> {
    let policy = store.settings().trigger_policy();
    let scheduler = DailyTriggerScheduler::new(store.clone(), Arc::new(SystemClock), policy);
    let events = scheduler.subscribe();

    scheduler.force_trigger();
    if let Ok(event) = events.try_recv() {
        handle_trigger(&event, &store, mirror)?;
        scheduler.signal().acknowledge();
    }
    Ok(())
}

fn cmd_capture(store: &SettingsStore, from: Option<PathBuf>, mirror: bool) -> Result<()> {
    let photos = PhotoStore::new(store.storage_dir());

    if let Some(path) = from {
        if !path.is_file() {
            anyhow::bail!("Image file does not exist: {}", path.display());
        }
        if capture_with(&mut FileCamera::new(&path), &photos)?.is_none() {
            anyhow::bail!("No image data in {}", path.display());
        }
        return Ok(());
    }

    let mut camera = camera_from_settings(store, mirror).context(
        "No camera command configured. Use `takemi settings set --camera-command CMD` or `--from FILE`",
    )?;
    if capture_with(&mut camera, &photos)?.is_none() {
        anyhow::bail!("Camera did not return an image");
    }
    Ok(())
}

fn cmd_list(store: &SettingsStore, limit: Option<usize>) -> Result<()> {
    let photos = PhotoStore::new(store.storage_dir());
    let records = photos.list();

    if records.is_empty() {
        println!("No photos in {}", style(photos.dir().display()).bold());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.add_row(Row::new(vec![
        Cell::new("#"),
        Cell::new("Id"),
        Cell::new("Taken"),
    ]));

    let shown = limit.unwrap_or(records.len()).min(records.len());
    for (i, record) in records.iter().take(shown).enumerate() {
        table.add_row(Row::new(vec![
            Cell::new(&(i + 1).to_string()),
            Cell::new(record.id.as_str()),
            Cell::new(&record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]));
    }
    table.printstd();

    println!(
        "{} of {} photos in {}",
        style(shown).bold(),
        style(records.len()).bold(),
        photos.dir().display()
    );
    Ok(())
}

fn cmd_delete(store: &SettingsStore, id: String) -> Result<()> {
    let photos = PhotoStore::new(store.storage_dir());
    let id = CaptureId::new(id);
    let record = photos
        .find(&id)
        .with_context(|| format!("No photo with id {}", id))?;

    if !photos.delete(&record) {
        anyhow::bail!("Failed to delete {}", record.path.display());
    }
    println!("{} Deleted {}", style("✓").green().bold(), style(id).bold());
    Ok(())
}

fn cmd_timelapse(
    store: &SettingsStore,
    output: Option<PathBuf>,
    fps: Option<f64>,
    json_progress: bool,
    verbose: bool,
) -> Result<()> {
    let result = run_timelapse(store, output, fps, json_progress, verbose);
    if json_progress {
        if let Err(e) = &result {
            JsonMessage::failed(format!("{:#}", e));
        }
    }
    result
}

fn run_timelapse(
    store: &SettingsStore,
    output: Option<PathBuf>,
    fps: Option<f64>,
    json_progress: bool,
    verbose: bool,
) -> Result<()> {
    let settings = store.settings();
    let photos = PhotoStore::new(settings.storage_dir());
    let frames = photos.list();
    let output = output.unwrap_or_else(|| settings.storage_dir().join(DEFAULT_OUTPUT_NAME));
    let frame_rate = fps.unwrap_or(settings.frame_rate);

    let encoder = match &settings.ffmpeg_path {
        Some(program) => FfmpegEncoder::new(program.clone()),
        None => FfmpegEncoder::default(),
    };
    if !frames.is_empty() && !is_ffmpeg_available(encoder.program()) {
        let message = format!(
            "'{}' does not look runnable; set it with `takemi settings set --ffmpeg PATH`",
            encoder.program()
        );
        // stdout carries only JSON lines in JSON mode
        if json_progress {
            warn!("{}", message);
        } else {
            warn_println(&message);
        }
    }

    if !json_progress {
        println!(
            "Generating timelapse from {} photos at {} fps",
            style(frames.len()).bold(),
            style(frame_rate).bold()
        );
        verbose_println(verbose, &format!("Output: {}", output.display()));
    }

    let assembler = Arc::new(TimelapseAssembler::new(Arc::new(encoder)));
    let job = assembler.spawn(frames.clone(), output, frame_rate)?;

    let pb = (!json_progress).then(|| {
        let pb = create_progress_bar(frames.len() as u64);
        pb.set_message("Encoding...");
        pb
    });

    let mut finished = None;
    for event in job.events().iter() {
        match event {
            JobEvent::Progress(progress) => {
                if json_progress {
                    JsonMessage::progress(&progress);
                } else if let Some(pb) = &pb {
                    pb.set_position(progress.frames_written as u64);
                }
            }
            JobEvent::Finished(result) => {
                finished = Some(result);
                break;
            }
        }
    }
    let report = finished
        .context("Timelapse worker stopped unexpectedly")?
        .context("Failed to generate timelapse")?;

    if let Some(pb) = &pb {
        pb.finish_with_message("✓ Done");
    }

    if json_progress {
        JsonMessage::completed(&report);
    } else {
        println!();
        println!("{}", style("Timelapse complete:").bold().green());
        println!("  Output: {}", style(report.output.display()).bold());
        println!(
            "  Frames: {} ({}x{})",
            style(report.frames_written).bold().cyan(),
            report.width,
            report.height
        );
        println!(
            "  Length: {}",
            style(format_duration(report.video_duration)).bold()
        );
        println!("  Took: {}", style(format_duration(report.elapsed)).dim());
    }
    Ok(())
}

fn cmd_settings_show(store: &SettingsStore) -> Result<()> {
    let settings = store.settings();

    println!("{}", style("Settings:").bold().blue());
    println!("  File: {}", store.path().display());
    println!(
        "  Capture time: {}",
        style(format!(
            "{:02}:{:02}",
            settings.daily_capture_hour, settings.daily_capture_minute
        ))
        .bold()
    );
    println!(
        "  Next capture: {}",
        store.next_capture_time(now()).format(TIME_FORMAT)
    );
    println!(
        "  Last triggered: {}",
        settings
            .last_trigger_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Storage: {}", settings.storage_dir().display());
    println!(
        "  Camera command: {}",
        settings.camera_command.as_deref().unwrap_or("(none)")
    );
    println!(
        "  ffmpeg: {}",
        settings.ffmpeg_path.as_deref().unwrap_or("ffmpeg")
    );
    println!("  Frame rate: {} fps", settings.frame_rate);
    match settings.catch_up_window_secs {
        Some(secs) => println!("  Catch-up window: {}s", secs),
        None => println!("  Catch-up window: off"),
    }
    Ok(())
}

fn cmd_settings_set(store: &SettingsStore, action: SettingsAction) -> Result<()> {
    let SettingsAction::Set {
        time,
        storage,
        camera_command,
        ffmpeg,
        fps,
        catch_up_window,
    } = action
    else {
        return cmd_settings_show(store);
    };

    if let Some((hour, minute)) = time {
        store
            .set_capture_time(hour, minute)
            .context("Failed to set capture time")?;
    }
    if let Some(dir) = storage {
        store
            .set_storage_dir(dir)
            .context("Failed to set storage directory")?;
    }
    if let Some(command) = camera_command {
        store
            .set_camera_command(non_empty(command))
            .context("Failed to set camera command")?;
    }
    if let Some(program) = ffmpeg {
        store
            .set_ffmpeg_path(non_empty(program))
            .context("Failed to set ffmpeg path")?;
    }
    if let Some(fps) = fps {
        store.set_frame_rate(fps).context("Failed to set frame rate")?;
    }
    if let Some(secs) = catch_up_window {
        store
            .set_catch_up_window(Some(secs))
            .context("Failed to set catch-up window")?;
    }

    println!("{} Settings saved", style("✓").green().bold());
    cmd_settings_show(store)
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let json_mode = matches!(
        args.command,
        Command::Timelapse {
            json_progress: true,
            ..
        }
    );
    if !json_mode {
        println!("{}", style("TakeMi").bold().blue());
        println!("{}", style("Daily selfie timelapse").dim());
        println!();
    }

    let store = match open_settings(&args, json_mode) {
        Ok(store) => store,
        Err(e) => {
            if json_mode {
                JsonMessage::failed(format!("{:#}", e));
            }
            return Err(e);
        }
    };

    match args.command {
        Command::Run { interval, mirror } => cmd_run(store, interval, mirror),
        Command::Capture { from, mirror } => cmd_capture(&store, from, mirror),
        Command::Trigger { mirror } => cmd_trigger(store, mirror),
        Command::List { limit } => cmd_list(&store, limit),
        Command::Delete { id } => cmd_delete(&store, id),
        Command::Timelapse {
            output,
            fps,
            json_progress,
        } => cmd_timelapse(&store, output, fps, json_progress, args.verbose),
        Command::Settings { action } => match action {
            None | Some(SettingsAction::Show) => cmd_settings_show(&store),
            Some(action) => cmd_settings_set(&store, action),
        },
    }
}
