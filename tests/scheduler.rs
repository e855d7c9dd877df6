use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use takemi::scheduler::{TriggerKind, POLL_INTERVAL};
use takemi::{Clock, DailyTriggerScheduler, ScheduleStore, SettingsStore, TriggerPolicy};

struct ManualClock(Mutex<NaiveDateTime>);

impl ManualClock {
    fn at(time: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self(Mutex::new(time)))
    }

    fn set(&self, time: NaiveDateTime) {
        *self.0.lock().unwrap() = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn settings_in(dir: &Path) -> Arc<SettingsStore> {
    let path = dir.join("settings.json");
    if !path.exists() {
        let seed = serde_json::json!({ "photoStoragePath": dir.join("photos") });
        fs::write(&path, seed.to_string()).unwrap();
    }
    Arc::new(SettingsStore::open(path).unwrap())
}

#[test]
fn test_fires_once_per_day_across_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let store = settings_in(tmp.path());
    store.set_capture_time(9, 0).unwrap();

    let clock = ManualClock::at(at(5, 9, 0, 15));
    let scheduler = DailyTriggerScheduler::new(store.clone(), clock.clone(), TriggerPolicy::default());
    let events = scheduler.subscribe();

    assert!(scheduler.check());
    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, TriggerKind::Scheduled);
    assert_eq!(event.at, at(5, 9, 0, 15));

    // Process restart inside the same minute
    drop(scheduler);
    let reopened = settings_in(tmp.path());
    assert_eq!(
        reopened.trigger_state().last_fired,
        NaiveDate::from_ymd_opt(2024, 3, 5)
    );
    clock.set(at(5, 9, 0, 30));
    let scheduler = DailyTriggerScheduler::new(reopened.clone(), clock.clone(), TriggerPolicy::default());
    assert!(!scheduler.check());

    // Next day fires again
    clock.set(at(6, 9, 0, 5));
    assert!(scheduler.check());
}

#[test]
fn test_schedule_change_takes_effect_on_next_tick() {
    let tmp = tempfile::tempdir().unwrap();
    let store = settings_in(tmp.path());
    store.set_capture_time(9, 0).unwrap();

    let clock = ManualClock::at(at(5, 10, 30, 0));
    let scheduler = DailyTriggerScheduler::new(store.clone(), clock.clone(), TriggerPolicy::default());
    assert!(!scheduler.check());

    store.set_capture_time(10, 30).unwrap();
    assert!(scheduler.check());
}

#[test]
fn test_catch_up_window_from_settings() {
    let tmp = tempfile::tempdir().unwrap();
    let store = settings_in(tmp.path());
    store.set_capture_time(9, 0).unwrap();
    store.set_catch_up_window(Some(300)).unwrap();
    let policy = store.settings().trigger_policy();
    assert_eq!(policy, TriggerPolicy::CatchUpWindow(Duration::from_secs(300)));

    let clock = ManualClock::at(at(5, 9, 5, 0));
    let scheduler = DailyTriggerScheduler::new(store.clone(), clock.clone(), policy);
    assert!(!scheduler.check());

    clock.set(at(6, 9, 3, 0));
    assert!(scheduler.check());
}

#[test]
fn test_manual_trigger_keeps_daily_trigger() {
    let tmp = tempfile::tempdir().unwrap();
    let store = settings_in(tmp.path());
    store.set_capture_time(9, 0).unwrap();

    let clock = ManualClock::at(at(5, 8, 0, 0));
    let scheduler = DailyTriggerScheduler::new(store.clone(), clock.clone(), TriggerPolicy::default());
    let events = scheduler.subscribe();

    scheduler.force_trigger();
    assert_eq!(events.try_recv().unwrap().kind, TriggerKind::Manual);
    assert!(scheduler.signal().is_raised());
    scheduler.signal().acknowledge();
    assert!(!scheduler.signal().is_raised());
    assert_eq!(store.trigger_state().last_fired, None);

    clock.set(at(5, 9, 0, 0));
    assert!(scheduler.check());
}

#[test]
fn test_background_polling_delivers_event() {
    let tmp = tempfile::tempdir().unwrap();
    let store = settings_in(tmp.path());
    store.set_capture_time(9, 0).unwrap();

    let clock = ManualClock::at(at(5, 9, 0, 0));
    let scheduler = Arc::new(DailyTriggerScheduler::new(
        store.clone(),
        clock,
        TriggerPolicy::default(),
    ));
    let events = scheduler.subscribe();

    let handle = scheduler.start(POLL_INTERVAL).unwrap();
    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.stop();

    assert_eq!(event.kind, TriggerKind::Scheduled);
    assert!(events.try_recv().is_err());
}
