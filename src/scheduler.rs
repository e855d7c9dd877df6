//! Daily capture trigger
//!
//! The scheduler polls the wall clock at a fixed cadence and raises the
//! "show capture UI" signal when the current time matches the configured
//! daily target. A trigger fires at most once per calendar day: the decision
//! and the `last_fired` update happen under the same lock, so a second tick
//! inside the target minute sees the updated state and stays quiet.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::settings::{DEFAULT_CAPTURE_HOUR, DEFAULT_CAPTURE_MINUTE};

/// Cadence of the recurring time check
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Target hour/minute of the daily capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    hour: u32,
    minute: u32,
}

impl ScheduleConfig {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 {
            return Err(Error::InvalidSchedule(format!(
                "hour must be between 0 and 23, got {}",
                hour
            )));
        }
        if minute > 59 {
            return Err(Error::InvalidSchedule(format!(
                "minute must be between 0 and 59, got {}",
                minute
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn time(&self) -> NaiveTime {
        // Ranges are checked in `new`
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: DEFAULT_CAPTURE_HOUR,
            minute: DEFAULT_CAPTURE_MINUTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerState {
    /// Calendar day of the last scheduled firing, `None` if it never fired
    pub last_fired: Option<NaiveDate>,
}

impl TriggerState {
    pub fn never() -> Self {
        Self { last_fired: None }
    }

    pub fn fired_on(date: NaiveDate) -> Self {
        Self {
            last_fired: Some(date),
        }
    }

    pub fn has_fired_on(&self, date: NaiveDate) -> bool {
        self.last_fired == Some(date)
    }
}

/// How a poll tick is matched against the target time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerPolicy {
    /// Fire only when hour and minute match exactly; a delayed tick skips the day
    #[default]
    ExactMinute,
    /// Fire anywhere in `[target, target + window)` on the same day
    CatchUpWindow(Duration),
}

/// Exact-minute decision: fires iff hour/minute match and it has not fired today
pub fn check_now(
    now: NaiveDateTime,
    config: &ScheduleConfig,
    state: &TriggerState,
) -> (bool, TriggerState) {
    check_with_policy(now, config, state, TriggerPolicy::ExactMinute)
}

pub fn check_with_policy(
    now: NaiveDateTime,
    config: &ScheduleConfig,
    state: &TriggerState,
    policy: TriggerPolicy,
) -> (bool, TriggerState) {
    let today = now.date();
    if state.has_fired_on(today) {
        return (false, *state);
    }

    let matches = match policy {
        TriggerPolicy::ExactMinute => {
            now.hour() == config.hour() && now.minute() == config.minute()
        }
        TriggerPolicy::CatchUpWindow(window) => {
            let target = today.and_time(config.time());
            let elapsed_ms = (now - target).num_milliseconds();
            elapsed_ms >= 0 && (elapsed_ms as u128) < window.as_millis()
        }
    };

    if matches {
        (true, TriggerState::fired_on(today))
    } else {
        (false, *state)
    }
}

/// Source of the current time, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Where the scheduler reads its target and persists its trigger state
pub trait ScheduleStore: Send + Sync {
    /// Read on every poll tick so changes apply without a restart
    fn schedule(&self) -> ScheduleConfig;
    fn trigger_state(&self) -> TriggerState;
    fn record_trigger(&self, state: &TriggerState);
}

/// Non-persistent store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    schedule: Mutex<ScheduleConfig>,
    state: Mutex<TriggerState>,
}

impl MemoryScheduleStore {
    pub fn new(schedule: ScheduleConfig, state: TriggerState) -> Self {
        Self {
            schedule: Mutex::new(schedule),
            state: Mutex::new(state),
        }
    }

    pub fn set_schedule(&self, schedule: ScheduleConfig) {
        *lock(&self.schedule) = schedule;
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn schedule(&self) -> ScheduleConfig {
        *lock(&self.schedule)
    }

    fn trigger_state(&self) -> TriggerState {
        *lock(&self.state)
    }

    fn record_trigger(&self, state: &TriggerState) {
        *lock(&self.state) = *state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub at: NaiveDateTime,
}

/// "Show capture UI" flag plus fan-out to every subscribed observer
#[derive(Debug, Default)]
pub struct TriggerSignal {
    raised: AtomicBool,
    subscribers: Mutex<Vec<Sender<TriggerEvent>>>,
}

impl TriggerSignal {
    pub fn subscribe(&self) -> Receiver<TriggerEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clear the flag once the capture UI has been dismissed
    pub fn acknowledge(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    fn raise(&self, event: TriggerEvent) {
        self.raised.store(true, Ordering::SeqCst);
        lock(&self.subscribers).retain(|tx| tx.send(event).is_ok());
    }
}

pub struct DailyTriggerScheduler {
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
    policy: TriggerPolicy,
    state: Mutex<TriggerState>,
    signal: TriggerSignal,
}

impl DailyTriggerScheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, clock: Arc<dyn Clock>, policy: TriggerPolicy) -> Self {
        let state = store.trigger_state();
        Self {
            store,
            clock,
            policy,
            state: Mutex::new(state),
            signal: TriggerSignal::default(),
        }
    }

    pub fn signal(&self) -> &TriggerSignal {
        &self.signal
    }

    pub fn subscribe(&self) -> Receiver<TriggerEvent> {
        self.signal.subscribe()
    }

    pub fn state(&self) -> TriggerState {
        *lock(&self.state)
    }

    pub fn policy(&self) -> TriggerPolicy {
        self.policy
    }

    /// Run one poll tick. Returns true if the trigger fired.
    pub fn check(&self) -> bool {
        let now = self.clock.now();
        let config = self.store.schedule();

        let fired = {
            let mut state = lock(&self.state);
            let (fire, new_state) = check_with_policy(now, &config, &state, self.policy);
            if fire {
                *state = new_state;
                self.store.record_trigger(&new_state);
            }
            fire
        };

        if fired {
            info!(
                "Triggering capture window ({:02}:{:02})",
                config.hour(),
                config.minute()
            );
            self.signal.raise(TriggerEvent {
                kind: TriggerKind::Scheduled,
                at: now,
            });
        } else {
            debug!(now = %now, "no trigger");
        }
        fired
    }

    /// Raise the signal unconditionally; `last_fired` is left untouched
    pub fn force_trigger(&self) {
        info!("Manual capture trigger");
        self.signal.raise(TriggerEvent {
            kind: TriggerKind::Manual,
            at: self.clock.now(),
        });
    }

    /// Start polling on a dedicated thread, checking once immediately
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let scheduler = Arc::clone(self);

        let thread = thread::Builder::new()
            .name("takemi-scheduler".to_string())
            .spawn(move || loop {
                scheduler.check();
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| Error::Thread(e.to_string()))?;

        info!("Scheduler started ({}s poll)", interval.as_secs());
        Ok(SchedulerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Stops the polling thread when stopped or dropped
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, s).unwrap()
    }

    struct FixedClock(Mutex<NaiveDateTime>);

    impl FixedClock {
        fn new(now: NaiveDateTime) -> Self {
            Self(Mutex::new(now))
        }

        fn set(&self, now: NaiveDateTime) {
            *self.0.lock().unwrap() = now;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn test_schedule_config_ranges() {
        assert!(ScheduleConfig::new(0, 0).is_ok());
        assert!(ScheduleConfig::new(23, 59).is_ok());
        assert!(ScheduleConfig::new(24, 0).is_err());
        assert!(ScheduleConfig::new(12, 60).is_err());
        assert_eq!(ScheduleConfig::default(), ScheduleConfig::new(14, 0).unwrap());
    }

    #[test]
    fn test_fires_when_last_fired_yesterday() {
        let config = ScheduleConfig::new(9, 0).unwrap();
        let state = TriggerState::fired_on(day(4));

        let (fire, new_state) = check_now(at(5, 9, 0, 15), &config, &state);
        assert!(fire);
        assert_eq!(new_state.last_fired, Some(day(5)));
    }

    #[test]
    fn test_no_fire_when_already_fired_today() {
        let config = ScheduleConfig::new(9, 0).unwrap();
        let state = TriggerState::fired_on(day(5));

        let (fire, new_state) = check_now(at(5, 9, 0, 30), &config, &state);
        assert!(!fire);
        assert_eq!(new_state, state);
    }

    #[test]
    fn test_fires_once_within_matching_minute() {
        let config = ScheduleConfig::new(9, 0).unwrap();
        let state = TriggerState::never();

        let (first, state) = check_now(at(5, 9, 0, 0), &config, &state);
        let (second, state) = check_now(at(5, 9, 0, 59), &config, &state);
        assert!(first);
        assert!(!second);
        assert_eq!(state.last_fired, Some(day(5)));
    }

    #[test]
    fn test_no_fire_outside_target_minute() {
        let config = ScheduleConfig::new(9, 0).unwrap();
        let state = TriggerState::never();

        for now in [at(5, 8, 59, 59), at(5, 9, 1, 0), at(5, 21, 0, 0)] {
            let (fire, new_state) = check_now(now, &config, &state);
            assert!(!fire, "unexpected fire at {}", now);
            assert_eq!(new_state, state);
        }
    }

    #[test]
    fn test_calendar_day_not_elapsed_time() {
        // Fired late yesterday, less than 24h ago: today still fires
        let config = ScheduleConfig::new(0, 5).unwrap();
        let state = TriggerState::fired_on(day(4));

        let (fire, _) = check_now(at(5, 0, 5, 0), &config, &state);
        assert!(fire);
    }

    #[test]
    fn test_missed_tick_is_not_caught_up() {
        let config = ScheduleConfig::new(9, 0).unwrap();
        let (fire, _) = check_now(at(5, 9, 2, 0), &config, &TriggerState::never());
        assert!(!fire);
    }

    #[test]
    fn test_catch_up_window() {
        let config = ScheduleConfig::new(9, 0).unwrap();
        let policy = TriggerPolicy::CatchUpWindow(Duration::from_secs(5 * 60));
        let state = TriggerState::never();

        let (fire, new_state) = check_with_policy(at(5, 9, 3, 0), &config, &state, policy);
        assert!(fire);
        assert_eq!(new_state.last_fired, Some(day(5)));

        let (late, _) = check_with_policy(at(5, 9, 5, 0), &config, &state, policy);
        assert!(!late);

        let (early, _) = check_with_policy(at(5, 8, 59, 59), &config, &state, policy);
        assert!(!early);

        let (again, _) = check_with_policy(at(5, 9, 4, 0), &config, &new_state, policy);
        assert!(!again);
    }

    #[test]
    fn test_scheduler_check_updates_store_and_signal() {
        let store = Arc::new(MemoryScheduleStore::new(
            ScheduleConfig::new(9, 0).unwrap(),
            TriggerState::fired_on(day(4)),
        ));
        let clock = Arc::new(FixedClock::new(at(5, 9, 0, 10)));
        let scheduler =
            DailyTriggerScheduler::new(store.clone(), clock.clone(), TriggerPolicy::ExactMinute);
        let events = scheduler.subscribe();

        assert!(scheduler.check());
        assert!(scheduler.signal().is_raised());
        assert_eq!(store.trigger_state().last_fired, Some(day(5)));

        clock.set(at(5, 9, 0, 40));
        assert!(!scheduler.check());

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, TriggerKind::Scheduled);
        assert_eq!(event.at, at(5, 9, 0, 10));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_schedule_change_applies_on_next_tick() {
        let store = Arc::new(MemoryScheduleStore::new(
            ScheduleConfig::new(9, 0).unwrap(),
            TriggerState::never(),
        ));
        let clock = Arc::new(FixedClock::new(at(5, 10, 30, 0)));
        let scheduler = DailyTriggerScheduler::new(store.clone(), clock, TriggerPolicy::ExactMinute);

        assert!(!scheduler.check());
        store.set_schedule(ScheduleConfig::new(10, 30).unwrap());
        assert!(scheduler.check());
    }

    #[test]
    fn test_force_trigger_leaves_state() {
        let store = Arc::new(MemoryScheduleStore::default());
        let clock = Arc::new(FixedClock::new(at(5, 3, 0, 0)));
        let scheduler = DailyTriggerScheduler::new(store.clone(), clock, TriggerPolicy::ExactMinute);
        let events = scheduler.subscribe();

        scheduler.force_trigger();

        assert!(scheduler.signal().is_raised());
        assert_eq!(scheduler.state(), TriggerState::never());
        assert_eq!(store.trigger_state(), TriggerState::never());
        assert_eq!(events.try_recv().unwrap().kind, TriggerKind::Manual);

        scheduler.signal().acknowledge();
        assert!(!scheduler.signal().is_raised());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let signal = TriggerSignal::default();
        let kept = signal.subscribe();
        drop(signal.subscribe());

        signal.raise(TriggerEvent {
            kind: TriggerKind::Manual,
            at: at(5, 0, 0, 0),
        });

        assert_eq!(signal.subscribers.lock().unwrap().len(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_start_checks_immediately() {
        let store = Arc::new(MemoryScheduleStore::new(
            ScheduleConfig::new(9, 0).unwrap(),
            TriggerState::never(),
        ));
        let clock = Arc::new(FixedClock::new(at(5, 9, 0, 0)));
        let scheduler = Arc::new(DailyTriggerScheduler::new(
            store,
            clock,
            TriggerPolicy::ExactMinute,
        ));
        let events = scheduler.subscribe();

        let handle = scheduler.start(Duration::from_secs(3600)).unwrap();
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.stop();

        assert_eq!(event.kind, TriggerKind::Scheduled);
        assert_eq!(scheduler.state().last_fired, Some(day(5)));
    }
}
