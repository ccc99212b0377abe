//! Activity-aware polling scheduler.
//!
//! [`ScheduleState`] holds the timing rules and is driven with explicit
//! instants, so it can be reasoned about without a runtime. [`Scheduler`]
//! wraps it in a tokio task that owns the recurring timer, the activity
//! subscription and the in-flight sync, and tears all three down together.

use crate::error::SyncError;
use crate::sync::activity::{Activity, ActivityEvent, ActivityMonitor};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(300_000);
pub const DEFAULT_INACTIVITY_DELAY: Duration = Duration::from_millis(30_000);
const BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub inactivity_delay: Duration,
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            inactivity_delay: DEFAULT_INACTIVITY_DELAY,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Clamp bounds so the timer can be armed: a zero minimum becomes 1ms and
    /// the maximum is never below the minimum.
    pub fn normalized(mut self) -> Self {
        if self.min_interval.is_zero() {
            warn!("min_interval of 0 would busy-loop, using 1ms");
            self.min_interval = Duration::from_millis(1);
        }
        if self.max_interval < self.min_interval {
            warn!(
                "max_interval {:?} is below min_interval {:?}, raising it",
                self.max_interval, self.min_interval
            );
            self.max_interval = self.min_interval;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickDecision {
    /// The last sync is closer than `min_interval`.
    Skip { remaining: Duration },
    Sync { active: bool, interval: Duration },
}

#[derive(Debug, Clone)]
pub struct ScheduleState {
    config: SchedulerConfig,
    activity: ActivityMonitor,
    last_sync: Option<Instant>,
    current_interval: Duration,
    is_active: bool,
}

impl ScheduleState {
    pub fn new(config: SchedulerConfig, now: Instant) -> Self {
        let config = config.normalized();
        Self {
            activity: ActivityMonitor::new(now, config.inactivity_delay),
            last_sync: None,
            current_interval: config.min_interval,
            is_active: true,
            config,
        }
    }

    pub fn record_activity(&mut self, now: Instant) -> Activity {
        let outcome = self.activity.record_activity(now);
        if outcome == Activity::Resumed {
            self.is_active = true;
            self.current_interval = self.config.min_interval;
        }
        outcome
    }

    pub fn tick(&mut self, now: Instant) -> TickDecision {
        self.is_active = self.activity.is_active(now);

        if let Some(last) = self.last_sync {
            let since = now.saturating_duration_since(last);
            if since < self.config.min_interval {
                return TickDecision::Skip {
                    remaining: self.config.min_interval - since,
                };
            }
        }

        self.current_interval = if self.is_active {
            self.config.min_interval
        } else {
            self.current_interval
                .mul_f64(BACKOFF_FACTOR)
                .min(self.config.max_interval)
        };
        self.last_sync = Some(now);

        TickDecision::Sync {
            active: self.is_active,
            interval: self.current_interval,
        }
    }

    /// Forget the last sync so the floor check passes, then tick.
    pub fn force(&mut self, now: Instant) -> TickDecision {
        self.last_sync = None;
        self.tick(now)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    pub fn last_activity(&self) -> Instant {
        self.activity.last_activity()
    }
}

/// The caller-supplied fetch. Failures are logged by the scheduler and never
/// stop the timer.
#[async_trait]
pub trait Syncer: Send + Sync + 'static {
    async fn sync(&self) -> Result<(), SyncError>;
}

#[async_trait]
impl<S: Syncer + ?Sized> Syncer for Arc<S> {
    async fn sync(&self) -> Result<(), SyncError> {
        (**self).sync().await
    }
}

/// Adapts an async closure into a [`Syncer`].
pub struct SyncFn<F>(pub F);

#[async_trait]
impl<F, Fut> Syncer for SyncFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    async fn sync(&self) -> Result<(), SyncError> {
        (self.0)().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub is_active: bool,
    pub current_interval: Duration,
    pub last_sync: Option<Instant>,
    pub in_flight: bool,
    pub syncs_started: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
enum Command {
    Activity(ActivityEvent),
    Force,
    SetEnabled(bool),
}

/// Cloneable sender for input activity. Reports made after the scheduler is
/// stopped are dropped.
#[derive(Debug, Clone)]
pub struct ActivityReporter {
    tx: mpsc::UnboundedSender<Command>,
}

impl ActivityReporter {
    pub fn report(&self, event: ActivityEvent) -> bool {
        self.tx.send(Command::Activity(event)).is_ok()
    }
}

type SyncFuture = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>>;

/// Handle to a running scheduler task. Dropping it aborts the task, which
/// also drops the timer and any sync still in flight.
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SchedulerStatus>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the scheduler on the current tokio runtime. When enabled, the
    /// first tick runs immediately.
    pub fn start<S: Syncer>(config: SchedulerConfig, syncer: S) -> Self {
        let state = ScheduleState::new(config, Instant::now());
        let enabled = state.config().enabled;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (status_tx, status) = watch::channel(SchedulerStatus {
            enabled,
            is_active: state.is_active(),
            current_interval: state.current_interval(),
            last_sync: None,
            in_flight: false,
            syncs_started: 0,
            consecutive_failures: 0,
        });

        info!(
            "scheduler starting (enabled={}, min={:?}, max={:?}, inactivity={:?})",
            enabled,
            state.config().min_interval,
            state.config().max_interval,
            state.config().inactivity_delay
        );

        let driver = Driver {
            state,
            syncer: Arc::new(syncer),
            enabled,
            in_flight: None,
            pending_force: false,
            syncs_started: 0,
            consecutive_failures: 0,
            status_tx,
        };
        let task = tokio::spawn(driver.run(command_rx, shutdown_rx));

        Self {
            commands,
            status,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn activity_reporter(&self) -> ActivityReporter {
        ActivityReporter {
            tx: self.commands.clone(),
        }
    }

    pub fn record_activity(&self, event: ActivityEvent) {
        let _ = self.commands.send(Command::Activity(event));
    }

    /// User-initiated refresh. Bypasses the `min_interval` floor; if a sync is
    /// already running, one forced sync is queued behind it.
    pub fn force_sync(&self) {
        let _ = self.commands.send(Command::Force);
    }

    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled(enabled));
    }

    pub fn status(&self) -> SchedulerStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Stop the task and wait for it to exit. Once this returns no tick fires
    /// and no activity is observed.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("scheduler task ended abnormally: {err}");
                }
            }
        }
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver {
    state: ScheduleState,
    syncer: Arc<dyn Syncer>,
    enabled: bool,
    in_flight: Option<SyncFuture>,
    pending_force: bool,
    syncs_started: u64,
    consecutive_failures: u32,
    status_tx: watch::Sender<SchedulerStatus>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut timer = self.enabled.then(|| self.new_timer());

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = async {
                    match self.in_flight.as_mut() {
                        Some(fut) => fut.await,
                        None => pending().await,
                    }
                } => self.finish_sync(result),
                cmd = commands.recv() => match cmd {
                    Some(Command::Activity(event)) => self.on_activity(event),
                    Some(Command::Force) => self.on_force(),
                    Some(Command::SetEnabled(on)) => {
                        if on && timer.is_none() {
                            info!("scheduler enabled");
                            timer = Some(self.new_timer());
                        } else if !on && timer.is_some() {
                            info!("scheduler disabled, timer cancelled");
                            timer = None;
                        }
                        self.enabled = on;
                    }
                    None => break,
                },
                _ = async {
                    match timer.as_mut() {
                        Some(t) => {
                            t.tick().await;
                        }
                        None => pending::<()>().await,
                    }
                } => self.on_tick(),
            }
            self.publish();
        }
        // Timer, receivers and any in-flight sync are dropped here.
        self.in_flight = None;
    }

    fn new_timer(&self) -> Interval {
        let mut timer = tokio::time::interval(self.state.config().min_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    fn on_tick(&mut self) {
        if self.in_flight.is_some() {
            debug!("tick skipped: previous sync still in flight");
            return;
        }
        let decision = self.state.tick(Instant::now());
        self.apply(decision);
    }

    fn on_force(&mut self) {
        if self.in_flight.is_some() {
            debug!("forced sync queued behind the running one");
            self.pending_force = true;
            return;
        }
        let decision = self.state.force(Instant::now());
        self.apply(decision);
    }

    fn on_activity(&mut self, event: ActivityEvent) {
        match self.state.record_activity(Instant::now()) {
            Activity::Resumed => info!("activity resumed ({event:?}), polling interval reset"),
            Activity::Recorded => debug!("activity recorded ({event:?})"),
            Activity::Throttled => {}
        }
    }

    fn apply(&mut self, decision: TickDecision) {
        match decision {
            TickDecision::Skip { remaining } => {
                debug!("tick skipped: next sync due in {remaining:?}");
            }
            TickDecision::Sync { active, interval } => {
                debug!("sync started (active={active}, interval={interval:?})");
                self.syncs_started += 1;
                let syncer = Arc::clone(&self.syncer);
                self.in_flight = Some(Box::pin(async move { syncer.sync().await }));
            }
        }
    }

    fn finish_sync(&mut self, result: Result<(), SyncError>) {
        self.in_flight = None;
        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                debug!("sync finished");
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    "sync failed ({} in a row): {err}",
                    self.consecutive_failures
                );
            }
        }
        if self.pending_force {
            self.pending_force = false;
            self.on_force();
        }
    }

    fn publish(&self) {
        let status = SchedulerStatus {
            enabled: self.enabled,
            is_active: self.state.is_active(),
            current_interval: self.state.current_interval(),
            last_sync: self.state.last_sync(),
            in_flight: self.in_flight.is_some(),
            syncs_started: self.syncs_started,
            consecutive_failures: self.consecutive_failures,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            min_interval: secs(10),
            max_interval: secs(60),
            inactivity_delay: secs(30),
            enabled: true,
        }
    }

    #[test]
    fn active_user_keeps_minimum_interval() {
        let t0 = Instant::now();
        let mut state = ScheduleState::new(config(), t0);
        for n in 0..3 {
            let decision = state.tick(t0 + secs(10 * n));
            assert_eq!(
                decision,
                TickDecision::Sync {
                    active: true,
                    interval: secs(10)
                }
            );
        }
    }

    #[test]
    fn inactivity_grows_interval_until_capped() {
        let t0 = Instant::now();
        let mut state = ScheduleState::new(config(), t0);
        let mut seen = Vec::new();
        for n in 3..12 {
            state.tick(t0 + secs(10 * n));
            seen.push(state.current_interval());
        }
        assert!(!state.is_active());
        for pair in seen.windows(2) {
            if pair[0] < secs(60) {
                assert!(pair[1] > pair[0], "interval should grow: {seen:?}");
            } else {
                assert_eq!(pair[1], secs(60));
            }
        }
        assert_eq!(seen.last().copied(), Some(secs(60)));
    }

    #[test]
    fn floor_check_skips_ticks_closer_than_min_interval() {
        let t0 = Instant::now();
        let mut state = ScheduleState::new(config(), t0);
        assert!(matches!(state.tick(t0), TickDecision::Sync { .. }));
        assert_eq!(
            state.tick(t0 + secs(4)),
            TickDecision::Skip { remaining: secs(6) }
        );
        assert_eq!(state.last_sync(), Some(t0));
    }

    #[test]
    fn force_bypasses_floor() {
        let t0 = Instant::now();
        let mut state = ScheduleState::new(config(), t0);
        state.tick(t0);
        assert!(matches!(
            state.force(t0 + Duration::from_millis(5)),
            TickDecision::Sync { .. }
        ));
    }

    #[test]
    fn resumed_activity_resets_backed_off_interval() {
        let t0 = Instant::now();
        let mut state = ScheduleState::new(config(), t0);
        state.tick(t0 + secs(40));
        state.tick(t0 + secs(50));
        assert!(state.current_interval() > secs(10));

        assert_eq!(state.record_activity(t0 + secs(55)), Activity::Resumed);
        assert_eq!(state.current_interval(), secs(10));
        assert!(state.is_active());
    }

    #[test]
    fn normalized_repairs_inverted_bounds() {
        let cfg = SchedulerConfig {
            min_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        }
        .normalized();
        assert_eq!(cfg.min_interval, Duration::from_millis(1));
        assert_eq!(cfg.max_interval, Duration::from_millis(1));
    }

    fn counting_syncer(calls: Arc<AtomicUsize>) -> impl Syncer {
        SyncFn(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), SyncError>(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_runs_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::start(config(), counting_syncer(Arc::clone(&calls)));
        let mut rx = scheduler.subscribe();
        rx.wait_for(|s| s.syncs_started == 1 && !s.in_flight)
            .await
            .expect("scheduler alive");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_backs_off_while_user_is_idle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::start(config(), counting_syncer(Arc::clone(&calls)));
        let mut rx = scheduler.subscribe();

        let mut intervals = Vec::new();
        for n in 1..=9u64 {
            let status = *rx
                .wait_for(|s| s.syncs_started >= n)
                .await
                .expect("scheduler alive");
            intervals.push(status.current_interval);
        }
        assert_eq!(&intervals[..3], &[secs(10), secs(10), secs(10)]);
        assert!(intervals[3] > secs(10));
        assert_eq!(intervals[8], secs(60));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sync_is_never_overlapped() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let syncer = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            SyncFn(move || {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(secs(25)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), SyncError>(())
                }
            })
        };
        let scheduler = Scheduler::start(config(), syncer);
        tokio::time::sleep(secs(35)).await;

        let status = scheduler.status();
        assert_eq!(status.syncs_started, 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_ignores_recent_sync() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::start(config(), counting_syncer(Arc::clone(&calls)));
        let mut rx = scheduler.subscribe();
        rx.wait_for(|s| s.syncs_started == 1 && !s.in_flight)
            .await
            .expect("scheduler alive");

        scheduler.force_sync();
        rx.wait_for(|s| s.syncs_started == 2 && !s.in_flight)
            .await
            .expect("scheduler alive");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn forces_during_a_running_sync_coalesce() {
        let syncer = SyncFn(|| async {
            tokio::time::sleep(secs(5)).await;
            Ok::<(), SyncError>(())
        });
        let scheduler = Scheduler::start(config(), syncer);
        let mut rx = scheduler.subscribe();
        rx.wait_for(|s| s.in_flight).await.expect("scheduler alive");

        scheduler.force_sync();
        scheduler.force_sync();
        tokio::time::sleep(secs(12)).await;
        // One queued force ran at t=5; the t=10 tick hit the floor.
        assert_eq!(scheduler.status().syncs_started, 2);

        tokio::time::sleep(secs(10)).await;
        assert_eq!(scheduler.status().syncs_started, 3);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_polling_continues() {
        let syncer = SyncFn(|| async { Err::<(), _>(SyncError::other("server unreachable")) });
        let scheduler = Scheduler::start(config(), syncer);
        let mut rx = scheduler.subscribe();
        let status = *rx
            .wait_for(|s| s.consecutive_failures == 3)
            .await
            .expect("scheduler alive");
        assert_eq!(status.syncs_started, 3);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_scheduler_waits_for_enable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cfg = SchedulerConfig {
            enabled: false,
            ..config()
        };
        let scheduler = Scheduler::start(cfg, counting_syncer(Arc::clone(&calls)));
        tokio::time::sleep(secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        scheduler.set_enabled(true);
        let mut rx = scheduler.subscribe();
        rx.wait_for(|s| s.syncs_started == 1 && !s.in_flight)
            .await
            .expect("scheduler alive");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        scheduler.set_enabled(false);
        rx.wait_for(|s| !s.enabled).await.expect("scheduler alive");
        tokio::time::sleep(secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::start(config(), counting_syncer(Arc::clone(&calls)));
        let reporter = scheduler.activity_reporter();
        let mut rx = scheduler.subscribe();
        rx.wait_for(|s| s.syncs_started == 1 && !s.in_flight)
            .await
            .expect("scheduler alive");

        scheduler.stop().await;
        tokio::time::sleep(secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!reporter.report(ActivityEvent::KeyPress));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_interval_in_running_scheduler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::start(config(), counting_syncer(Arc::clone(&calls)));
        let mut rx = scheduler.subscribe();
        rx.wait_for(|s| s.current_interval > secs(10))
            .await
            .expect("scheduler alive");

        scheduler.activity_reporter().report(ActivityEvent::Click);
        let status = *rx
            .wait_for(|s| s.is_active)
            .await
            .expect("scheduler alive");
        assert_eq!(status.current_interval, secs(10));
        scheduler.stop().await;
    }
}
