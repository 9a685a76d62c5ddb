//! Sync Scheduler - background timer that triggers scheduled sync passes
//!
//! One tokio task owns the interval timer. Every tick checks the live
//! `SyncConfig`: nothing runs while syncing is disabled, and a tick that finds
//! the exclusive-run guard held (manual pass or migration) is dropped, never
//! queued. Interval changes arrive through the config store subscription and
//! re-arm the timer.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::format_duration;
use crate::sync::SyncEngine;
use crate::status::SyncStatus;

/// Scheduler statistics and status
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval: Duration,
    pub ticks: u64,
    pub passes_run: u64,
    /// Ticks dropped because a pass or migration held the guard
    pub ticks_skipped: u64,
    /// Ticks ignored because syncing is disabled
    pub ticks_disabled: u64,
    pub last_status: Option<SyncStatus>,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Local>>,
}

/// Background loop state and control
pub struct Scheduler {
    engine: SyncEngine,
    status: Arc<Mutex<SchedulerStatus>>,
    running: Arc<AtomicBool>,
    shutdown_sender: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn arm(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

impl Scheduler {
    pub fn new(engine: SyncEngine) -> Self {
        let (shutdown_sender, _) = watch::channel(false);
        Self {
            engine,
            status: Arc::new(Mutex::new(SchedulerStatus::default())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_sender,
            task: Mutex::new(None),
        }
    }

    /// Spawn the timer loop; calling it again while running does nothing
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        self.shutdown_sender.send_replace(false);

        let looper = Loop {
            engine: self.engine.clone(),
            status: self.status.clone(),
            running: self.running.clone(),
            shutdown_receiver: self.shutdown_sender.subscribe(),
        };
        *task = Some(tokio::spawn(looper.run()));
    }

    /// Stop accepting ticks and optionally wait for the in-flight pass
    ///
    /// The pass is never aborted. Returns true when the loop has exited, false
    /// when `wait` elapsed first (the pass keeps running to completion).
    pub async fn shutdown(&self, wait: Option<Duration>) -> bool {
        info!("Stopping sync scheduler");
        self.shutdown_sender.send_replace(true);

        let Some(handle) = lock(&self.task).take() else {
            return true;
        };

        match wait {
            None => handle.is_finished(),
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!("Scheduler task ended abnormally: {}", e);
                    true
                }
                Err(_) => {
                    warn!("In-flight sync pass still running after {:?}", limit);
                    false
                }
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the loop statistics
    pub fn status(&self) -> SchedulerStatus {
        let mut status = lock(&self.status).clone();
        status.running = self.is_running();
        status.interval = self.engine.config().sync_config().commit_interval;
        status
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Loop {
    engine: SyncEngine,
    status: Arc<Mutex<SchedulerStatus>>,
    running: Arc<AtomicBool>,
    shutdown_receiver: watch::Receiver<bool>,
}

impl Loop {
    async fn run(mut self) {
        let mut config_receiver = self.engine.config().subscribe();
        let mut period = config_receiver.borrow_and_update().sync.commit_interval;
        let mut timer = arm(period);

        info!("Sync scheduler started with interval {}", format_duration(period));

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_receiver.changed() => {
                    if changed.is_err() || *self.shutdown_receiver.borrow() {
                        break;
                    }
                }

                changed = config_receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = config_receiver.borrow_and_update().sync.commit_interval;
                    if next != period {
                        info!(
                            "Sync interval changed from {} to {}",
                            format_duration(period),
                            format_duration(next)
                        );
                        period = next;
                        timer = arm(period);
                    }
                }

                _ = timer.tick() => self.on_tick().await,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Sync scheduler stopped");
    }

    async fn on_tick(&self) {
        lock(&self.status).ticks += 1;

        if !self.engine.config().sync_config().enabled {
            debug!("Sync disabled, ignoring tick");
            lock(&self.status).ticks_disabled += 1;
            return;
        }

        let outcome = self.engine.scheduled_pass().await;

        let mut status = lock(&self.status);
        match outcome {
            None => status.ticks_skipped += 1,
            Some(Ok(result)) => {
                status.passes_run += 1;
                status.last_status = Some(result.status());
                status.last_error = None;
                status.last_run_at = Some(Local::now());
            }
            Some(Err(e)) => {
                status.passes_run += 1;
                status.last_error = Some(e.to_string());
                status.last_run_at = Some(Local::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore, GitConfig, SyncConfig};
    use crate::executor::scripted::{fail, ok, ScriptedExecutor};
    use crate::git::GitClient;
    use crate::guard::SyncGuard;
    use crate::notify::TracingNotifier;
    use tempfile::TempDir;

    fn setup(enabled: bool, every: Duration) -> (TempDir, Arc<ScriptedExecutor>, SyncEngine) {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        executor.on("rev-parse --git-dir", ok(".git\n"));
        executor.on("rev-parse -q --verify MERGE_HEAD", fail(1, "", ""));
        executor.on("remote get-url", fail(2, "", ""));
        executor.on("status", ok("## main\n"));

        let config = ConfigStore::new(Config {
            data_directory: dir.path().to_string_lossy().into_owned(),
            sync: SyncConfig {
                enabled,
                commit_interval: every,
                ..SyncConfig::default()
            },
            ..Config::default()
        });
        let git = GitClient::new(executor.clone(), GitConfig::default(), dir.path().to_path_buf());
        let engine = SyncEngine::new(git, config, SyncGuard::new(), Arc::new(TracingNotifier));
        (dir, executor, engine)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_run_passes() {
        let (_dir, executor, engine) = setup(true, Duration::from_secs(60));
        executor.once("status", ok("## main\n M a.md\n"));
        let scheduler = Scheduler::new(engine);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(185)).await;

        let status = scheduler.status();
        assert!(status.running);
        assert_eq!(status.ticks, 3);
        assert_eq!(status.passes_run, 3);
        assert_eq!(status.last_status, Some(SyncStatus::NoChanges));
        assert_eq!(executor.count("commit"), 1);

        assert!(scheduler.shutdown(Some(Duration::from_secs(1))).await);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_sync_never_runs() {
        let (_dir, executor, engine) = setup(false, Duration::from_secs(10));
        let scheduler = Scheduler::new(engine);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(35)).await;

        let status = scheduler.status();
        assert_eq!(status.ticks, 3);
        assert_eq!(status.ticks_disabled, 3);
        assert_eq!(status.passes_run, 0);
        assert!(executor.calls().is_empty());
        scheduler.shutdown(None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_guard_drops_ticks() {
        let (_dir, executor, engine) = setup(true, Duration::from_secs(10));
        let permit = engine.guard().try_acquire().unwrap();
        let scheduler = Scheduler::new(engine);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(scheduler.status().ticks_skipped, 2);
        assert!(executor.calls().is_empty());

        drop(permit);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = scheduler.status();
        assert_eq!(status.ticks_skipped, 2);
        assert_eq!(status.passes_run, 1);
        scheduler.shutdown(Some(Duration::from_secs(1))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_rearms_timer() {
        let (_dir, _executor, engine) = setup(true, Duration::from_secs(3600));
        let config = engine.config().clone();
        let scheduler = Scheduler::new(engine);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.status().ticks, 0);

        config
            .set_sync_config(SyncConfig {
                enabled: true,
                commit_interval: Duration::from_secs(10),
                ..SyncConfig::default()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        let status = scheduler.status();
        assert_eq!(status.interval, Duration::from_secs(10));
        assert_eq!(status.ticks, 2);
        scheduler.shutdown(Some(Duration::from_secs(1))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_pass() {
        let (_dir, executor, engine) = setup(true, Duration::from_secs(10));
        executor.delay(Duration::from_secs(5));
        let scheduler = Scheduler::new(engine.clone());
        scheduler.start();

        // first tick fires at 10s; the pass needs several delayed calls
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(engine.guard().is_busy());

        assert!(!scheduler.shutdown(Some(Duration::from_secs(1))).await);
        // the pass is not aborted, it finishes and releases the guard
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!engine.guard().is_busy());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.status().passes_run, 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_harmless() {
        let (_dir, _executor, engine) = setup(false, Duration::from_secs(3600));
        let scheduler = Scheduler::new(engine);
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        assert!(scheduler.shutdown(Some(Duration::from_secs(5))).await);
    }
}
