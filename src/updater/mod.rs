pub mod handler;

use crate::cache::now_ms;
use crate::config::AutoUpdateConfig;
use serde::Serialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// Output kept from the child process, per stream.
const MAX_OUTPUT_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterStatus {
    pub is_running: bool,
    pub is_updating: bool,
    pub last_update_time: Option<i64>,
    pub interval_ms: i64,
    pub next_update_in_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl UpdateOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    is_updating: bool,
    last_update_ms: Option<i64>,
}

struct Timer {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Periodically runs the external data-fetching command.
///
/// Nothing runs until `start` is called. At most one update runs at a time,
/// and unforced manual triggers are refused until `interval_secs` has passed
/// since the last successful run. Timer ticks are already spaced by the
/// interval, so they only skip while another update is in flight.
pub struct AutoUpdater {
    config: AutoUpdateConfig,
    progress: Mutex<Progress>,
    timer: Mutex<Option<Timer>>,
}

/// Clears the in-flight flag even if the update future is dropped.
struct UpdatingGuard<'a>(&'a AutoUpdater);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.progress().is_updating = false;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let count = text.chars().count();
    if count <= MAX_OUTPUT_CHARS {
        return text.into_owned();
    }
    text.chars().skip(count - MAX_OUTPUT_CHARS).collect()
}

impl AutoUpdater {
    pub fn new(config: AutoUpdateConfig) -> Self {
        Self {
            config,
            progress: Mutex::new(Progress::default()),
            timer: Mutex::new(None),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        lock(&self.progress)
    }

    fn interval_ms(&self) -> i64 {
        (self.config.interval_secs as i64).saturating_mul(1000)
    }

    /// Start the timer. Returns false when it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut stop) = watch::channel(false);
        let this = Arc::clone(self);
        let initial_delay = Duration::from_secs(self.config.initial_delay_secs);
        let period = Duration::from_secs(self.config.interval_secs);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(initial_delay) => {}
                _ = stop.changed() => return,
            }

            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                }
                let outcome = this.scheduled_update().await;
                if !outcome.success {
                    tracing::warn!(message = %outcome.message, "scheduled update did not run");
                }
            }
        });

        *timer = Some(Timer { handle, shutdown });
        tracing::info!(
            initial_delay_secs = self.config.initial_delay_secs,
            interval_secs = self.config.interval_secs,
            "auto-updater started"
        );
        true
    }

    /// Stop the timer. An update already in flight runs to completion; the
    /// returned handle resolves once it has and the timer task has exited.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let timer = lock(&self.timer).take()?;
        let _ = timer.shutdown.send(true);
        tracing::info!("auto-updater stopped");
        Some(timer.handle)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn status(&self) -> UpdaterStatus {
        let is_running = self.is_running();
        let progress = self.progress();
        let interval_ms = self.interval_ms();
        UpdaterStatus {
            is_running,
            is_updating: progress.is_updating,
            last_update_time: progress.last_update_ms,
            interval_ms,
            next_update_in_ms: progress
                .last_update_ms
                .map(|last| (last + interval_ms - now_ms()).max(0)),
        }
    }

    /// Decide whether an update may start at `now`, and if so mark one as
    /// in flight. The check and the mark happen under one lock.
    pub fn check_guard(&self, now: i64, force: bool) -> Result<(), UpdateOutcome> {
        let mut progress = self.progress();
        if progress.is_updating {
            return Err(UpdateOutcome::rejected("update already in progress"));
        }
        if !force {
            if let Some(last) = progress.last_update_ms {
                let elapsed = now - last;
                let interval = self.interval_ms();
                if elapsed < interval {
                    let remaining = interval - elapsed;
                    return Err(UpdateOutcome {
                        time_remaining_ms: Some(remaining),
                        ..UpdateOutcome::rejected(format!(
                            "last update was {}s ago, next allowed in {}s",
                            elapsed / 1000,
                            (remaining + 999) / 1000
                        ))
                    });
                }
            }
        }
        progress.is_updating = true;
        Ok(())
    }

    /// Run the data-fetching command unless an update is in flight or, when
    /// not forced, the last one was too recent.
    pub async fn trigger(&self, force: bool) -> UpdateOutcome {
        if let Err(rejected) = self.check_guard(now_ms(), force) {
            tracing::debug!(message = %rejected.message, "update skipped");
            return rejected;
        }
        let _guard = UpdatingGuard(self);
        tracing::info!(command = %self.config.command, force, "running data update");
        self.run().await
    }

    async fn scheduled_update(&self) -> UpdateOutcome {
        if let Err(rejected) = self.check_guard(now_ms(), true) {
            return rejected;
        }
        let _guard = UpdatingGuard(self);
        tracing::info!(command = %self.config.command, "running scheduled data update");
        self.run().await
    }

    /// Run the command. The caller holds the in-flight flag.
    async fn run(&self) -> UpdateOutcome {
        let started = Instant::now();

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let output = match command.spawn() {
            Ok(child) => {
                let timeout = Duration::from_secs(self.config.timeout_secs);
                time::timeout(timeout, child.wait_with_output()).await
            }
            Err(e) => {
                tracing::error!(command = %self.config.command, error = %e, "failed to spawn update command");
                return UpdateOutcome::rejected(format!("failed to start update: {e}"));
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "update command failed");
                return UpdateOutcome {
                    duration_ms: Some(duration_ms),
                    ..UpdateOutcome::rejected(format!("update failed: {e}"))
                };
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.config.timeout_secs, "update command timed out");
                return UpdateOutcome {
                    duration_ms: Some(duration_ms),
                    ..UpdateOutcome::rejected(format!(
                        "update timed out after {}s",
                        self.config.timeout_secs
                    ))
                };
            }
        };

        let success = output.status.success();
        let exit_code = output.status.code();
        if success {
            self.progress().last_update_ms = Some(now_ms());
            tracing::info!(duration_ms, "data update completed");
        } else {
            tracing::error!(duration_ms, exit_code, "data update exited with failure");
        }

        UpdateOutcome {
            success,
            message: if success {
                "update completed".to_string()
            } else {
                format!("update exited with status {}", output.status)
            },
            time_remaining_ms: None,
            duration_ms: Some(duration_ms),
            exit_code,
            stdout: Some(tail(&output.stdout)),
            stderr: Some(tail(&output.stderr)),
        }
    }
}

impl Drop for AutoUpdater {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> AutoUpdateConfig {
        AutoUpdateConfig {
            enabled: true,
            initial_delay_secs: 3600,
            interval_secs: 600,
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_guard_reports_time_remaining() {
        let updater = AutoUpdater::new(config("true", &[]));
        updater.progress().last_update_ms = Some(1_000_000);

        let early = updater.check_guard(1_000_000 + 60_000, false).unwrap_err();
        let later = updater.check_guard(1_000_000 + 120_000, false).unwrap_err();
        assert!(!early.success);
        assert_eq!(early.time_remaining_ms, Some(540_000));
        assert_eq!(later.time_remaining_ms, Some(480_000));

        assert!(updater.check_guard(1_000_000 + 600_000, false).is_ok());
    }

    #[test]
    fn test_guard_refuses_while_updating_even_when_forced() {
        let updater = AutoUpdater::new(config("true", &[]));
        assert!(updater.check_guard(0, true).is_ok());
        let busy = updater.check_guard(0, true).unwrap_err();
        assert_eq!(busy.message, "update already in progress");
        assert_eq!(busy.time_remaining_ms, None);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let updater = Arc::new(AutoUpdater::new(config("true", &[])));
        assert!(updater.start());
        assert!(!updater.start());
        assert!(updater.status().is_running);
        updater.stop().unwrap().await.unwrap();
        assert!(!updater.is_running());
        assert!(updater.stop().is_none());
        assert!(updater.start());
        updater.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trigger_records_only_successful_runs() {
        let failing = AutoUpdater::new(config("sh", &["-c", "echo boom >&2; exit 3"]));
        let outcome = failing.trigger(false).await;
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stderr.as_deref(), Some("boom\n"));
        assert_eq!(failing.status().last_update_time, None);
        assert!(!failing.status().is_updating);

        let ok = AutoUpdater::new(config("sh", &["-c", "echo done"]));
        let outcome = ok.trigger(false).await;
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.stdout.as_deref(), Some("done\n"));
        assert!(ok.status().last_update_time.is_some());

        let again = ok.trigger(false).await;
        assert!(!again.success);
        assert!(again.time_remaining_ms.is_some());
        assert!(ok.trigger(true).await.success);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let updater = AutoUpdater::new(config("/nonexistent/solstate-update", &[]));
        let outcome = updater.trigger(true).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("failed to start update"));
        assert!(!updater.status().is_updating);
    }
    #[cfg(unix)]
    #[tokio::test]
    async fn test_timer_runs_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs.log");
        let script = format!("echo run >> {}; sleep 0.3", log.display());
        let mut cfg = config("sh", &["-c", &script]);
        cfg.initial_delay_secs = 0;
        cfg.interval_secs = 1;

        let updater = Arc::new(AutoUpdater::new(cfg));
        assert!(updater.start());
        // Ticks at 0s, 1s, 2s and 3s.
        time::sleep(Duration::from_millis(3500)).await;
        updater.stop().unwrap().await.unwrap();

        let runs = std::fs::read_to_string(&log).unwrap().lines().count();
        assert!((4..=5).contains(&runs), "ran {runs} times");
        assert!(updater.status().last_update_time.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_lets_running_update_finish() {
        let dir = tempfile::tempdir().unwrap();
        let done = dir.path().join("done");
        let script = format!("sleep 1; touch {}", done.display());
        let mut cfg = config("sh", &["-c", &script]);
        cfg.initial_delay_secs = 0;

        let updater = Arc::new(AutoUpdater::new(cfg));
        assert!(updater.start());
        time::sleep(Duration::from_millis(300)).await;
        assert!(updater.status().is_updating);

        let handle = updater.stop().unwrap();
        assert!(!updater.is_running());
        handle.await.unwrap();

        assert!(done.exists());
        let status = updater.status();
        assert!(!status.is_updating);
        assert!(status.last_update_time.is_some());
    }
}
