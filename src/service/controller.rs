//! Service lifecycle controller
//!
//! Owns the status of one model service: whether its binary is installed,
//! whether it answers, and the `serve` child this controller spawned (if
//! any). Status changes and pull progress go out through one `EventHub`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::assets::{asset_matches, Asset};
use super::client::{PullOutcome, ServiceClient};
use super::discovery;
use super::status::{ServiceStatus, StatusCell};
use crate::core::{EventHub, OrchestratorResult, Platform, ServiceEvent, ServicePreferences, Subscription};
use crate::process::{read_lines, tree, CommandExecutor};

/// Handle to the controller; clones share state
#[derive(Clone)]
pub struct ServiceController {
    inner: Arc<Inner>,
}

struct Inner {
    prefs: ServicePreferences,
    client: ServiceClient,
    executor: CommandExecutor,
    events: EventHub<ServiceEvent>,
    status: StatusCell,
    binary: Mutex<Option<PathBuf>>,
    /// The `serve` process this controller started
    child: tokio::sync::Mutex<Option<Child>>,
    /// Serializes `start` so two callers never spawn two servers
    start_lock: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<Monitor>>,
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(monitor) = lock(&self.monitor).take() {
            monitor.cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ServiceController {
    pub fn new(prefs: ServicePreferences) -> Self {
        Self::with_executor(prefs, CommandExecutor::new())
    }

    /// Controller whose version probes run through `executor`
    pub fn with_executor(prefs: ServicePreferences, executor: CommandExecutor) -> Self {
        let events = EventHub::new();
        Self {
            inner: Arc::new(Inner {
                client: ServiceClient::new(prefs.base_url.clone()),
                prefs,
                executor,
                status: StatusCell::new(ServiceStatus::NotInstalled, events.clone()),
                events,
                binary: Mutex::new(None),
                child: tokio::sync::Mutex::new(None),
                start_lock: tokio::sync::Mutex::new(()),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.inner.status.get()
    }

    /// Register for status changes and pull progress
    pub fn subscribe(&self) -> Subscription<ServiceEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventHub<ServiceEvent> {
        &self.inner.events
    }

    pub fn base_url(&self) -> &str {
        self.inner.client.base_url()
    }

    pub fn preferences(&self) -> &ServicePreferences {
        &self.inner.prefs
    }

    /// Binary found by the last discovery
    pub fn binary_path(&self) -> Option<PathBuf> {
        lock(&self.inner.binary).clone()
    }

    /// One health probe against the service
    pub async fn is_healthy(&self) -> bool {
        self.inner.client.is_healthy(self.inner.prefs.probe_timeout()).await
    }

    async fn locate(&self) -> Option<PathBuf> {
        let found = discovery::locate(&self.inner.executor, &self.inner.prefs).await;
        *lock(&self.inner.binary) = found.clone();
        found
    }

    /// Search for the binary and record `Installed` / `NotInstalled`
    ///
    /// A service that is running or starting keeps its status.
    pub async fn detect_install(&self) -> bool {
        let found = self.locate().await.is_some();
        if !matches!(self.status(), ServiceStatus::Running | ServiceStatus::Starting) {
            self.inner.status.set(installed_status(found));
        }
        found
    }

    /// Full re-evaluation: discovery plus one health probe
    pub async fn refresh(&self) -> ServiceStatus {
        if self.status() == ServiceStatus::Starting {
            return ServiceStatus::Starting;
        }

        let found = self.locate().await.is_some();
        let next = if self.is_healthy().await {
            ServiceStatus::Running
        } else {
            installed_status(found)
        };
        self.inner.status.set(next);
        next
    }

    /// One monitor tick
    ///
    /// A healthy service is `Running`. A `Running` service that stops
    /// answering is re-probed for installation. A start in progress is left
    /// alone, and `Error` sticks until the service answers again.
    pub async fn check_status(&self) -> ServiceStatus {
        let current = self.status();
        if current == ServiceStatus::Starting {
            return current;
        }

        if self.is_healthy().await {
            self.inner.status.set(ServiceStatus::Running);
            return ServiceStatus::Running;
        }

        if current == ServiceStatus::Running {
            info!("service stopped answering");
            self.reap_exited_child().await;
            let found = self.locate().await.is_some();
            self.inner.status.set(installed_status(found));
        }
        self.status()
    }

    /// Start `<binary> serve` and wait for it to answer
    ///
    /// Returns true once the service is healthy. A service that already
    /// answers is adopted without spawning anything.
    pub async fn start(&self) -> bool {
        let _guard = self.inner.start_lock.lock().await;

        if self.is_healthy().await {
            self.inner.status.set(ServiceStatus::Running);
            return true;
        }
        self.launch().await
    }

    /// Start a new `serve` child of our own, never adopting a running one
    ///
    /// An instance that still answers (one just killed and not yet gone)
    /// is waited out for the start budget. If it keeps answering the start
    /// fails with `Error`.
    pub async fn start_fresh(&self) -> bool {
        let _guard = self.inner.start_lock.lock().await;

        if !self.wait_until_down().await {
            warn!("previous service instance is still answering");
            self.inner.status.set(ServiceStatus::Error);
            return false;
        }
        self.launch().await
    }

    async fn wait_until_down(&self) -> bool {
        let prefs = &self.inner.prefs;
        for attempt in 1..=prefs.start_max_attempts {
            if !self.is_healthy().await {
                return true;
            }
            debug!(attempt, "previous service instance still answering");
            tokio::time::sleep(prefs.start_poll_interval()).await;
        }
        !self.is_healthy().await
    }

    /// Spawn `serve` and poll health; callers hold `start_lock`
    async fn launch(&self) -> bool {
        let binary = match self.binary_path() {
            Some(binary) => Some(binary),
            None => self.locate().await,
        };
        let Some(binary) = binary else {
            warn!(name = %self.inner.prefs.binary_name, "cannot start service: binary not found");
            self.inner.status.set(ServiceStatus::Error);
            return false;
        };

        self.inner.status.set(ServiceStatus::Starting);
        // Settles `Starting` to `Error` if this future is dropped mid-start
        let _pending = PendingStart(&self.inner.status);

        // A previous child that never became healthy
        if let Some(mut stale) = self.inner.child.lock().await.take() {
            tree::kill_tree(&mut stale).await;
        }

        let mut child = match spawn_serve(&binary) {
            Ok(child) => child,
            Err(e) => {
                warn!(binary = %binary.display(), error = %e, "failed to spawn service");
                self.inner.status.set(ServiceStatus::Error);
                return false;
            }
        };
        info!(pid = ?child.id(), binary = %binary.display(), "spawned service");

        let prefs = &self.inner.prefs;
        for attempt in 1..=prefs.start_max_attempts {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(code = ?status.code(), "service exited during startup");
                    self.inner.status.set(ServiceStatus::Error);
                    return false;
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "could not poll service child"),
            }

            if self.is_healthy().await {
                info!(attempt, "service is running");
                *self.inner.child.lock().await = Some(child);
                self.inner.status.set(ServiceStatus::Running);
                return true;
            }

            debug!(attempt, max = prefs.start_max_attempts, "service not ready yet");
            tokio::time::sleep(prefs.start_poll_interval()).await;
        }

        warn!(attempts = prefs.start_max_attempts, "service did not become healthy in time");
        tree::kill_tree(&mut child).await;
        self.inner.status.set(ServiceStatus::Error);
        false
    }

    /// Pid of the `serve` child this controller owns
    pub async fn child_pid(&self) -> Option<u32> {
        self.inner.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Force-kill the service child this controller spawned, then re-probe
    ///
    /// Returns whether there was a child to kill. A service started by
    /// someone else is left running.
    pub async fn stop(&self) -> bool {
        let child = self.inner.child.lock().await.take();
        let had_child = match child {
            Some(mut child) => {
                info!(pid = ?child.id(), "stopping service");
                tree::kill_tree(&mut child).await;
                true
            }
            None => false,
        };

        let next = if self.is_healthy().await {
            ServiceStatus::Running
        } else {
            installed_status(self.binary_path().is_some())
        };
        self.inner.status.set(next);
        had_child
    }

    /// Stop the monitor and the service child
    pub async fn shutdown(&self) {
        self.stop_monitor().await;
        self.stop().await;
    }

    /// Kill every process named like the service binary
    ///
    /// Returns true when at least one process was signalled.
    pub async fn kill_stale_instances(&self) -> bool {
        if let Some(mut child) = self.inner.child.lock().await.take() {
            tree::kill_tree(&mut child).await;
        }

        let platform = Platform::current();
        let (program, args) = platform.kill_by_name_invocation(&self.inner.prefs.binary_name);
        let command = platform.command_line(&program, &args);

        match self
            .inner
            .executor
            .run(&command, std::env::temp_dir(), self.inner.prefs.probe_timeout())
            .await
        {
            Ok(result) if result.success => {
                info!(name = %self.inner.prefs.binary_name, "killed stale service instances");
                true
            }
            Ok(_) => {
                debug!(name = %self.inner.prefs.binary_name, "no stale service instances");
                false
            }
            Err(e) => {
                warn!(error = %e, "could not look for stale service instances");
                false
            }
        }
    }

    /// Installed assets; empty when the service cannot be reached
    pub async fn list_assets(&self) -> Vec<Asset> {
        self.try_list_assets().await.unwrap_or_else(|e| {
            warn!(error = %e, "listing assets failed");
            Vec::new()
        })
    }

    pub async fn try_list_assets(&self) -> OrchestratorResult<Vec<Asset>> {
        self.inner.client.list_assets().await
    }

    /// Download an asset, broadcasting each progress snapshot
    ///
    /// A stream that ends without a verdict is settled by checking whether
    /// the asset now shows up in the listing.
    pub async fn pull_asset(&self, name: &str) -> bool {
        let events = self.inner.events.clone();
        let outcome = self
            .inner
            .client
            .pull(name, |progress| events.emit(ServiceEvent::PullProgress(progress)))
            .await;

        match outcome {
            Ok(PullOutcome::Succeeded) => {
                info!(asset = name, "pull finished");
                true
            }
            Ok(PullOutcome::Failed(error)) => {
                warn!(asset = name, error = %error, "pull failed");
                false
            }
            Ok(PullOutcome::Ended) => {
                debug!(asset = name, "pull ended without verdict, checking listing");
                self.verify_asset(name).await
            }
            Err(e) => {
                warn!(asset = name, error = %e, "pull request failed");
                false
            }
        }
    }

    /// Whether the listing contains `name`
    pub async fn verify_asset(&self, name: &str) -> bool {
        match self.try_list_assets().await {
            Ok(assets) => assets.iter().any(|a| asset_matches(&a.name, name)),
            Err(e) => {
                warn!(asset = name, error = %e, "could not verify asset");
                false
            }
        }
    }

    /// Run `check_status` every `interval` in the background
    ///
    /// Only one loop runs per controller; returns false if one already does.
    pub fn start_monitor(&self, interval: Duration) -> bool {
        let mut slot = lock(&self.inner.monitor);
        if slot.as_ref().is_some_and(|m| !m.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(inner) = weak.upgrade() else { break };
                let controller = ServiceController { inner };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = controller.check_status() => {}
                }
            }
            debug!("service monitor stopped");
        });

        debug!(?interval, "service monitor started");
        *slot = Some(Monitor { cancel, handle });
        true
    }

    /// Stop the monitor loop and wait for it to finish
    ///
    /// Returns whether a loop was running.
    pub async fn stop_monitor(&self) -> bool {
        let monitor = lock(&self.inner.monitor).take();
        match monitor {
            Some(monitor) => {
                monitor.cancel.cancel();
                let _ = monitor.handle.await;
                true
            }
            None => false,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.monitor)
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    async fn reap_exited_child(&self) {
        let mut slot = self.inner.child.lock().await;
        let exited = match slot.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        };
        if exited {
            debug!("service child has exited");
            *slot = None;
        }
    }
}

/// Moves a start abandoned while `Starting` to `Error`
struct PendingStart<'a>(&'a StatusCell);

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.0.get() == ServiceStatus::Starting {
            debug!("service start abandoned");
            self.0.set(ServiceStatus::Error);
        }
    }
}

fn installed_status(found: bool) -> ServiceStatus {
    if found {
        ServiceStatus::Installed
    } else {
        ServiceStatus::NotInstalled
    }
}

fn spawn_serve(binary: &Path) -> std::io::Result<Child> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tree::isolate(&mut cmd);

    let mut child = cmd.spawn()?;

    // The server logs on both streams; keep the pipes drained
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_lines(stdout, |line| debug!(target: "loclm::service::serve", "{}", line)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_lines(stderr, |line| debug!(target: "loclm::service::serve", "{}", line)));
    }

    Ok(child)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::service::discovery::tests::{prefs_with, write_fake_binary};
    use crate::service::mock::MockService;
    use crate::service::PullProgress;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tempfile::tempdir;

    const SERVE_FOREVER: &str = "case \"$1\" in --version) echo 'version 0.1.0';; serve) exec sleep 30;; esac";
    const SERVE_CRASH: &str = "case \"$1\" in --version) echo 'version 0.1.0';; serve) exit 1;; esac";

    fn statuses(sub: &mut Subscription<ServiceEvent>) -> Vec<ServiceStatus> {
        sub.drain()
            .into_iter()
            .filter_map(|e| match e {
                ServiceEvent::StatusChanged(s) => Some(s),
                ServiceEvent::PullProgress(_) => None,
            })
            .collect()
    }

    fn progress(sub: &mut Subscription<ServiceEvent>) -> Vec<PullProgress> {
        sub.drain()
            .into_iter()
            .filter_map(|e| match e {
                ServiceEvent::PullProgress(p) => Some(p),
                ServiceEvent::StatusChanged(_) => None,
            })
            .collect()
    }

    fn controller_for(url: &str, prefs: ServicePreferences) -> ServiceController {
        ServiceController::new(ServicePreferences {
            base_url: url.to_string(),
            start_poll_interval_ms: 50,
            probe_timeout_secs: 2,
            ..prefs
        })
    }

    #[tokio::test]
    async fn test_detect_install() {
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), SERVE_FOREVER);
        let controller = controller_for(&MockService::closed_url(), prefs_with(dir.path()));
        let mut sub = controller.subscribe();

        assert!(controller.detect_install().await);
        assert!(controller.detect_install().await);
        assert_eq!(statuses(&mut sub), vec![ServiceStatus::Installed]);
        assert!(controller.binary_path().is_some());
    }

    #[tokio::test]
    async fn test_start_budget_exhausted_is_error() {
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), SERVE_FOREVER);
        let controller = controller_for(
            &MockService::closed_url(),
            ServicePreferences {
                start_max_attempts: 3,
                ..prefs_with(dir.path())
            },
        );
        let mut sub = controller.subscribe();

        controller.detect_install().await;
        assert!(!controller.start().await);
        assert_eq!(
            statuses(&mut sub),
            vec![ServiceStatus::Installed, ServiceStatus::Starting, ServiceStatus::Error]
        );
    }

    #[tokio::test]
    async fn test_start_immediate_exit_is_error() {
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), SERVE_CRASH);
        let controller = controller_for(&MockService::closed_url(), prefs_with(dir.path()));

        let started = Instant::now();
        assert!(!controller.start().await);
        assert_eq!(controller.status(), ServiceStatus::Error);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_start_without_binary_is_error() {
        let dir = tempdir().unwrap();
        let controller = controller_for(&MockService::closed_url(), prefs_with(dir.path()));

        assert!(!controller.start().await);
        assert_eq!(controller.status(), ServiceStatus::Error);
    }

    #[tokio::test]
    async fn test_start_adopts_running_service() {
        let mock = MockService::start(|_, _, _| (200, r#"{"models":[]}"#.to_string()));
        let dir = tempdir().unwrap();
        let controller = controller_for(&mock.url, prefs_with(dir.path()));

        assert!(controller.start().await);
        assert_eq!(controller.status(), ServiceStatus::Running);
        assert!(!controller.stop().await);
    }

    #[tokio::test]
    async fn test_dropped_start_does_not_stay_starting() {
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), SERVE_FOREVER);
        let controller = controller_for(
            &MockService::closed_url(),
            ServicePreferences {
                start_max_attempts: 100,
                ..prefs_with(dir.path())
            },
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(300), controller.start()).await;
        assert!(abandoned.is_err());
        assert_eq!(controller.status(), ServiceStatus::Error);
        assert_eq!(controller.check_status().await, ServiceStatus::Error);
        assert_eq!(controller.refresh().await, ServiceStatus::Installed);
    }

    #[tokio::test]
    async fn test_start_fresh_never_adopts() {
        let mock = MockService::start(|_, _, _| (200, r#"{"models":[]}"#.to_string()));
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), SERVE_FOREVER);
        let controller = controller_for(
            &mock.url,
            ServicePreferences {
                start_max_attempts: 3,
                ..prefs_with(dir.path())
            },
        );

        assert!(!controller.start_fresh().await);
        assert_eq!(controller.status(), ServiceStatus::Error);
        assert!(controller.child_pid().await.is_none());
    }

    #[tokio::test]
    async fn test_start_fresh_waits_out_dying_instance() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("serving");
        write_fake_binary(
            dir.path(),
            &format!(
                "case \"$1\" in --version) echo 'version 0.1.0';; serve) touch '{}'; exec sleep 30;; esac",
                marker.display()
            ),
        );

        // Answers while the old instance winds down, then only once ours is up
        let dying = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&dying);
        let serving = marker.clone();
        let mock = MockService::start(move |_, _, _| {
            if flag.load(Ordering::SeqCst) || serving.exists() {
                (200, r#"{"models":[]}"#.to_string())
            } else {
                (503, String::new())
            }
        });
        let controller = controller_for(&mock.url, prefs_with(dir.path()));

        let winding_down = Arc::clone(&dying);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            winding_down.store(false, Ordering::SeqCst);
        });

        assert!(controller.start_fresh().await);
        assert!(marker.exists());
        assert!(controller.child_pid().await.is_some());
        assert!(controller.stop().await);
        assert!(controller.child_pid().await.is_none());
    }

    #[tokio::test]
    async fn test_check_status_follows_health() {
        let up = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&up);
        let mock = MockService::start(move |_, _, _| {
            if flag.load(Ordering::SeqCst) {
                (200, r#"{"models":[]}"#.to_string())
            } else {
                (503, String::new())
            }
        });
        let dir = tempdir().unwrap();
        let controller = controller_for(&mock.url, prefs_with(dir.path()));
        let mut sub = controller.subscribe();

        assert_eq!(controller.check_status().await, ServiceStatus::Running);
        up.store(false, Ordering::SeqCst);
        assert_eq!(controller.check_status().await, ServiceStatus::NotInstalled);
        assert_eq!(controller.check_status().await, ServiceStatus::NotInstalled);

        assert_eq!(
            statuses(&mut sub),
            vec![ServiceStatus::Running, ServiceStatus::NotInstalled]
        );
    }

    #[tokio::test]
    async fn test_refresh_reports_installed() {
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), SERVE_FOREVER);
        let controller = controller_for(&MockService::closed_url(), prefs_with(dir.path()));

        assert_eq!(controller.refresh().await, ServiceStatus::Installed);
    }

    #[tokio::test]
    async fn test_list_assets_best_effort() {
        let mock = MockService::start(|_, path, _| match path {
            "/api/tags" => (
                200,
                r#"{"models":[{"name":"llama3:latest","size":10},{"size":"huge"},{"name":"phi3:mini"}]}"#
                    .to_string(),
            ),
            _ => (404, String::new()),
        });
        let dir = tempdir().unwrap();
        let controller = controller_for(&mock.url, prefs_with(dir.path()));

        let names: Vec<String> = controller.list_assets().await.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["llama3:latest", "phi3:mini"]);

        let down = controller_for(&MockService::closed_url(), prefs_with(dir.path()));
        assert!(down.list_assets().await.is_empty());
    }

    #[tokio::test]
    async fn test_pull_success_sentinel() {
        let mock = MockService::start(|_, path, _| match path {
            "/api/pull" => (
                200,
                concat!(
                    "{\"status\":\"pulling manifest\"}\n",
                    "{\"status\":\"downloading\",\"completed\":50,\"total\":100}\n",
                    "garbage\n",
                    "{\"status\":\"success\"}\n",
                )
                .to_string(),
            ),
            _ => (404, String::new()),
        });
        let dir = tempdir().unwrap();
        let controller = controller_for(&mock.url, prefs_with(dir.path()));
        let mut sub = controller.subscribe();

        assert!(controller.pull_asset("llama3").await);

        let snapshots = progress(&mut sub);
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[1].percent, 50.0);
        assert!(snapshots[2].is_success());
    }

    #[tokio::test]
    async fn test_pull_without_sentinel_checks_listing() {
        let mock = MockService::start(|_, path, _| match path {
            "/api/pull" => (200, "{\"status\":\"verifying digest\"}\n".to_string()),
            "/api/tags" => (200, r#"{"models":[{"name":"llama3:latest"}]}"#.to_string()),
            _ => (404, String::new()),
        });
        let dir = tempdir().unwrap();
        let controller = controller_for(&mock.url, prefs_with(dir.path()));

        assert!(controller.pull_asset("llama3").await);
        assert!(!controller.pull_asset("mistral").await);
    }

    #[tokio::test]
    async fn test_pull_error_field_fails() {
        let mock = MockService::start(|_, path, _| match path {
            "/api/pull" => (200, "{\"error\":\"manifest unknown\"}\n".to_string()),
            // Would report success if the listing were consulted
            "/api/tags" => (200, r#"{"models":[{"name":"nope:latest"}]}"#.to_string()),
            _ => (404, String::new()),
        });
        let dir = tempdir().unwrap();
        let controller = controller_for(&mock.url, prefs_with(dir.path()));

        assert!(!controller.pull_asset("nope").await);
    }

    #[tokio::test]
    async fn test_single_monitor_loop() {
        let dir = tempdir().unwrap();
        let controller = controller_for(&MockService::closed_url(), prefs_with(dir.path()));

        assert!(controller.start_monitor(Duration::from_millis(20)));
        assert!(!controller.start_monitor(Duration::from_millis(20)));
        assert!(controller.is_monitoring());

        assert!(controller.stop_monitor().await);
        assert!(!controller.is_monitoring());
        assert!(!controller.stop_monitor().await);
        assert!(controller.start_monitor(Duration::from_millis(20)));
        controller.shutdown().await;
        assert!(!controller.is_monitoring());
    }
}
