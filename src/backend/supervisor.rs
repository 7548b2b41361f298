//! Backend process supervision
//!
//! Keeps at most one backend child alive, forwards its output as events and
//! tears it down gracefully first, forcefully last. When the backend talks
//! to the local model service, a fresh service instance is brought up
//! before the backend starts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::env::{self, PASSTHROUGH_VARS, SERVICE_PROVIDER};
use crate::core::{BackendEvent, BackendPreferences, EventHub, OrchestratorError, OrchestratorResult, Platform, Subscription};
use crate::process::tree::{self, TreeSignal};
use crate::process::{exit_code_of, read_lines};
use crate::service::ServiceController;

/// Byte a terminal sends for Ctrl-C
const INTERRUPT: u8 = 0x03;
const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long output may keep draining after the child has exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// The live backend child and what we need to stop it
struct SupervisedProcess {
    pid: Option<u32>,
    env: Vec<(String, String)>,
    stdin: Option<ChildStdin>,
    /// Set before a requested stop so the exit is not reported as a crash
    stopping: Arc<AtomicBool>,
    /// Fires the owner task's forced kill
    kill: CancellationToken,
    /// Owner task; resolves once the child has been reaped
    task: JoinHandle<Option<i32>>,
}

impl SupervisedProcess {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Handle to the supervisor; clones share state
#[derive(Clone)]
pub struct BackendSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    prefs: BackendPreferences,
    service: Option<ServiceController>,
    events: EventHub<BackendEvent>,
    process: Mutex<Option<SupervisedProcess>>,
    /// Held across `start` and `stop` so only one of them runs at a time
    lifecycle: tokio::sync::Mutex<()>,
    /// Whether we brought up the model service ourselves
    started_service: AtomicBool,
    http: reqwest::Client,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BackendSupervisor {
    /// Supervisor whose service dependency, if any, is `service`
    pub fn new(prefs: BackendPreferences, service: Option<ServiceController>) -> Self {
        Self {
            inner: Arc::new(Inner {
                prefs,
                service,
                events: EventHub::new(),
                process: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                started_service: AtomicBool::new(false),
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Register for backend output and unexpected exits
    pub fn subscribe(&self) -> Subscription<BackendEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventHub<BackendEvent> {
        &self.inner.events
    }

    /// Whether a backend child is alive
    pub fn is_running(&self) -> bool {
        lock(&self.inner.process)
            .as_ref()
            .is_some_and(SupervisedProcess::is_alive)
    }

    /// Pid of the live backend child
    pub fn pid(&self) -> Option<u32> {
        lock(&self.inner.process)
            .as_ref()
            .filter(|p| p.is_alive())
            .and_then(|p| p.pid)
    }

    /// Environment the live child was started with
    pub fn injected_env(&self) -> Vec<(String, String)> {
        lock(&self.inner.process)
            .as_ref()
            .map(|p| p.env.clone())
            .unwrap_or_default()
    }

    /// Provider the backend will be started for
    pub fn provider(&self) -> Option<String> {
        env::provider(|key| std::env::var(key).ok(), self.inner.prefs.provider.as_deref())
    }

    /// Whether the backend needs the local model service
    pub fn uses_service(&self) -> bool {
        self.provider().as_deref() == Some(SERVICE_PROVIDER)
    }

    /// One probe of the backend's health endpoint
    pub async fn health(&self) -> bool {
        match self
            .inner
            .http
            .get(&self.inner.prefs.health_url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "backend health probe failed");
                false
            }
        }
    }

    /// Backend script to run: the configured one, else `backend/main.py`
    /// next to the executable, else under the current directory
    pub fn resolve_script(&self) -> Option<PathBuf> {
        if let Some(script) = &self.inner.prefs.script {
            return script.is_file().then(|| script.clone());
        }

        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let cwd = std::env::current_dir().ok();

        beside_exe
            .into_iter()
            .chain(cwd)
            .map(|dir| dir.join("backend").join("main.py"))
            .find(|candidate| candidate.is_file())
    }

    fn interpreter(&self) -> String {
        self.inner
            .prefs
            .interpreter
            .clone()
            .unwrap_or_else(|| Platform::current().python.to_string())
    }

    /// Start the backend; true if it is running afterwards
    ///
    /// Calling this while the backend is alive succeeds without spawning.
    /// Concurrent calls are serialized, so at most one child ever exists.
    pub async fn start(&self) -> bool {
        let _guard = self.inner.lifecycle.lock().await;

        if self.is_running() {
            debug!("backend already running");
            return true;
        }
        // Reap the slot of a child that died on its own
        lock(&self.inner.process).take();

        if self.uses_service() && !self.bring_up_service().await {
            warn!("model service unavailable, not starting backend");
            return false;
        }

        match self.spawn() {
            Ok(process) => {
                info!(pid = ?process.pid, "backend started");
                *lock(&self.inner.process) = Some(process);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to start backend");
                self.inner.events.emit(BackendEvent::Error {
                    line: e.to_string(),
                });
                false
            }
        }
    }

    /// Replace stale service instances with a fresh one and wait for it
    async fn bring_up_service(&self) -> bool {
        let Some(service) = &self.inner.service else {
            debug!("no service controller attached, skipping service start");
            return true;
        };

        service.kill_stale_instances().await;
        if !service.start_fresh().await {
            return false;
        }
        if service.child_pid().await.is_none() {
            warn!("model service answered but no fresh instance was spawned");
            return false;
        }
        self.inner.started_service.store(true, Ordering::SeqCst);

        let prefs = &self.inner.prefs;
        for attempt in 1..=prefs.dependency_poll_attempts {
            if service.is_healthy().await {
                debug!(attempt, "model service is healthy");
                return true;
            }
            tokio::time::sleep(prefs.dependency_poll_interval()).await;
        }
        warn!(attempts = prefs.dependency_poll_attempts, "model service did not answer");
        false
    }

    fn spawn(&self) -> OrchestratorResult<SupervisedProcess> {
        let script = self
            .resolve_script()
            .ok_or_else(|| {
                let wanted = self
                    .inner
                    .prefs
                    .script
                    .clone()
                    .unwrap_or_else(|| Path::new("backend").join("main.py"));
                OrchestratorError::MissingScript(wanted)
            })?;
        // The child runs from the script's directory, so the path must not be relative
        let script = script.canonicalize().unwrap_or(script);
        let interpreter = self.interpreter();
        let env = env::backend_env(self.inner.prefs.provider.as_deref());

        let mut cmd = Command::new(&interpreter);
        cmd.arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONUNBUFFERED", "1")
            .kill_on_drop(true);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        for key in PASSTHROUGH_VARS {
            cmd.env_remove(key);
        }
        cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        tree::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| OrchestratorError::Spawn {
            program: interpreter.clone(),
            source,
        })?;
        debug!(script = %script.display(), interpreter = %interpreter, "spawned backend");

        let pid = child.id();
        let stdin = child.stdin.take();
        let stopping = Arc::new(AtomicBool::new(false));
        let kill = CancellationToken::new();
        let task = self.spawn_owner(child, Arc::clone(&stopping), kill.clone());

        Ok(SupervisedProcess {
            pid,
            env,
            stdin,
            stopping,
            kill,
            task,
        })
    }

    /// Task owning the child: forwards output, reaps it, reports crashes
    fn spawn_owner(
        &self,
        mut child: Child,
        stopping: Arc<AtomicBool>,
        kill: CancellationToken,
    ) -> JoinHandle<Option<i32>> {
        let events = self.inner.events.clone();

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let events = events.clone();
            readers.push(tokio::spawn(read_lines(stdout, move |line| {
                debug!(target: "loclm::backend::output", "{}", line);
                events.emit(BackendEvent::Log { line });
            })));
        }
        if let Some(stderr) = child.stderr.take() {
            let events = events.clone();
            readers.push(tokio::spawn(read_lines(stderr, move |line| {
                debug!(target: "loclm::backend::output", "{}", line);
                events.emit(BackendEvent::Error { line });
            })));
        }

        tokio::spawn(async move {
            let exited = tokio::select! {
                biased;
                status = child.wait() => Some(status),
                _ = kill.cancelled() => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    tree::kill_tree(&mut child).await;
                    child.wait().await
                }
            };
            let exit_code = match status {
                Ok(status) => Some(exit_code_of(&status)),
                Err(e) => {
                    warn!(error = %e, "failed to wait for backend");
                    None
                }
            };

            for mut reader in readers {
                if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
                    reader.abort();
                }
            }

            if stopping.load(Ordering::SeqCst) {
                debug!(?exit_code, "backend stopped");
            } else {
                warn!(?exit_code, "backend exited unexpectedly");
                events.emit(BackendEvent::Exited { exit_code });
            }
            exit_code
        })
    }

    /// Stop the backend and any service instance we started for it
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;

        let process = lock(&self.inner.process).take();
        if let Some(process) = process {
            shutdown(process, &self.inner.prefs).await;
        }

        if self.inner.started_service.swap(false, Ordering::SeqCst) {
            if let Some(service) = &self.inner.service {
                info!("stopping model service started for the backend");
                service.stop().await;
            }
        }
    }
}

/// Interrupt, then ask to close, then kill; each step only if still alive
///
/// Failures of the graceful steps are logged and never skip the kill.
async fn shutdown(mut process: SupervisedProcess, prefs: &BackendPreferences) {
    process.stopping.store(true, Ordering::SeqCst);
    if !process.is_alive() {
        let _ = process.task.await;
        return;
    }

    if let Some(mut stdin) = process.stdin.take() {
        match tokio::time::timeout(STDIN_WRITE_TIMEOUT, stdin.write_all(&[INTERRUPT])).await {
            Ok(Ok(())) => debug!("sent interrupt to backend"),
            Ok(Err(e)) => debug!(error = %e, "could not write interrupt"),
            Err(_) => debug!("interrupt write timed out"),
        }
        // Dropping closes the pipe
        drop(stdin);
    }
    if wait_exit(&mut process.task, prefs.interrupt_grace()).await {
        return;
    }

    if let Some(pid) = process.pid {
        debug!(pid, "asking backend to close");
        if let Err(e) = tree::signal_tree(pid, TreeSignal::Terminate).await {
            warn!(pid, error = %e, "close request failed");
        }
    }
    if wait_exit(&mut process.task, prefs.close_grace()).await {
        return;
    }

    warn!(pid = ?process.pid, "backend ignored shutdown requests, killing");
    process.kill.cancel();
    if let Err(e) = process.task.await {
        warn!(error = %e, "backend owner task failed");
    }
}

/// Whether the owner task finished within `grace`
async fn wait_exit(task: &mut JoinHandle<Option<i32>>, grace: Duration) -> bool {
    tokio::time::timeout(grace, task).await.is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::ServicePreferences;
    use crate::service::discovery::tests::{prefs_with, write_fake_binary};
    use crate::service::mock::MockService;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("main.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn prefs(script: PathBuf) -> BackendPreferences {
        BackendPreferences {
            script: Some(script),
            interpreter: Some("/bin/sh".to_string()),
            provider: Some("groq".to_string()),
            interrupt_grace_ms: 200,
            close_grace_ms: 200,
            ..BackendPreferences::default()
        }
    }

    async fn next_event(sub: &mut Subscription<BackendEvent>) -> BackendEvent {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("backend event")
            .expect("hub alive")
    }

    #[tokio::test]
    async fn test_concurrent_start_spawns_once() {
        let dir = tempdir().unwrap();
        let starts = dir.path().join("starts");
        let body = format!("echo x >> '{}'\nsleep 30\n", starts.display());
        let supervisor = BackendSupervisor::new(prefs(script(&dir, &body)), None);

        let (a, b) = tokio::join!(supervisor.start(), supervisor.start());
        assert!(a && b);
        assert!(supervisor.start().await);
        assert!(supervisor.is_running());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let count = std::fs::read_to_string(&starts).unwrap().lines().count();
        assert_eq!(count, 1);

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_output_forwarded_and_exit_reported() {
        let dir = tempdir().unwrap();
        let supervisor = BackendSupervisor::new(
            prefs(script(&dir, "echo hello\necho oops >&2\nexit 3\n")),
            None,
        );
        let mut sub = supervisor.subscribe();

        assert!(supervisor.start().await);

        let mut events = Vec::new();
        loop {
            let event = next_event(&mut sub).await;
            let done = matches!(event, BackendEvent::Exited { .. });
            events.push(event);
            if done {
                break;
            }
        }

        assert!(events.contains(&BackendEvent::Log { line: "hello".to_string() }));
        assert!(events.contains(&BackendEvent::Error { line: "oops".to_string() }));
        assert_eq!(events.last(), Some(&BackendEvent::Exited { exit_code: Some(3) }));

        // The owner task returns right after reporting
        for _ in 0..50 {
            if !supervisor.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_interrupt_ends_cooperative_backend() {
        let dir = tempdir().unwrap();
        // Exits as soon as its stdin is closed
        let supervisor = BackendSupervisor::new(
            BackendPreferences {
                interrupt_grace_ms: 3000,
                close_grace_ms: 3000,
                ..prefs(script(&dir, "cat > /dev/null\necho bye\n"))
            },
            None,
        );
        let mut sub = supervisor.subscribe();
        assert!(supervisor.start().await);

        let started = Instant::now();
        supervisor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!supervisor.is_running());

        // A requested stop is not a crash
        let events = sub.drain();
        assert!(!events.iter().any(|e| matches!(e, BackendEvent::Exited { .. })));
    }

    #[tokio::test]
    async fn test_stubborn_backend_is_killed() {
        let dir = tempdir().unwrap();
        let supervisor = BackendSupervisor::new(
            prefs(script(&dir, "trap '' INT TERM\nwhile true; do sleep 0.1; done\n")),
            None,
        );
        assert!(supervisor.start().await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        supervisor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_missing_script_fails() {
        let dir = tempdir().unwrap();
        let supervisor = BackendSupervisor::new(prefs(dir.path().join("absent.py")), None);
        let mut sub = supervisor.subscribe();

        assert!(!supervisor.start().await);
        assert!(!supervisor.is_running());
        assert!(matches!(sub.try_recv(), Some(BackendEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_unavailable_service_blocks_start() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let body = format!("touch '{}'\n", marker.display());

        let service = ServiceController::new(ServicePreferences {
            base_url: "http://127.0.0.1:9".to_string(),
            binary_name: "loclm-absent-service".to_string(),
            probe_timeout_secs: 1,
            ..ServicePreferences::default()
        });
        let supervisor = BackendSupervisor::new(
            BackendPreferences {
                provider: Some("ollama".to_string()),
                ..prefs(script(&dir, &body))
            },
            Some(service),
        );

        assert!(supervisor.uses_service());
        assert!(!supervisor.start().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_service_backend_starts_after_fresh_service() {
        let dir = tempdir().unwrap();
        let serving = dir.path().join("serving");
        let spawned = dir.path().join("spawned");
        write_fake_binary(
            dir.path(),
            &format!(
                "case \"$1\" in --version) echo 'version 0.1.0';; serve) touch '{}'; exec sleep 30;; esac",
                serving.display()
            ),
        );

        let up = serving.clone();
        let mock = MockService::start(move |_, _, _| {
            if up.exists() {
                (200, r#"{"models":[]}"#.to_string())
            } else {
                (503, String::new())
            }
        });
        let service = ServiceController::new(ServicePreferences {
            base_url: mock.url.clone(),
            start_poll_interval_ms: 50,
            probe_timeout_secs: 2,
            ..prefs_with(dir.path())
        });
        let supervisor = BackendSupervisor::new(
            BackendPreferences {
                provider: Some("ollama".to_string()),
                dependency_poll_interval_ms: 50,
                ..prefs(script(&dir, &format!("touch '{}'\nsleep 30\n", spawned.display())))
            },
            Some(service.clone()),
        );

        assert!(supervisor.start().await);
        assert!(supervisor.is_running());
        let service_pid = service.child_pid().await.expect("fresh service child");

        for _ in 0..50 {
            if spawned.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(spawned.exists());

        supervisor.stop().await;
        assert!(!supervisor.is_running());
        assert!(service.child_pid().await.is_none());
        // Reaped by the kill, so the pid no longer names a process
        let signalled = nix::sys::signal::kill(nix::unistd::Pid::from_raw(service_pid as i32), None);
        assert!(signalled.is_err());
    }

    #[tokio::test]
    async fn test_injected_env_omits_blank_provider() {
        let dir = tempdir().unwrap();
        let supervisor = BackendSupervisor::new(prefs(script(&dir, "sleep 30\n")), None);
        assert!(supervisor.start().await);

        let env = supervisor.injected_env();
        assert!(env.contains(&("LLM_PROVIDER".to_string(), "groq".to_string())));
        assert!(env.iter().all(|(_, v)| !v.trim().is_empty()));

        supervisor.stop().await;
    }
}
