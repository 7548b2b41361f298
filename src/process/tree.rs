//! Process tree isolation and termination
//!
//! Shells spawn children of their own, so killing only the top-level pid
//! can leave grandchildren holding our pipes. Children are started in their
//! own process group (Unix) and torn down as a tree according to the
//! platform's `KillStrategy`.

use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::core::{KillStrategy, Platform};

/// Signals the supervisor can send to a process tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSignal {
    /// Cooperative close request
    Terminate,
    /// Forced kill
    Kill,
}

/// Prepare a command so its whole tree can be signalled later
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Send a signal to the tree rooted at `pid`
pub async fn signal_tree(pid: u32, signal: TreeSignal) -> std::io::Result<()> {
    match Platform::current().kill {
        KillStrategy::ProcessGroup => signal_group(pid, signal),
        KillStrategy::TaskKill => taskkill(pid, signal).await,
    }
}

/// Kill the whole tree of `child` and reap it
///
/// Never fails: a tree that is already gone is the desired end state.
pub async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        debug!(pid, "killing process tree");
        if let Err(e) = signal_tree(pid, TreeSignal::Kill).await {
            warn!(pid, error = %e, "tree kill failed, falling back to direct kill");
        }
    }

    // Covers the direct child when the tree signal could not reach it
    let _ = child.start_kill();
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap killed child");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: TreeSignal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        TreeSignal::Terminate => Signal::SIGTERM,
        TreeSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from_raw_os_error(errno as i32)),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: TreeSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process groups are not available on this platform",
    ))
}

async fn taskkill(pid: u32, signal: TreeSignal) -> std::io::Result<()> {
    let mut cmd = Command::new("taskkill");
    match signal {
        TreeSignal::Terminate => cmd.args(["/PID", &pid.to_string()]),
        TreeSignal::Kill => cmd.args(["/T", "/F", "/PID", &pid.to_string()]),
    };
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        debug!(pid, code = ?status.code(), "taskkill reported failure");
    }
    Ok(())
}
