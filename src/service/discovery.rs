//! Locating the service binary
//!
//! Candidates are tried in order: the PATH-resident binary, directories from
//! the configuration, then the platform's well-known install locations.
//! A candidate counts only if `<binary> --version` succeeds.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{Platform, ServicePreferences};
use crate::process::CommandExecutor;

/// Ordered, de-duplicated list of paths that might hold the binary
pub fn candidates(prefs: &ServicePreferences) -> Vec<PathBuf> {
    let platform = Platform::current();
    let exe = platform.executable_name(&prefs.binary_name);

    let mut found = Vec::new();
    if let Ok(path) = which::which(&exe) {
        found.push(path);
    }

    let dirs = prefs
        .extra_search_dirs
        .iter()
        .cloned()
        .chain(platform.service_search_dirs());
    for dir in dirs {
        let path = dir.join(&exe);
        if path.is_file() && !found.contains(&path) {
            found.push(path);
        }
    }

    found
}

/// Whether `binary --version` exits successfully within `timeout`
pub async fn probe(executor: &CommandExecutor, binary: &Path, timeout: Duration) -> bool {
    let platform = Platform::current();
    let command = platform.command_line(&binary.to_string_lossy(), &["--version".to_string()]);

    match executor.run(&command, std::env::temp_dir(), timeout).await {
        Ok(result) if result.success => {
            debug!(binary = %binary.display(), version = %result.stdout.trim(), "version probe succeeded");
            true
        }
        Ok(result) => {
            debug!(binary = %binary.display(), exit_code = result.exit_code, "version probe failed");
            false
        }
        Err(e) => {
            debug!(binary = %binary.display(), error = %e, "version probe could not run");
            false
        }
    }
}

/// First candidate that passes the version probe
pub async fn locate(executor: &CommandExecutor, prefs: &ServicePreferences) -> Option<PathBuf> {
    for candidate in candidates(prefs) {
        if probe(executor, &candidate, prefs.probe_timeout()).await {
            info!(binary = %candidate.display(), "found service binary");
            return Some(candidate);
        }
    }
    debug!(name = %prefs.binary_name, "service binary not found");
    None
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Name no real install will carry, so PATH lookup always misses
    pub(crate) const FAKE_BINARY: &str = "loclm-fake-service";

    /// Write an executable shell script named `FAKE_BINARY` into `dir`
    pub(crate) fn write_fake_binary(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join(FAKE_BINARY);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub(crate) fn prefs_with(dir: &Path) -> ServicePreferences {
        ServicePreferences {
            binary_name: FAKE_BINARY.to_string(),
            extra_search_dirs: vec![dir.to_path_buf()],
            ..ServicePreferences::default()
        }
    }

    #[tokio::test]
    async fn test_locate_in_extra_dir() {
        let dir = tempdir().unwrap();
        let binary = write_fake_binary(dir.path(), "echo 'version 0.1.0'");

        let found = locate(&CommandExecutor::new(), &prefs_with(dir.path())).await;
        assert_eq!(found, Some(binary));
    }

    #[tokio::test]
    async fn test_failing_probe_rejects_candidate() {
        let dir = tempdir().unwrap();
        write_fake_binary(dir.path(), "exit 1");

        let prefs = prefs_with(dir.path());
        assert_eq!(candidates(&prefs).len(), 1);
        assert!(locate(&CommandExecutor::new(), &prefs).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempdir().unwrap();
        let prefs = prefs_with(dir.path());

        assert!(candidates(&prefs).is_empty());
        assert!(locate(&CommandExecutor::new(), &prefs).await.is_none());
    }
}
