//! Configuration management with YAML persistence

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Terminal session preferences
    #[serde(default)]
    pub terminal: TerminalPreferences,

    /// Model service preferences
    #[serde(default)]
    pub service: ServicePreferences,

    /// Backend process preferences
    #[serde(default)]
    pub backend: BackendPreferences,
}

/// Terminal session preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalPreferences {
    /// Per-command timeout used when the caller gives none
    #[serde(default = "default_command_timeout")]
    pub default_timeout_secs: u64,

    /// Working directory for new sessions (home directory when unset)
    #[serde(default)]
    pub default_cwd: Option<PathBuf>,

    /// Maximum number of lines kept per session
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
}

/// Model service preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePreferences {
    /// Base URL of the service's HTTP surface
    #[serde(default = "default_service_url")]
    pub base_url: String,

    /// Name of the service binary, without platform suffix
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Timeout for the `--version` probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Delay between health polls while starting
    #[serde(default = "default_start_poll_interval")]
    pub start_poll_interval_ms: u64,

    /// Health polls before a start is declared failed
    #[serde(default = "default_start_attempts")]
    pub start_max_attempts: u32,

    /// Interval of the background status monitor
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// Directories searched before the platform's well-known locations
    #[serde(default)]
    pub extra_search_dirs: Vec<PathBuf>,
}

/// Backend process preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendPreferences {
    /// Explicit path to the backend script
    #[serde(default)]
    pub script: Option<PathBuf>,

    /// Interpreter override (platform default when unset)
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Health endpoint of the backend
    #[serde(default = "default_backend_health_url")]
    pub health_url: String,

    /// Provider override; `LLM_PROVIDER` is consulted when unset
    #[serde(default)]
    pub provider: Option<String>,

    /// Wait after the interrupt before escalating
    #[serde(default = "default_interrupt_grace")]
    pub interrupt_grace_ms: u64,

    /// Wait after the close request before force-killing
    #[serde(default = "default_close_grace")]
    pub close_grace_ms: u64,

    /// Health polls of the model service before launching the backend
    #[serde(default = "default_dependency_attempts")]
    pub dependency_poll_attempts: u32,

    /// Delay between dependency health polls
    #[serde(default = "default_dependency_interval")]
    pub dependency_poll_interval_ms: u64,
}

// Default value functions for serde
fn default_command_timeout() -> u64 {
    30
}

fn default_log_buffer_size() -> usize {
    10000
}

fn default_service_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_binary_name() -> String {
    "ollama".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_start_poll_interval() -> u64 {
    1000
}

fn default_start_attempts() -> u32 {
    30
}

fn default_monitor_interval() -> u64 {
    5
}

fn default_backend_health_url() -> String {
    "http://127.0.0.1:8000/health".to_string()
}

fn default_interrupt_grace() -> u64 {
    3000
}

fn default_close_grace() -> u64 {
    2000
}

fn default_dependency_attempts() -> u32 {
    10
}

fn default_dependency_interval() -> u64 {
    500
}

impl Default for TerminalPreferences {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_command_timeout(),
            default_cwd: None,
            log_buffer_size: default_log_buffer_size(),
        }
    }
}

impl Default for ServicePreferences {
    fn default() -> Self {
        Self {
            base_url: default_service_url(),
            binary_name: default_binary_name(),
            probe_timeout_secs: default_probe_timeout(),
            start_poll_interval_ms: default_start_poll_interval(),
            start_max_attempts: default_start_attempts(),
            monitor_interval_secs: default_monitor_interval(),
            extra_search_dirs: Vec::new(),
        }
    }
}

impl Default for BackendPreferences {
    fn default() -> Self {
        Self {
            script: None,
            interpreter: None,
            health_url: default_backend_health_url(),
            provider: None,
            interrupt_grace_ms: default_interrupt_grace(),
            close_grace_ms: default_close_grace(),
            dependency_poll_attempts: default_dependency_attempts(),
            dependency_poll_interval_ms: default_dependency_interval(),
        }
    }
}

impl TerminalPreferences {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Working directory for a new session
    pub fn initial_cwd(&self) -> PathBuf {
        self.default_cwd
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl ServicePreferences {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

impl BackendPreferences {
    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn dependency_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dependency_poll_interval_ms)
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loclm")
            .join("config.yaml")
    }

    /// Load configuration from file, then apply environment overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let path = path.unwrap_or_else(Self::default_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// `OLLAMA_URL` wins over the configured service URL
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            if !url.trim().is_empty() {
                self.service.base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
    }
}
