//! Configuration
//!
//! TOML file at `<config_dir>/overseer/config.toml`, every field
//! defaultable so a missing file is a working setup. The worker command
//! receives the composed contract on stdin and reports its result on
//! stdout; checker and classifier commands default to the worker command.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverseerConfig {
    /// Command launched for every doer session
    #[serde(default = "default_worker_command")]
    pub worker_command: String,

    /// Command for worker-kind checkers; the worker command when unset
    #[serde(default)]
    pub checker_command: Option<String>,

    /// Command for pass/fail classification of predecessor results; the
    /// worker command when unset
    #[serde(default)]
    pub classifier_command: Option<String>,

    /// Attempts per worker launch before the session aborts
    #[serde(default = "default_launch_attempts")]
    pub launch_attempts: u32,

    /// Fallback pacing between launch attempts
    #[serde(default = "default_launch_retry_delay_ms")]
    pub launch_retry_delay_ms: u64,

    /// Session store location; `OVERSEER_DIR` and then `./.overseer`
    /// apply when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        OverseerConfig {
            worker_command: default_worker_command(),
            checker_command: None,
            classifier_command: None,
            launch_attempts: default_launch_attempts(),
            launch_retry_delay_ms: default_launch_retry_delay_ms(),
            data_dir: None,
        }
    }
}

impl OverseerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OverseerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the default location; a missing or unreadable file yields
    /// defaults
    pub fn load_or_default() -> Self {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                if let Ok(config) = Self::load(&path) {
                    return config;
                }
            }
        }
        Self::default()
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("overseer").join("config.toml"))
    }

    pub fn checker_command(&self) -> &str {
        self.checker_command.as_deref().unwrap_or(&self.worker_command)
    }

    pub fn classifier_command(&self) -> &str {
        self.classifier_command
            .as_deref()
            .unwrap_or(&self.worker_command)
    }

    /// Where session records live: `OVERSEER_DIR`, then the configured
    /// directory, then `.overseer/` under the working directory
    pub fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("OVERSEER_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        PathBuf::from(".overseer")
    }
}

fn default_worker_command() -> String {
    "claude -p".to_string()
}

fn default_launch_attempts() -> u32 {
    3
}

fn default_launch_retry_delay_ms() -> u64 {
    500
}
