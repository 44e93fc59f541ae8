use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AgentError, Result};

/// Agent configuration, read from a TOML file by `run`.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Compiled kernel object (`sockbypass-ebpf-programs` build output)
    pub object: PathBuf,
    /// Directory the correlation maps are pinned under
    /// Default: "/sys/fs/bpf/tc/globals"
    #[serde(default = "default_pin_path")]
    pub pin_path: PathBuf,
    /// cgroup v2 directory for the sockops hook
    /// Default: None (the cgroup v2 root, or /sys/fs/cgroup/unified on hybrid hosts)
    #[serde(default)]
    pub cgroup_path: Option<PathBuf>,
    /// Interfaces whose egress carries the disable classifier,
    /// usually the pod's own interface
    /// Default: [] (no disable path)
    #[serde(default)]
    pub egress_interfaces: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    /// Can be overridden at runtime via RUST_LOG environment variable
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

pub fn default_pin_path() -> PathBuf {
    PathBuf::from("/sys/fs/bpf/tc/globals")
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| AgentError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| AgentError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.object.as_os_str().is_empty() {
        return Err(AgentError::Config("object path cannot be empty".into()));
    }
    if !cfg.object.is_file() {
        return Err(AgentError::Config(format!(
            "BPF object not found: {}",
            cfg.object.display()
        )));
    }

    if !cfg.pin_path.is_absolute() {
        return Err(AgentError::Config(format!(
            "pin_path must be absolute: {}",
            cfg.pin_path.display()
        )));
    }

    if let Some(cgroup) = &cfg.cgroup_path {
        if !cgroup.is_dir() {
            return Err(AgentError::Config(format!(
                "cgroup directory not found: {}",
                cgroup.display()
            )));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for iface in &cfg.egress_interfaces {
        if iface.trim().is_empty() {
            return Err(AgentError::Config("egress interface name cannot be empty".into()));
        }
        if !seen.insert(iface.as_str()) {
            return Err(AgentError::Config(format!("Duplicate egress interface: {iface}")));
        }
    }

    if !LOG_LEVELS.contains(&cfg.logging.level.as_str()) {
        return Err(AgentError::Config(format!(
            "Unknown log level: {}",
            cfg.logging.level
        )));
    }

    Ok(())
}
