//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/drift/config.toml or
/// /etc/drift/config.toml. Env overrides: DRIFT_DEVICE_NAME,
/// DRIFT_DISCOVERY_PORT, DRIFT_TRANSFER_PORT, DRIFT_SAVE_DIR,
/// DRIFT_ACCEPT_TIMEOUT_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name other devices see in discovery (default: $HOSTNAME or "drift").
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Discovery UDP port (default 47316).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transfer TCP port (default 47317).
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    /// Directory received files land in (default ~/Downloads/drift).
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// How long the receiver waits for a sender, in seconds (default 120).
    #[serde(default = "default_accept_timeout_secs")]
    pub accept_timeout_secs: u64,
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "drift".into())
}
fn default_discovery_port() -> u16 {
    47316
}
fn default_transfer_port() -> u16 {
    47317
}
fn default_save_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("Downloads/drift"),
        None => PathBuf::from("drift-inbox"),
    }
}
fn default_accept_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            discovery_port: default_discovery_port(),
            transfer_port: default_transfer_port(),
            save_dir: default_save_dir(),
            accept_timeout_secs: default_accept_timeout_secs(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("DRIFT_DEVICE_NAME") {
        if !s.is_empty() {
            c.device_name = s;
        }
    }
    if let Ok(s) = std::env::var("DRIFT_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("DRIFT_TRANSFER_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transfer_port = p;
        }
    }
    if let Ok(s) = std::env::var("DRIFT_SAVE_DIR") {
        if !s.is_empty() {
            c.save_dir = PathBuf::from(s);
        }
    }
    if let Ok(s) = std::env::var("DRIFT_ACCEPT_TIMEOUT_SECS") {
        if let Ok(t) = s.parse::<u64>() {
            c.accept_timeout_secs = t;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/drift/config.toml"));
    }
    out.push(PathBuf::from("/etc/drift/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
