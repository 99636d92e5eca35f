//! Runtime configuration loaded from `plugin.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `PLUGIN_KEEPALIVE_SECS` in the environment takes precedence over the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "plugin.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds a watch may stay idle before keepalives are written.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Upper bound on worker threads running task hooks.
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
}

fn default_keepalive_secs() -> u64 {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_max_blocking_threads() -> usize {
    8
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            log_filter: default_log_filter(),
            max_blocking_threads: default_max_blocking_threads(),
        }
    }
}

impl RuntimeConfig {
    /// Loads `plugin.toml` from the working directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Loads `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<RuntimeConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(secs) = std::env::var("PLUGIN_KEEPALIVE_SECS")
            && !secs.is_empty()
        {
            config.keepalive_secs = secs
                .parse()
                .with_context(|| format!("PLUGIN_KEEPALIVE_SECS={secs} is not a number"))?;
        }

        Ok(config)
    }

    /// Keepalive interval; never shorter than one second.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}
