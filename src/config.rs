//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - vgraph.toml (default configuration)
//! - vgraph.local.toml (git-ignored local overrides)
//! - Environment variables (VGRAPH_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # vgraph.toml
//! [engine]
//! cartesian_product_cap = 100000
//! columnar = false
//! query_timeout_secs = 60
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! VGRAPH_ENGINE__COLUMNAR=true
//! VGRAPH_ENGINE__CARTESIAN_PRODUCT_CAP=0
//! ```

use crate::exec::ExecOptions;
use crate::vg::GraphSettings;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query-engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on unconstrained cross products; 0 disables the cap
    #[serde(default = "default_cartesian_cap")]
    pub cartesian_product_cap: usize,

    /// Use the columnar Arrow executor where the plan compiles
    #[serde(default)]
    pub columnar: bool,

    /// Per-query deadline in seconds; 0 disables the deadline
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Threads reserved for blocking table I/O (minimum 2)
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,

    /// Disable to evaluate every constraint as a residual filter
    #[serde(default = "default_true")]
    pub pushdown: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_cartesian_cap() -> usize {
    100_000
}
fn default_query_timeout() -> u64 {
    60
}
fn default_io_threads() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cartesian_product_cap: default_cartesian_cap(),
            columnar: false,
            query_timeout_secs: default_query_timeout(),
            io_threads: default_io_threads(),
            pushdown: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. vgraph.toml (base configuration)
    /// 2. vgraph.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (VGRAPH_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("vgraph.toml"))
            .merge(Toml::file("vgraph.local.toml"))
            .merge(Env::prefixed("VGRAPH_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VGRAPH_").split("__"))
            .extract()
    }

    /// Resolve the per-graph runtime settings this configuration implies
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            exec: ExecOptions {
                cartesian_cap: match self.engine.cartesian_product_cap {
                    0 => None,
                    cap => Some(cap),
                },
                columnar: self.engine.columnar,
            },
            query_timeout: match self.engine.query_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            pushdown: self.engine.pushdown,
            io_threads: self.engine.io_threads,
        }
    }
}

/// Install a `tracing` subscriber honoring the configured level and the
/// `RUST_LOG` environment variable. Call once at startup; embedded hosts
/// that install their own subscriber skip this.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
