//! Command line and file configuration for revisionmgrd

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rollout_common::{RateLimiterConfig, ResourceKind};
use serde::Deserialize;

use crate::error::{ControllerError, ControllerResult};
use crate::types::{name_collision, RevisionResource};

/// Default watch poll interval for polling backends
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable
    Pretty,
    /// One JSON object per line
    Json,
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process store; state is lost on exit
    Memory,
    /// Redis server
    Redis,
}

/// revisionmgrd command line
#[derive(Parser, Debug, Clone)]
#[command(name = "revisionmgrd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Target namespace (overrides the file)
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Object store backend
    #[arg(long, value_enum, default_value = "memory")]
    pub backend: Backend,

    /// Redis server host
    #[arg(long, default_value = "127.0.0.1")]
    pub redis_host: String,

    /// Redis server port
    #[arg(long, default_value = "6379")]
    pub redis_port: u16,

    /// Redis database index
    #[arg(long, default_value = "0")]
    pub redis_db: u32,

    /// Number of workers (only 1 is supported)
    #[arg(short = 'w', long, default_value = "1")]
    pub workers: usize,
}

/// Work queue backoff as written in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
        }
    }
}

/// YAML configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub namespace: Option<String>,
    pub config_maps: Vec<RevisionResource>,
    pub secrets: Vec<RevisionResource>,
    pub queue: QueueConfig,
    pub poll_interval_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            config_maps: Vec::new(),
            secrets: Vec::new(),
            queue: QueueConfig::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl FileConfig {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> ControllerResult<Self> {
        serde_yaml::from_str(text).map_err(|e| ControllerError::config("config", e.to_string()))
    }

    /// Read and parse a YAML file
    pub fn load(path: &Path) -> ControllerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::config("config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }
}

/// Fully resolved controller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub namespace: String,
    pub config_maps: Vec<RevisionResource>,
    pub secrets: Vec<RevisionResource>,
    pub queue: RateLimiterConfig,
    pub poll_interval: Duration,
    pub workers: usize,
}

impl ControllerConfig {
    /// Merge the file named by `args` (if any) with command line overrides
    pub fn resolve(args: &Args) -> ControllerResult<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::from_parts(file, args)
    }

    /// Merge an already parsed file with command line overrides
    pub fn from_parts(file: FileConfig, args: &Args) -> ControllerResult<Self> {
        let config = Self {
            namespace: args
                .namespace
                .clone()
                .or(file.namespace)
                .unwrap_or_default(),
            config_maps: file.config_maps,
            secrets: file.secrets,
            queue: RateLimiterConfig::from_millis(file.queue.base_delay_ms, file.queue.max_delay_ms),
            poll_interval: Duration::from_millis(file.poll_interval_ms),
            workers: args.workers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for obvious mistakes
    pub fn validate(&self) -> ControllerResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(ControllerError::config("namespace", "must not be empty"));
        }
        if self.config_maps.is_empty() && self.secrets.is_empty() {
            return Err(ControllerError::config(
                "config_maps/secrets",
                "at least one resource must be tracked",
            ));
        }
        check_names("config_maps", ResourceKind::ConfigMap, &self.config_maps)?;
        check_names("secrets", ResourceKind::Secret, &self.secrets)?;
        if self.queue.base_delay > self.queue.max_delay {
            return Err(ControllerError::config(
                "queue",
                "base_delay_ms must not exceed max_delay_ms",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ControllerError::config("poll_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

fn check_names(
    field: &str,
    kind: ResourceKind,
    resources: &[RevisionResource],
) -> ControllerResult<()> {
    let names: Vec<&str> = resources.iter().map(|r| r.name.as_str()).collect();
    let mut seen = HashSet::new();
    for resource in resources {
        if resource.name.trim().is_empty() {
            return Err(ControllerError::config(field, "resource name must not be empty"));
        }
        if !seen.insert(resource.name.as_str()) {
            return Err(ControllerError::config(
                field,
                format!("duplicate resource '{}'", resource.name),
            ));
        }
        if let Some(message) = name_collision(kind, &resource.name, &names) {
            return Err(ControllerError::config(field, message));
        }
    }
    Ok(())
}
