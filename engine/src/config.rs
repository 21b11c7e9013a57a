//! Engine configuration.
//!
//! Loadable from a TOML file or built programmatically. Every field has a
//! default, so an empty file (or `Config::default()`) is a working
//! single-compute-thread setup.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory for temporary backing files.
    pub mount_dir: PathBuf,

    /// Cache memory budget in bytes.
    pub memory_budget: u64,

    /// I/O worker threads (fixed at startup).
    pub io_threads: usize,

    /// Initial compute threads (retunable at runtime).
    pub compute_threads: usize,

    /// Dispatcher tuning.
    pub scheduler: SchedulerConfig,

    /// Behavioral switches.
    pub options: SchedulerOptions,

    /// Logging setup.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_dir: PathBuf::from("."),
            memory_budget: 1 << 30,
            io_threads: 4,
            compute_threads: 1,
            scheduler: SchedulerConfig::default(),
            options: SchedulerOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Set the temp-file directory.
    pub fn with_mount_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mount_dir = dir.into();
        self
    }

    /// Set the cache budget in bytes.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Set the I/O worker count.
    pub fn with_io_threads(mut self, n: usize) -> Self {
        self.io_threads = n;
        self
    }

    /// Set the initial compute thread count.
    pub fn with_compute_threads(mut self, n: usize) -> Self {
        self.compute_threads = n;
        self
    }

    /// Replace the behavioral switches.
    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the dispatcher tuning.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

/// Dispatcher tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// In-memory task cap as a multiple of the compute thread count.
    /// Overlaps I/O with compute; the reference pipeline depth is 4.
    pub max_in_mem_factor: usize,

    /// Dispatcher sleep when the last iteration was busy, milliseconds.
    pub min_sleep_ms: u64,

    /// Dispatcher sleep when idle, milliseconds.
    pub max_sleep_ms: u64,

    /// Refresh priority ordering every N insertion rounds.
    pub prioritizer_update_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_mem_factor: 4,
            min_sleep_ms: 50,
            max_sleep_ms: 100,
            prioritizer_update_every: 1,
        }
    }
}

/// Behavioral switches, adjustable at runtime through
/// [`crate::Runtime::set_options`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerOptions {
    /// Order ready tasks by additional memory required. When false, FCFS.
    pub enable_prioritizer: bool,

    /// Detect write/write range overlap between concurrent I/O. When
    /// false, the caller takes responsibility via task-graph edges.
    pub enable_overlap_check: bool,

    /// Free zero-ref buffers immediately on release. For streaming
    /// workloads with no temporal locality.
    pub single_use_discard: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            enable_prioritizer: true,
            enable_overlap_check: true,
            single_use_discard: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable with ANSI colors.
    #[default]
    Pretty,
    /// Single-line compact output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter level; `RUST_LOG` takes precedence.
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Include thread names in events.
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            thread_names: false,
        }
    }
}
