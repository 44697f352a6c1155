//! Runtime configuration
//!
//! Coordination windows are tunable constants rather than semantics. They can
//! be supplied from a TOML document:
//!
//! ```toml
//! [timing]
//! render_debounce_ms = 5
//! child_render_debounce_ms = 10
//!
//! [equality]
//! max_depth = 32
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ComponentError, Result};

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub equality: EqualityConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Coalescing and deferral windows, in milliseconds of scheduler time
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimingConfig {
    /// Window that collapses same-tick state/props/children/context updates
    #[serde(default = "default_render_debounce")]
    pub render_debounce_ms: u64,
    /// Window applied to a sub-component's gated view
    #[serde(default = "default_child_render_debounce")]
    pub child_render_debounce_ms: u64,
    /// Delay applied to BOOTSTRAP and intent-derived actions
    #[serde(default = "default_bootstrap_delay")]
    pub bootstrap_delay_ms: u64,
    /// Default delay for `next()` dispatch
    #[serde(default = "default_next_delay")]
    pub next_delay_ms: u64,
}

fn default_render_debounce() -> u64 {
    5
}

fn default_child_render_debounce() -> u64 {
    10
}

fn default_bootstrap_delay() -> u64 {
    10
}

fn default_next_delay() -> u64 {
    10
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            render_debounce_ms: default_render_debounce(),
            child_render_debounce_ms: default_child_render_debounce(),
            bootstrap_delay_ms: default_bootstrap_delay(),
            next_delay_ms: default_next_delay(),
        }
    }
}

/// Deep-equality settings used for render and context deduplication
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EqualityConfig {
    /// Recursion bound; deeper structures compare as not equal
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    crate::equality::MAX_EQUALITY_DEPTH
}

impl Default for EqualityConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Scheduler guard rails
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_tasks")]
    pub max_tasks_per_run: usize,
}

fn default_max_tasks() -> usize {
    rill_stream::scheduler::DEFAULT_TASK_LIMIT
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_run: default_max_tasks(),
        }
    }
}

impl RuntimeConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ComponentError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ComponentError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }
}
