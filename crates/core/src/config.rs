//! Dispatcher configuration
//!
//! Stored as TOML in the user config directory:
//! ```toml
//! [dispatch]
//! debounce_window_ms = 1000
//! slow_source_threshold_ms = 250
//!
//! [executor]
//! kind = "thread"
//! pool_workers = 2
//! ```

use crate::error::{ConfigError, ExecError};
use crate::exec::{
    ExecutionContext, RuntimeContext, ThreadSpawnContext, UiAffinity, WorkerPoolContext,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which background execution context to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// One OS thread per job
    #[default]
    Thread,
    /// Fixed worker pool
    Pool,
    /// tokio blocking pool of the current runtime
    Runtime,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Pool => "pool",
            Self::Runtime => "runtime",
        }
    }

    /// Build the execution context this kind names
    pub fn build(
        self,
        pool_workers: usize,
        affinity: UiAffinity,
    ) -> Result<Arc<dyn ExecutionContext>, ExecError> {
        let ctx: Arc<dyn ExecutionContext> = match self {
            Self::Thread => Arc::new(ThreadSpawnContext::new(affinity)),
            Self::Pool => Arc::new(WorkerPoolContext::new(pool_workers, affinity)?),
            Self::Runtime => Arc::new(RuntimeContext::current(affinity)?),
        };
        Ok(ctx)
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thread" => Ok(Self::Thread),
            "pool" => Ok(Self::Pool),
            "runtime" => Ok(Self::Runtime),
            other => Err(ConfigError::Invalid {
                key: "executor.kind",
                message: format!("unknown executor '{}' (expected thread, pool or runtime)", other),
            }),
        }
    }
}

/// `[dispatch]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Quiet period before a debounced refresh fires (default: 1000)
    pub debounce_window_ms: u64,
    /// Source queries slower than this are logged (default: 250)
    pub slow_source_threshold_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            debounce_window_ms: 1000,
            slow_source_threshold_ms: 250,
        }
    }
}

/// `[executor]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub kind: ExecutorKind,
    /// Worker count for the pool executor (default: 2)
    pub pool_workers: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::Thread,
            pool_workers: 2,
        }
    }
}

/// Full configuration file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub dispatch: DispatchSection,
    pub executor: ExecutorSection,
}

impl DispatchConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from a file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate and write to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let text = self.to_toml_string()?;

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, text).map_err(write_err)
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "dispatch.debounce_window_ms",
            self.dispatch.debounce_window_ms,
            10,
            60_000,
        )?;
        check_range(
            "dispatch.slow_source_threshold_ms",
            self.dispatch.slow_source_threshold_ms,
            1,
            60_000,
        )?;
        check_range(
            "executor.pool_workers",
            self.executor.pool_workers as u64,
            1,
            64,
        )?;
        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.dispatch.debounce_window_ms)
    }

    pub fn slow_source_threshold(&self) -> Duration {
        Duration::from_millis(self.dispatch.slow_source_threshold_ms)
    }

    /// Build the configured execution context
    pub fn build_context(&self, affinity: UiAffinity) -> Result<Arc<dyn ExecutionContext>, ExecError> {
        self.executor.kind.build(self.executor.pool_workers, affinity)
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            key,
            message: format!("{} is outside {}..={}", value, min, max),
        });
    }
    Ok(())
}

/// Default location: `<config dir>/notigate/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("notigate").join("config.toml"))
}

/// Commented example configuration
pub fn example_config() -> String {
    r#"# notigate configuration

[dispatch]
# Quiet period after the last refresh request before the coalesced
# refresh runs (10-60000 ms)
debounce_window_ms = 1000

# Catch-up source queries slower than this are logged (1-60000 ms)
slow_source_threshold_ms = 250

[executor]
# Where notification work runs when requested from the UI thread:
# "thread" (one thread per job), "pool" or "runtime" (tokio blocking pool)
kind = "thread"

# Worker count for kind = "pool" (1-64)
pool_workers = 2
"#
    .to_string()
}
