//! Catch-up gated, debounced dispatch for notification refreshes
//!
//! This crate provides:
//! - Catch-up sources and the gate that ANDs them into one verdict
//! - A debounced dispatcher with a single pending-task slot
//! - Execution contexts that keep work off the UI thread
//! - TOML configuration for windows and executors

pub mod catchup;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exec;

// Re-exports
pub use catchup::{CatchUpGate, CatchUpSource, CaughtUpFlag, ChannelCatchUp, SourceSlot};
pub use config::{DispatchConfig, ExecutorKind};
pub use dispatch::{DebouncedDispatcher, DispatchStats};
pub use error::{CatchUpError, ConfigError, ExecError};
pub use exec::{
    run_now, ExecutionContext, InlineContext, Job, RuntimeContext, ThreadSpawnContext,
    UiAffinity, WorkerPoolContext,
};
