//! Configuration management command
//!
//! Provides CLI interface to view and edit dispatcher configuration.

use anyhow::{Context, Result};
use notigate_core::config::example_config;
use notigate_core::{DispatchConfig, ExecutorKind};
use owo_colors::OwoColorize;
use std::path::Path;

/// Keys accepted by `--get` and `--set`
pub const KEYS: [&str; 4] = [
    "dispatch.debounce_window_ms",
    "dispatch.slow_source_threshold_ms",
    "executor.kind",
    "executor.pool_workers",
];

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "Unknown config key: {}. Valid keys: {}",
        key,
        KEYS.join(", ")
    )
}

fn load(path: &Path) -> Result<DispatchConfig> {
    DispatchConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Read one value by dotted key
pub fn get_value(config: &DispatchConfig, key: &str) -> Result<String> {
    let value = match key {
        "dispatch.debounce_window_ms" => config.dispatch.debounce_window_ms.to_string(),
        "dispatch.slow_source_threshold_ms" => config.dispatch.slow_source_threshold_ms.to_string(),
        "executor.kind" => config.executor.kind.to_string(),
        "executor.pool_workers" => config.executor.pool_workers.to_string(),
        _ => return Err(unknown_key(key)),
    };
    Ok(value)
}

/// Update one value by dotted key and re-validate
pub fn set_value(config: &mut DispatchConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "dispatch.debounce_window_ms" => {
            config.dispatch.debounce_window_ms = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "dispatch.slow_source_threshold_ms" => {
            config.dispatch.slow_source_threshold_ms = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "executor.kind" => {
            config.executor.kind = value.parse::<ExecutorKind>()?;
        }
        "executor.pool_workers" => {
            config.executor.pool_workers = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        _ => return Err(unknown_key(key)),
    }

    config.validate().context("Invalid configuration value")?;
    Ok(())
}

/// List all configuration values
pub async fn run_list(path: &Path) -> Result<()> {
    let config = load(path)?;

    println!("{}", "Dispatch Configuration".bold());
    let note = if path.exists() { "" } else { " (not created, showing defaults)" };
    println!(
        "{}: {}{}\n",
        "Location".dimmed(),
        path.display().dimmed(),
        note.dimmed()
    );

    println!("{}", "[dispatch]".yellow());
    println!(
        "  {} = {} {}",
        "debounce_window_ms".cyan(),
        config.dispatch.debounce_window_ms,
        format!("({:?})", config.debounce_window()).dimmed()
    );
    println!(
        "  {} = {}",
        "slow_source_threshold_ms".cyan(),
        config.dispatch.slow_source_threshold_ms
    );

    println!("\n{}", "[executor]".yellow());
    println!("  {} = {}", "kind".cyan(), config.executor.kind);
    println!(
        "  {} = {} {}",
        "pool_workers".cyan(),
        config.executor.pool_workers,
        if config.executor.kind == ExecutorKind::Pool {
            String::new()
        } else {
            "(unused unless kind = pool)".dimmed().to_string()
        }
    );

    println!("\n{}", "Valid Ranges:".bold());
    println!("  debounce_window_ms: 10-60,000");
    println!("  slow_source_threshold_ms: 1-60,000");
    println!("  kind: thread | pool | runtime");
    println!("  pool_workers: 1-64");

    Ok(())
}

/// Get a single configuration value
pub async fn run_get(path: &Path, key: &str) -> Result<()> {
    let config = load(path)?;
    println!("{}", get_value(&config, key)?);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut config = load(path)?;
    set_value(&mut config, key, value)?;

    config
        .save(path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    Ok(())
}

/// Show the config file path
pub async fn run_path(path: &Path) -> Result<()> {
    println!("{}", path.display());
    if !path.exists() {
        println!(
            "{}",
            "File does not exist. Defaults apply until a value is set.".yellow()
        );
    }
    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", example_config());
    Ok(())
}
