//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Check the standard locations for a config file; use defaults when none
//!    exists
//! 2. Apply `STEADYCALL_*` environment overrides
//! 3. Validate the result
//!
//! ## Environment Variables
//! - `STEADYCALL_MAX_ATTEMPTS`: Attempt budget per execution
//! - `STEADYCALL_BASE_DELAY_MS`: Base backoff delay
//! - `STEADYCALL_MAX_DELAY_MS`: Backoff ceiling
//! - `STEADYCALL_TIMEOUT_MS`: Per-attempt deadline
//! - `STEADYCALL_STRATEGY`: `exponential`, `linear`, `fixed`, `fibonacci` or
//!   `adaptive`
//! - `STEADYCALL_STORAGE_ENABLED`: Persist attempts to SQLite (true/false)
//! - `STEADYCALL_DB_PATH`: Database file path
//! - `STEADYCALL_DB_POOL_SIZE`: Connection pool size
//! - `STEADYCALL_LOG_LEVEL`: Filter directive used when `RUST_LOG` is unset
//! - `STEADYCALL_LOG_FORMAT`: `pretty` or `json`
//!
//! ## File Locations
//! 1. `$STEADYCALL_CONFIG`
//! 2. `./steadycall.toml`
//! 3. `./steadycall.json`
//! 4. `./config/steadycall.toml`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use steadycall_core::{AppConfig, LogFormat, Result, RetryStrategy, SteadycallError};
use tracing::{debug, info};

const CONFIG_PATH_VAR: &str = "STEADYCALL_CONFIG";

/// Load configuration from the first config file found (or defaults), then the
/// environment.
///
/// # Errors
/// Returns `SteadycallError::Config` if the file cannot be read or parsed,
/// an override has an invalid value, or the merged config fails validation.
pub fn load() -> Result<AppConfig> {
    let config = match candidate_config_paths() {
        Some(path) => load_from_file(&path)?,
        None => {
            debug!("No config file found, starting from defaults");
            AppConfig::default()
        }
    };

    let config = apply_env_overrides(config)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a single config file. No environment overrides apply.
///
/// # Errors
/// Returns `SteadycallError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(SteadycallError::Config(format!("Config file not found: {}", path.display())));
    }

    info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| SteadycallError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration text; the format follows the extension of `path`
/// (`.toml`, or `.json` when missing).
pub fn parse_config(contents: &str, path: &Path) -> Result<AppConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| SteadycallError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| SteadycallError::Config(format!("Invalid JSON format: {e}"))),
        other => Err(SteadycallError::Config(format!("Unsupported config format: {other}"))),
    }
}

/// First existing config file among the standard locations
pub fn candidate_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(explicit) = std::env::var(CONFIG_PATH_VAR) {
        candidates.push(PathBuf::from(explicit));
    }

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend([
            cwd.join("steadycall.toml"),
            cwd.join("steadycall.json"),
            cwd.join("config").join("steadycall.toml"),
        ]);
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Apply `STEADYCALL_*` overrides from the process environment
pub fn apply_env_overrides(config: AppConfig) -> Result<AppConfig> {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides read through `lookup`
///
/// Unset variables leave the corresponding field untouched.
pub fn apply_overrides_from<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let retry = &mut config.engine.retry;
    if let Some(value) = parsed(&lookup, "STEADYCALL_MAX_ATTEMPTS")? {
        retry.max_attempts = value;
    }
    if let Some(value) = parsed(&lookup, "STEADYCALL_BASE_DELAY_MS")? {
        retry.base_delay_ms = value;
    }
    if let Some(value) = parsed(&lookup, "STEADYCALL_MAX_DELAY_MS")? {
        retry.max_delay_ms = value;
    }
    if let Some(value) = parsed(&lookup, "STEADYCALL_TIMEOUT_MS")? {
        retry.timeout_ms = value;
    }
    if let Some(raw) = lookup("STEADYCALL_STRATEGY") {
        retry.strategy = RetryStrategy::from_str(&raw)?;
    }

    let storage = &mut config.storage;
    if let Some(raw) = lookup("STEADYCALL_STORAGE_ENABLED") {
        storage.enabled = parse_bool("STEADYCALL_STORAGE_ENABLED", &raw)?;
    }
    if let Some(path) = lookup("STEADYCALL_DB_PATH") {
        storage.path = PathBuf::from(path);
    }
    if let Some(value) = parsed(&lookup, "STEADYCALL_DB_POOL_SIZE")? {
        storage.pool_size = value;
    }

    if let Some(level) = lookup("STEADYCALL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(raw) = lookup("STEADYCALL_LOG_FORMAT") {
        config.logging.format = LogFormat::from_str(&raw)?;
    }

    Ok(config)
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| SteadycallError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SteadycallError::Config(format!("Invalid value for {key}: {other}"))),
    }
}
