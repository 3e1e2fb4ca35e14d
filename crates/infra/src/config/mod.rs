//! Configuration loading
//!
//! Reads an [`AppConfig`](steadycall_core::AppConfig) from a TOML or JSON
//! file and layers `STEADYCALL_*` environment overrides on top.

pub mod loader;

pub use loader::{
    apply_env_overrides, apply_overrides_from, load, load_from_file, parse_config,
    candidate_config_paths,
};
