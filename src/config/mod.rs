//! Configuration module for relquery.
//!
//! Handles the settings file and environment variable expansion.

mod settings;

pub use settings::{expand_env_vars, CacheSettings, CompilerSettings, Settings, SettingsError};
