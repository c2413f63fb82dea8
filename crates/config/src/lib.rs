//! Configuration loading, validation and env substitution.
//!
//! Config files: `runbox.toml`, `runbox.yaml`, `runbox.yml` or `runbox.json`.
//! Searched in `./` then the user config directory (`~/.config/runbox/` on
//! Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config, load_or_discover},
    schema::{
        ContainerConfig, ExecutorConfig, LanguageConfig, MetricsConfig, RunboxConfig,
        ServerConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
