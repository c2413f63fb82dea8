use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RunboxConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["runbox.toml", "runbox.yaml", "runbox.yml", "runbox.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RunboxConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load `explicit` if given, otherwise discover a config file.
///
/// An explicit path that cannot be loaded is an error; a discovered one falls
/// back to defaults with a warning. Returns the config and the file it came
/// from, if any.
pub fn load_or_discover(
    explicit: Option<&Path>,
) -> anyhow::Result<(RunboxConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading config");
        return Ok((load_config(path)?, Some(path.to_path_buf())));
    }
    let path = find_config_file();
    Ok((discover_and_load(), path))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./runbox.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/runbox/runbox.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RunboxConfig::default()` if no config file is found.
pub fn discover_and_load() -> RunboxConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    RunboxConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global
    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/runbox/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "runbox").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RunboxConfig> {
    match config_format(path)? {
        Format::Toml => Ok(toml::from_str(raw)?),
        Format::Yaml => Ok(serde_yaml::from_str(raw)?),
        Format::Json => Ok(serde_json::from_str(raw)?),
    }
}

/// Parse any supported format into a JSON value tree, for validation.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    match config_format(path)? {
        Format::Toml => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        Format::Yaml => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        Format::Json => Ok(serde_json::from_str(raw)?),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Toml,
    Yaml,
    Json,
}

pub(crate) fn config_format(path: &Path) -> anyhow::Result<Format> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(Format::Toml),
        "yaml" | "yml" => Ok(Format::Yaml),
        "json" => Ok(Format::Json),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
