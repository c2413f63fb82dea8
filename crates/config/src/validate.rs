//! Configuration validation engine.
//!
//! Checks a config file for syntax errors, unknown or misspelled fields, type
//! errors and settings that would leave the executor unable to serve.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    env_subst::substitute_env,
    loader::{config_format, parse_config_value},
    schema::RunboxConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "invalid-value",
    /// "security", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "executor.pool_size"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Expected shape of the configuration.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with dynamic keys whose values have a known shape.
    Map(Box<KnownKeys>),
    /// Scalar or list of scalars; stop recursion.
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let language = Struct(HashMap::from([
        ("image", Leaf),
        ("extension", Leaf),
        ("compile", Leaf),
        ("run", Leaf),
        ("artifacts", Leaf),
    ]));

    Struct(HashMap::from([
        (
            "server",
            Struct(HashMap::from([
                ("bind", Leaf),
                ("port", Leaf),
                ("max_request_bytes", Leaf),
            ])),
        ),
        (
            "executor",
            Struct(HashMap::from([
                ("pool_size", Leaf),
                ("execution_timeout_secs", Leaf),
                ("acquire_timeout_secs", Leaf),
                ("drain_timeout_secs", Leaf),
                ("max_output_bytes", Leaf),
                ("timeout_policy", Leaf),
                ("staging_dir", Leaf),
                ("enabled_languages", Leaf),
            ])),
        ),
        (
            "container",
            Struct(HashMap::from([
                ("cli", Leaf),
                ("cpus", Leaf),
                ("memory", Leaf),
                ("pids_limit", Leaf),
                ("no_network", Leaf),
                ("stop_grace_secs", Leaf),
                ("idle_command", Leaf),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([("enabled", Leaf), ("labels", Leaf)])),
        ),
        ("languages", Map(Box::new(language))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&substitute_env(&content), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate config text. The format is taken from `path`'s extension; the
/// file itself is not read.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    if let Err(e) = config_format(path) {
        diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", e.to_string()));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    }

    // 1. Syntax
    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types, then 4. semantics on the parsed config
    match serde_json::from_value::<RunboxConfig>(value) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already loaded config, for example after command
/// line overrides were applied.
#[must_use]
pub fn validate_config(config: &RunboxConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_semantics(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let serde_json::Value::Object(table) = value else {
        return;
    };
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match schema {
        KnownKeys::Struct(fields) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child, child_schema, &join(key), diagnostics);
                    continue;
                }
                let level = if prefix.is_empty() {
                    " at top level"
                } else {
                    ""
                };
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
                    None => format!("unknown field{level}"),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    join(key),
                    message,
                ));
            }
        },
        KnownKeys::Map(value_schema) => {
            for (key, child) in table {
                check_unknown_fields(child, value_schema, &join(key), diagnostics);
            }
        },
        KnownKeys::Leaf => {},
    }
}

/// Settings that parse but cannot work, or are risky.
fn check_semantics(config: &RunboxConfig, diagnostics: &mut Vec<Diagnostic>) {
    let executor = &config.executor;

    if executor.pool_size == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "invalid-value",
            "executor.pool_size",
            "pool size must be at least 1",
        ));
    }
    if executor.execution_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "invalid-value",
            "executor.execution_timeout_secs",
            "execution timeout must be at least 1 second",
        ));
    }
    if executor.acquire_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "invalid-value",
            "executor.acquire_timeout_secs",
            "requests fail immediately whenever every sandbox is busy",
        ));
    }
    if executor.max_output_bytes == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "invalid-value",
            "executor.max_output_bytes",
            "output limit must be greater than 0",
        ));
    }
    if let Some(drain) = executor.drain_timeout_secs
        && drain < executor.execution_timeout_secs
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "invalid-value",
            "executor.drain_timeout_secs",
            "shorter than the execution timeout; shutdown may destroy sandboxes mid-run",
        ));
    }

    if config.container.cpus.is_nan() || config.container.cpus <= 0.0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "invalid-value",
            "container.cpus",
            "cpu share must be greater than 0",
        ));
    }
    if config.container.memory.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "invalid-value",
            "container.memory",
            "memory limit must not be empty",
        ));
    }
    if config.container.idle_command.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "invalid-value",
            "container.idle_command",
            "sandboxes need a long-running idle command",
        ));
    }
    if !config.container.no_network {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "container.no_network",
            "sandboxes have network access; submitted code can reach the network",
        ));
    }

    for (name, language) in &config.languages {
        let path = format!("languages.{name}");
        if language.image.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.image"),
                "image must not be empty",
            ));
        }
        if language.extension.trim_start_matches('.').is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.extension"),
                "extension must not be empty",
            ));
        }
        if language.run.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.run"),
                "run command must not be empty",
            ));
        }
        if language.compile.as_ref().is_some_and(Vec::is_empty) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.compile"),
                "compile command must not be empty; omit it for interpreted languages",
            ));
        }
    }

    if let Some(enabled) = &executor.enabled_languages {
        let table = config.language_table();
        let mut known: Vec<String> = runbox_sandbox::LanguageTable::builtin()
            .names()
            .map(String::from)
            .collect();
        known.extend(config.languages.keys().cloned());
        let known: Vec<&str> = known.iter().map(String::as_str).collect();

        for name in enabled {
            if table.get(name).is_none() {
                let message = match suggest(name, &known, 2) {
                    Some(s) => format!("unknown language \"{name}\" (did you mean \"{s}\"?)"),
                    None => format!("unknown language \"{name}\""),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "invalid-value",
                    "executor.enabled_languages",
                    message,
                ));
            }
        }
        if table.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                "executor.enabled_languages",
                "no languages left to serve",
            ));
        }
    }

    let is_localhost = matches!(
        config.server.bind.as_str(),
        "127.0.0.1" | "localhost" | "::1"
    );
    if !is_localhost {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "server.bind",
            format!(
                "the execute endpoint has no authentication and is bound to {}",
                config.server.bind
            ),
        ));
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
