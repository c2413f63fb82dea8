//! Config schema types (server, executor, container, metrics, languages).

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use runbox_sandbox::{
    ContainerLimits, ExecutorSettings, LanguageSpec, LanguageTable, TimeoutPolicy,
    default_drain_timeout,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunboxConfig {
    pub server: ServerConfig,
    pub executor: ExecutorConfig,
    pub container: ContainerConfig,
    pub metrics: MetricsConfig,
    /// Extra languages, or overrides of the built-in ones, keyed by name.
    pub languages: HashMap<String, LanguageConfig>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            max_request_bytes: 1024 * 1024,
        }
    }
}

/// Pool sizing and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Warm sandboxes per language.
    pub pool_size: usize,
    /// Deadline shared by the compile and run steps.
    pub execution_timeout_secs: u64,
    /// How long a request waits for an idle sandbox before failing.
    pub acquire_timeout_secs: u64,
    /// How long shutdown waits for in-flight executions. Derived from the
    /// execution timeout and stop grace when unset.
    pub drain_timeout_secs: Option<u64>,
    pub max_output_bytes: usize,
    pub timeout_policy: TimeoutPolicy,
    /// Host directory for staged scripts. System temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    /// Serve only these languages. All configured languages when unset.
    pub enabled_languages: Option<Vec<String>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let defaults = ExecutorSettings::default();
        Self {
            pool_size: defaults.pool_size,
            execution_timeout_secs: defaults.execution_timeout.as_secs(),
            acquire_timeout_secs: defaults.acquire_timeout.as_secs(),
            drain_timeout_secs: None,
            max_output_bytes: defaults.max_output_bytes,
            timeout_policy: defaults.timeout_policy,
            staging_dir: None,
            enabled_languages: None,
        }
    }
}

/// Container runtime and isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Docker-compatible CLI: "docker" or "podman".
    pub cli: String,
    pub cpus: f64,
    pub memory: String,
    pub pids_limit: Option<u32>,
    pub no_network: bool,
    /// Seconds `stop` waits before the runtime kills a container.
    pub stop_grace_secs: u64,
    pub idle_command: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        let limits = ContainerLimits::default();
        Self {
            cli: "docker".into(),
            cpus: limits.cpus,
            memory: limits.memory,
            pids_limit: limits.pids_limit,
            no_network: limits.no_network,
            stop_grace_secs: 10,
            idle_command: limits.idle_command,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics collection and the `/metrics` endpoint are enabled.
    pub enabled: bool,
    /// Additional labels to add to all metrics.
    pub labels: HashMap<String, String>,
}

/// One language entry. The key in `[languages]` is the language name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub image: String,
    /// Script file extension, without the dot.
    pub extension: String,
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    pub artifacts: Vec<String>,
}

impl LanguageConfig {
    #[must_use]
    pub fn to_spec(&self, name: &str) -> LanguageSpec {
        LanguageSpec {
            name: name.to_string(),
            image: self.image.clone(),
            extension: self.extension.trim_start_matches('.').to_string(),
            compile: self.compile.clone(),
            run: self.run.clone(),
            artifacts: self.artifacts.clone(),
        }
    }
}

impl RunboxConfig {
    /// Executor settings derived from the `[executor]` and `[container]`
    /// sections.
    #[must_use]
    pub fn executor_settings(&self) -> ExecutorSettings {
        let execution_timeout = Duration::from_secs(self.executor.execution_timeout_secs);
        let stop_grace = Duration::from_secs(self.container.stop_grace_secs);
        let drain_timeout = self
            .executor
            .drain_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| default_drain_timeout(execution_timeout, stop_grace));

        ExecutorSettings {
            pool_size: self.executor.pool_size,
            execution_timeout,
            acquire_timeout: Duration::from_secs(self.executor.acquire_timeout_secs),
            stop_grace,
            drain_timeout,
            max_output_bytes: self.executor.max_output_bytes,
            timeout_policy: self.executor.timeout_policy,
            container: ContainerLimits {
                no_network: self.container.no_network,
                cpus: self.container.cpus,
                memory: self.container.memory.clone(),
                pids_limit: self.container.pids_limit,
                idle_command: self.container.idle_command.clone(),
            },
            staging_dir: self.executor.staging_dir.clone(),
        }
    }

    /// Built-in languages merged with `[languages]`, filtered by
    /// `executor.enabled_languages`.
    #[must_use]
    pub fn language_table(&self) -> LanguageTable {
        let mut table = LanguageTable::builtin();
        for (name, language) in &self.languages {
            table.insert(language.to_spec(name));
        }
        if let Some(enabled) = &self.executor.enabled_languages {
            table.retain(enabled);
        }
        table
    }
}
