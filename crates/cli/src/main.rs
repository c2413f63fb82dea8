mod config_commands;
mod run_commands;
mod sandbox_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    runbox_config::{RunboxConfig, Severity},
    runbox_gateway::GatewayState,
    runbox_sandbox::{DockerRuntime, Executor},
    tracing::{debug, error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "runbox", version, about = "runbox: run untrusted code in warm sandbox containers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (skips discovery in ./ and the user config directory).
    #[arg(long, short, global = true, env = "RUNBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default when no subcommand is provided).
    Serve,
    /// Run one source file in a sandbox and print its output.
    Run {
        /// Language name; inferred from the file extension when omitted.
        #[arg(short, long)]
        language: Option<String>,
        file: PathBuf,
    },
    /// List the languages that would be served.
    Languages,
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Sandbox container management.
    Sandbox {
        #[command(subcommand)]
        action: sandbox_commands::SandboxAction,
    },
}

/// Initialise tracing. Logs go to stderr so `runbox run` keeps stdout for the
/// program's own output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Load the config file and apply command line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<RunboxConfig> {
    let (mut config, path) = runbox_config::load_or_discover(cli.config.as_deref())?;
    match path {
        Some(path) => debug!(path = %path.display(), "config loaded"),
        None => debug!("no config file found, using defaults"),
    }
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Refuse to start on a config that cannot work; log everything else.
fn ensure_valid(config: &RunboxConfig) -> anyhow::Result<()> {
    let report = runbox_config::validate_config(config);
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, category = d.category, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, category = d.category, "{}", d.message),
            Severity::Info => debug!(path = %d.path, category = d.category, "{}", d.message),
        }
    }
    if report.has_errors() {
        anyhow::bail!(
            "invalid configuration ({} error(s)), run `runbox check` for details",
            report.count(Severity::Error)
        );
    }
    Ok(())
}

/// Container runtime from the `[container]` section, with a warning when its
/// CLI does not answer.
async fn container_runtime(config: &RunboxConfig) -> DockerRuntime {
    let runtime = DockerRuntime::new(config.container.cli.clone());
    if !runtime.is_available().await {
        warn!(
            cli = runtime.cli(),
            "container CLI not found or not responding, sandboxes will fail to start"
        );
    }
    runtime
}

async fn serve(config: RunboxConfig) -> anyhow::Result<()> {
    ensure_valid(&config)?;

    #[cfg(feature = "metrics")]
    let metrics = runbox_metrics::init_metrics(runbox_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
    .map_err(|e| e.context("failed to initialise metrics"))?;

    let runtime = container_runtime(&config).await;
    let executor = Arc::new(Executor::new(
        Arc::new(runtime),
        &config.language_table(),
        config.executor_settings(),
    ));

    #[cfg(feature = "metrics")]
    let state = GatewayState::with_metrics(executor, config.server.max_request_bytes, metrics);
    #[cfg(not(feature = "metrics"))]
    let state = GatewayState::new(executor, config.server.max_request_bytes);

    runbox_gateway::start_gateway(state, &config.server.bind, config.server.port).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    match &cli.command {
        // Default: start the gateway when no subcommand is provided
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "runbox starting");
            serve(load_config(&cli)?).await
        },
        Some(Commands::Run { language, file }) => {
            let config = load_config(&cli)?;
            ensure_valid(&config)?;
            let runtime = container_runtime(&config).await;
            let code = run_commands::run_file(&config, runtime, language.as_deref(), file).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        },
        Some(Commands::Languages) => {
            run_commands::list_languages(&load_config(&cli)?);
            Ok(())
        },
        Some(Commands::Check { verbose }) => config_commands::check(cli.config.as_deref(), *verbose),
        Some(Commands::Sandbox { action }) => {
            let config = load_config(&cli)?;
            sandbox_commands::handle_sandbox(action, &config).await
        },
    }
}
