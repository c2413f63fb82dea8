use std::{path::Path, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    runbox_config::RunboxConfig,
    runbox_sandbox::{
        ExecError, ExecuteRequest, Executor, LanguageSpec, LanguageTable, SandboxRuntime,
    },
    tracing::info,
};

/// The one-shot pool starts cold; waiting for it may include an image pull.
const COLD_START_TIMEOUT: Duration = Duration::from_secs(120);

/// Exit status reported when the program hit its deadline, as `timeout(1)`.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Run `file` once and print its output. Returns the exit status to report.
pub async fn run_file(
    config: &RunboxConfig,
    runtime: impl SandboxRuntime + 'static,
    language: Option<&str>,
    file: &Path,
) -> Result<i32> {
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let mut table = config.language_table();
    let language = match language {
        Some(name) => name.to_string(),
        None => infer_language(&table, file)?,
    };
    if table.get(&language).is_none() {
        anyhow::bail!(
            "unsupported language `{language}` (available: {})",
            table.names().collect::<Vec<_>>().join(", ")
        );
    }
    table.retain(std::slice::from_ref(&language));

    let mut settings = config.executor_settings();
    settings.pool_size = 1;
    settings.acquire_timeout = settings.acquire_timeout.max(COLD_START_TIMEOUT);

    info!(%language, file = %file.display(), "running file");
    let executor = Executor::new(Arc::new(runtime), &table, settings);
    let result = executor
        .execute(&ExecuteRequest::new(language.as_str(), code))
        .await;
    executor.shutdown().await;

    match result {
        Ok(result) => {
            print!("{}", result.output);
            Ok(result.exit_code.unwrap_or(1))
        },
        Err(err) if err.is_program_error() => {
            if let Some(output) = err.output() {
                print!("{output}");
            }
            eprintln!("runbox: {err}");
            Ok(if matches!(err, ExecError::Timeout { .. }) {
                TIMEOUT_EXIT_CODE
            } else {
                1
            })
        },
        Err(err) => Err(err.into()),
    }
}

/// Pick the language whose extension matches `file`.
fn infer_language(table: &LanguageTable, file: &Path) -> Result<String> {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| {
            format!(
                "cannot infer a language for {}, pass --language",
                file.display()
            )
        })?;

    let mut matches: Vec<&Arc<LanguageSpec>> = table
        .iter()
        .filter(|spec| spec.extension == extension)
        .collect();
    matches.sort_by(|a, b| a.name.cmp(&b.name));
    match matches.as_slice() {
        [] => anyhow::bail!("no language uses the `.{extension}` extension, pass --language"),
        [spec] => Ok(spec.name.clone()),
        _ => anyhow::bail!(
            "`.{extension}` is used by {}, pass --language",
            matches
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Print the language table, sorted by name.
pub fn list_languages(config: &RunboxConfig) {
    let table = config.language_table();
    let mut specs: Vec<_> = table.iter().collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{:<12} {:<28} {:<6} COMPILED", "LANGUAGE", "IMAGE", "EXT");
    for spec in specs {
        println!(
            "{:<12} {:<28} {:<6} {}",
            spec.name,
            spec.image,
            spec.extension,
            if spec.is_compiled() { "yes" } else { "no" }
        );
    }
}
