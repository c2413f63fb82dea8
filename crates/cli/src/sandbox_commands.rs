use {anyhow::Result, clap::Subcommand};

use {
    runbox_config::RunboxConfig,
    runbox_sandbox::{DockerRuntime, SandboxRuntime, docker::MANAGED_LABEL},
};

#[derive(Subcommand)]
pub enum SandboxAction {
    /// List containers created by runbox, running or not.
    List,
    /// Force-remove every container created by runbox, e.g. after a crash.
    Prune,
}

pub async fn handle_sandbox(action: &SandboxAction, config: &RunboxConfig) -> Result<()> {
    let runtime = DockerRuntime::new(config.container.cli.clone());
    match action {
        SandboxAction::List => list(&runtime).await,
        SandboxAction::Prune => prune(&runtime).await,
    }
}

async fn list(runtime: &DockerRuntime) -> Result<()> {
    let ids = runtime.list_managed().await?;
    if ids.is_empty() {
        println!("No containers labelled {MANAGED_LABEL}.");
        return Ok(());
    }
    for id in &ids {
        println!("{id}");
    }
    Ok(())
}

async fn prune(runtime: &DockerRuntime) -> Result<()> {
    let ids = runtime.list_managed().await?;
    if ids.is_empty() {
        println!("Nothing to prune.");
        return Ok(());
    }

    let mut failed = 0;
    for id in &ids {
        match runtime.remove(id, true).await {
            Ok(()) => println!("Removed {id}"),
            Err(e) => {
                eprintln!("Failed to remove {id}: {e}");
                failed += 1;
            },
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} container(s) could not be removed", ids.len());
    }
    println!("Removed {} container(s).", ids.len());
    Ok(())
}
