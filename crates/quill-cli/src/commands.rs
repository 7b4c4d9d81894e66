use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use quill_engine::{
    load_transform_modes, AppServerEngine, AppServerEngineConfig, EchoEngine, ModelCatalogClient,
    ModelCatalogConfig, TransformContext, TransformEngine, TransformMode, TransformModeSet,
    TransformService, DEFAULT_MODEL,
};
use quill_rpc::TransportConfig;
use tokio::io::AsyncReadExt;

use crate::cli_args::{Cli, CliCommand};

pub async fn execute_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        CliCommand::Transform { input, dry_run } => {
            run_transform(&cli, input.as_deref(), *dry_run).await
        }
        CliCommand::Models => run_models(&cli).await,
        CliCommand::Modes => run_modes(&cli),
    }
}

async fn run_transform(cli: &Cli, input: Option<&str>, dry_run: bool) -> Result<()> {
    let modes = load_modes(cli)?;
    let context = transform_context(cli, &modes)?;
    let input = match input {
        Some(input) => input.to_string(),
        None => read_stdin().await?,
    };

    let engine: Arc<dyn TransformEngine> = if dry_run {
        Arc::new(EchoEngine)
    } else {
        Arc::new(AppServerEngine::new(engine_config(cli)))
    };
    let service =
        TransformService::new(engine).with_sensitive_text_logging(cli.log_sensitive_text);

    let outcome = tokio::select! {
        outcome = service.transform(&input, &context) => outcome
            .with_context(|| format!("transform with mode '{}' failed", context.mode_name))?,
        _ = tokio::signal::ctrl_c() => bail!("transform interrupted"),
    };
    println!("{}", outcome.text);
    eprintln!("{}", outcome.metrics.summary());
    Ok(())
}

async fn run_models(cli: &Cli) -> Result<()> {
    let client = ModelCatalogClient::new(catalog_config(cli));
    let models = client
        .fetch_models()
        .await
        .context("failed to list models from the app server")?;
    for model in models {
        println!("{model}");
    }
    Ok(())
}

fn run_modes(cli: &Cli) -> Result<()> {
    let modes = load_modes(cli)?;
    let selected = select_mode(cli, &modes)?;
    for mode in modes.modes() {
        let marker = if mode.name == selected.name { '*' } else { ' ' };
        println!("{marker} {} ({})", mode.name, mode.model);
    }
    Ok(())
}

fn load_modes(cli: &Cli) -> Result<TransformModeSet> {
    match &cli.modes_file {
        Some(path) => load_transform_modes(path, DEFAULT_MODEL),
        None => Ok(TransformModeSet::built_in(DEFAULT_MODEL)),
    }
}

fn select_mode<'a>(cli: &Cli, modes: &'a TransformModeSet) -> Result<&'a TransformMode> {
    match cli.mode.as_deref() {
        Some(name) => modes.find(name).ok_or_else(|| {
            anyhow!("unknown transform mode '{}'; run `quill modes` to list them", name.trim())
        }),
        None => Ok(modes.active()),
    }
}

/// Resolves the selected mode and applies `--model` when it is not blank.
fn transform_context(cli: &Cli, modes: &TransformModeSet) -> Result<TransformContext> {
    let mut context = TransformContext::from(select_mode(cli, modes)?);
    if let Some(model) = cli
        .model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
    {
        context.model = model.to_string();
    }
    Ok(context)
}

fn transport_config(cli: &Cli, base: TransportConfig) -> TransportConfig {
    TransportConfig {
        shell: cli.shell.clone(),
        login_shell: cli.login_shell,
        ..base
    }
}

fn engine_config(cli: &Cli) -> AppServerEngineConfig {
    let defaults = AppServerEngineConfig::default();
    AppServerEngineConfig {
        launch_command: cli.stdio_command.clone(),
        timeout: Duration::from_millis(cli.timeout_ms),
        sandbox: cli.sandbox.clone(),
        transport: transport_config(cli, defaults.transport.clone()),
        ..defaults
    }
}

fn catalog_config(cli: &Cli) -> ModelCatalogConfig {
    let defaults = ModelCatalogConfig::default();
    ModelCatalogConfig {
        launch_command: cli.stdio_command.clone(),
        timeout: Duration::from_millis(cli.models_timeout_ms),
        transport: transport_config(cli, defaults.transport.clone()),
        ..defaults
    }
}

async fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read input from stdin")?;
    Ok(strip_trailing_newline(raw))
}

/// Drops one trailing line break, as left by `echo` or a heredoc.
fn strip_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
