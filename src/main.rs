//! Jarvis CLI entry point.

use jarvis::config::Config;
use jarvis::directory::UserDirectory;
use jarvis::dispatch::{Dispatcher, QuoteSource};
use jarvis::messaging::{SlackTransport, TransportDyn};
use jarvis::plugins::registry::PluginContext;
use jarvis::plugins::{EnabledPlugins, PluginRegistry};
use jarvis::supervisor::{Supervisor, resolve_bot_user_id};

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jarvis")]
#[command(about = "A pluggable Slack bot that routes messages to command handlers")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print the available plugins and exit
    #[arg(long)]
    list_plugins: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Another dependency may already have installed one.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "jarvis exited with an error");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run(cli: Cli) -> jarvis::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let context = PluginContext::new(config.plugins.clone(), config.dispatch.http_timeout)?;
    let registry = Arc::new(PluginRegistry::builtin(context.clone())?);
    let enabled = EnabledPlugins::from_names(config.dispatch.enabled_plugins.iter().cloned());

    if cli.list_plugins {
        for descriptor in registry.descriptors() {
            let marker = if enabled.contains(&descriptor.name) { "enabled" } else { "disabled" };
            println!(
                "{} ({}, {})\n    {}",
                descriptor.name, descriptor.activation, marker, descriptor.purpose
            );
        }
        return Ok(());
    }

    if enabled.is_empty() {
        tracing::warn!("no plugins enabled, every directed message will get a fallback reply");
    }

    let directory = Arc::new(UserDirectory::open(&config.user_db_path()).await?);
    let fallback = Arc::new(QuoteSource::new(
        context.http.clone(),
        config.dispatch.fallback_url.clone(),
    ));

    let transport: Arc<dyn TransportDyn> = Arc::new(SlackTransport::new(
        config.slack.bot_token.clone(),
        config.slack.app_token.clone(),
    )?);

    transport.connect().await?;

    let bot_user_id = resolve_bot_user_id(transport.as_ref(), &config.slack.bot_name).await?;
    tracing::info!(bot = %config.slack.bot_name, %bot_user_id, "resolved bot identity");

    let dispatcher = Arc::new(Dispatcher::new(registry, enabled, directory, fallback));
    let supervisor = Supervisor::new(transport.clone(), dispatcher, bot_user_id, &config.dispatch);

    supervisor
        .run(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    transport.shutdown().await?;
    tracing::info!("jarvis stopped");
    Ok(())
}
