use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rolekeeper::backup::{self, Backup};
use rolekeeper::commands;
use rolekeeper::config::{Config, Mode};
use rolekeeper::ids::{GuildId, UserId};
use rolekeeper::interactions;
use rolekeeper::platform::{DiscordClient, Permissions};
use rolekeeper::state::SharedState;
use rolekeeper::sweep::Sweeper;
use rolekeeper::web::{self, WebState};

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (ROLEKEEPER_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("ROLEKEEPER_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("rolekeeper=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = Config::parse();
    match config.mode() {
        Mode::Serve => serve(config).await,
        Mode::RegisterCommands { guild } => register_commands(&config, guild).await,
        Mode::Exec { guild, caller, command } => exec(&config, guild, caller, &command.join(" ")).await,
    }
}

fn backup_for(config: &Config) -> Option<Backup> {
    config
        .dropbox_token
        .as_ref()
        .map(|token| Backup::new(token.clone(), config.dropbox_path.clone()))
}

/// Resolves on SIGINT or SIGTERM. Handlers are installed before this
/// returns, so a signal arriving later is never fatal.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    let mut signals =
        rolekeeper::signal::ShutdownSignals::install().context("Failed to install signal handlers")?;
    Ok(async move {
        let kind = signals.recv().await;
        tracing::info!(signal = ?kind, "Shutting down");
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    })
}

async fn serve(config: Config) -> Result<()> {
    config.warn_missing();
    let public_key = config
        .public_key
        .as_deref()
        .map(interactions::parse_public_key)
        .transpose()
        .map_err(|e| anyhow::anyhow!("DISCORD_PUBLIC_KEY: {e}"))?;

    let shutdown = shutdown_signal()?;
    let backup = backup_for(&config);
    let store = backup::open_restored(backup.as_ref(), &config.db_path).await?;
    tracing::info!(path = %config.db_path.display(), "Database ready");

    let discord = DiscordClient::new(config.discord_token.clone(), config.application_id);
    let shared = Arc::new(SharedState::new(store, discord, backup, config.platform_timeout));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = Arc::new(Sweeper::new(Arc::clone(&shared)));
    tracing::info!(every = %humantime::format_duration(config.sweep_interval), "Starting expiry sweep");
    let sweep_task = tokio::spawn(sweeper.run(config.sweep_interval, shutdown_rx));

    let app = web::router(Arc::new(WebState { shared, public_key }));
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    sweep_task.await.context("Sweep task panicked")?;
    Ok(())
}

async fn register_commands(config: &Config, guild: Option<GuildId>) -> Result<()> {
    let discord = DiscordClient::new(config.discord_token.clone(), config.application_id);
    let count = discord
        .register_commands(guild, &interactions::command_definitions())
        .await
        .context("Failed to register slash commands")?;
    match guild {
        Some(g) => tracing::info!(guild = %g, count, "Registered guild slash commands"),
        None => tracing::info!(count, "Registered global slash commands"),
    }
    Ok(())
}

async fn exec(config: &Config, guild: GuildId, caller: UserId, text: &str) -> Result<()> {
    let backup = backup_for(config);
    let store = backup::open_restored(backup.as_ref(), &config.db_path).await?;
    let discord = DiscordClient::new(config.discord_token.clone(), config.application_id);
    // Pushed inline below: a spawned push would not outlive this process.
    let shared = Arc::new(SharedState::new(store, discord, None, config.platform_timeout));

    let mutating = text.parse::<commands::Command>().is_ok_and(|c| c.is_mutating());
    let reply = commands::execute_text(&shared, guild, caller, Permissions::all(), text, chrono::Utc::now()).await;
    println!("{reply}");

    if mutating {
        if let Some(backup) = &backup {
            if let Err(e) = backup.push(&shared.store).await {
                tracing::warn!(error = %e, "Dropbox backup failed");
            }
        }
    }
    Ok(())
}
