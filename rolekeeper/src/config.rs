//! Process configuration, from flags or environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::ids::{GuildId, UserId};

pub const DEFAULT_PORT: u16 = 3000;

/// humantime duration that must be longer than zero; a zero interval or
/// timeout cannot drive a timer.
fn non_zero_duration(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(d)
}

#[derive(Parser, Debug, Clone)]
#[command(name = "rolekeeper", about = "Discord bot for time-limited role assignments", version)]
pub struct Config {
    /// Discord bot token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub discord_token: String,

    /// Application id, needed for slash-command registration and replies
    #[arg(long, env = "DISCORD_APPLICATION_ID")]
    pub application_id: Option<u64>,

    /// Hex-encoded application public key; enables POST /interactions
    #[arg(long, env = "DISCORD_PUBLIC_KEY")]
    pub public_key: Option<String>,

    /// Dropbox access token for database backups
    #[arg(long, env = "DROPBOX_TOKEN", hide_env_values = true)]
    pub dropbox_token: Option<String>,

    /// Remote path of the database in Dropbox
    #[arg(long, env = "DROPBOX_PATH", default_value = "/roles.db")]
    pub dropbox_path: String,

    /// HTTP port for the health check and interactions webhook
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// SQLite database path
    #[arg(long, env = "ROLEKEEPER_DB", default_value = "data/roles.db")]
    pub db_path: PathBuf,

    /// Time between expiry sweeps (e.g. "24h", "30m")
    #[arg(long, env = "ROLEKEEPER_SWEEP_INTERVAL", default_value = "24h", value_parser = non_zero_duration)]
    pub sweep_interval: Duration,

    /// Upper bound for a single Discord API call
    #[arg(long, env = "ROLEKEEPER_PLATFORM_TIMEOUT", default_value = "30s", value_parser = non_zero_duration)]
    pub platform_timeout: Duration,

    #[command(subcommand)]
    pub mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Run the bot: HTTP server plus the expiry sweep (default)
    Serve,
    /// Register slash commands with Discord
    RegisterCommands {
        /// Register for one guild only (takes effect immediately)
        #[arg(long)]
        guild: Option<GuildId>,
    },
    /// Run one textual command against the live server as an operator
    Exec {
        #[arg(long)]
        guild: GuildId,
        /// User the command runs as (grantor, and "mine" for list-mine)
        #[arg(long = "as")]
        caller: UserId,
        /// Command text, e.g. `grant <@123> <@&456> 7`
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        command: Vec<String>,
    },
}

impl Config {
    pub fn mode(&self) -> Mode {
        self.mode.clone().unwrap_or(Mode::Serve)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port.unwrap_or(DEFAULT_PORT)))
    }

    /// Log a warning for every optional setting that is missing.
    pub fn warn_missing(&self) {
        if self.port.is_none() {
            tracing::warn!("PORT not set, defaulting to {DEFAULT_PORT}");
        }
        if self.dropbox_token.is_none() {
            tracing::warn!("DROPBOX_TOKEN not set, database backups are disabled");
        }
        if self.public_key.is_none() {
            tracing::warn!("DISCORD_PUBLIC_KEY not set, slash commands are disabled");
        }
        if self.application_id.is_none() {
            tracing::warn!("DISCORD_APPLICATION_ID not set, slash-command replies cannot be delivered");
        }
    }
}
