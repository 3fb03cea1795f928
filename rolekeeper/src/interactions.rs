//! Discord interactions (slash commands) over HTTP.
//!
//! Discord POSTs each interaction to our webhook, signed with the
//! application's Ed25519 key over `timestamp || body`. We verify the
//! signature, answer PING with PONG, and turn application commands into an
//! [`Invocation`].

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::commands::{Command, Invocation};
use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use crate::platform::Permissions;

pub const PING: u8 = 1;
pub const APPLICATION_COMMAND: u8 = 2;

pub const RESPONSE_PONG: u8 = 1;
pub const RESPONSE_MESSAGE: u8 = 4;
pub const RESPONSE_DEFERRED: u8 = 5;

const OPTION_INTEGER: u8 = 4;
const OPTION_USER: u8 = 6;
const OPTION_CHANNEL: u8 = 7;
const OPTION_ROLE: u8 = 8;

/// Parse the hex-encoded application public key.
pub fn parse_public_key(hex_key: &str) -> Result<VerifyingKey, String> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| format!("invalid hex: {e}"))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "public key must be 32 bytes".to_string())?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| format!("invalid public key: {e}"))
}

/// Check `X-Signature-Ed25519` against `timestamp || body`.
pub fn verify_signature(key: &VerifyingKey, signature_hex: &str, timestamp: &str, body: &[u8]) -> bool {
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    key.verify(&message, &signature).is_ok()
}

/// How far `X-Signature-Timestamp` may drift from our clock before a
/// signed request is treated as a replay.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 5 * 60;

/// Whether a signature timestamp (unix seconds) lies within
/// [`MAX_TIMESTAMP_SKEW_SECS`] of `now`, in either direction.
pub fn is_fresh(timestamp: &str, now: DateTime<Utc>) -> bool {
    timestamp
        .trim()
        .parse::<i64>()
        .is_ok_and(|ts| ts.abs_diff(now.timestamp()) <= MAX_TIMESTAMP_SKEW_SECS as u64)
}

#[derive(Debug, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub member: Option<InteractionMember>,
    #[serde(default)]
    pub data: Option<CommandData>,
}

#[derive(Debug, Deserialize)]
pub struct InteractionMember {
    pub user: InteractionUser,
    /// Decimal permission bitset, resolved for the invoking channel.
    #[serde(default)]
    pub permissions: String,
}

#[derive(Debug, Deserialize)]
pub struct InteractionUser {
    pub id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct CommandData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl CommandData {
    fn option(&self, name: &str) -> Option<&Value> {
        self.options.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    fn snowflake(&self, name: &str) -> Result<Option<u64>, String> {
        match self.option(name) {
            None => Ok(None),
            Some(Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| format!("option `{name}` is not an id")),
            Some(_) => Err(format!("option `{name}` is not an id")),
        }
    }

    fn required_snowflake(&self, name: &str) -> Result<u64, String> {
        self.snowflake(name)?
            .ok_or_else(|| format!("missing option `{name}`"))
    }

    fn integer(&self, name: &str) -> Result<Option<i64>, String> {
        match self.option(name) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| format!("option `{name}` is not a whole number")),
        }
    }

    fn required_integer(&self, name: &str) -> Result<i64, String> {
        self.integer(name)?
            .ok_or_else(|| format!("missing option `{name}`"))
    }

    /// Map slash-command options onto a [`Command`].
    pub fn to_command(&self) -> Result<Command, String> {
        let cmd = match self.name.as_str() {
            "grant" => Command::Grant {
                subject: UserId(self.required_snowflake("member")?),
                role: RoleId(self.required_snowflake("role")?),
                days: self.integer("days")?,
            },
            "revoke" => Command::Revoke {
                subject: UserId(self.required_snowflake("member")?),
                role: RoleId(self.required_snowflake("role")?),
            },
            "prolong" => Command::Prolong {
                subject: UserId(self.required_snowflake("member")?),
                role: RoleId(self.required_snowflake("role")?),
                days: self.required_integer("days")?,
            },
            "list-mine" => Command::ListMine,
            "list-role" => Command::ListRole {
                role: RoleId(self.required_snowflake("role")?),
            },
            "list-expiring" => Command::ListExpiring,
            "set-log-channel" => Command::SetLogChannel {
                channel: ChannelId(self.required_snowflake("channel")?),
            },
            "disable-log-channel" => Command::DisableLogChannel,
            "random-role" => {
                let count = self.required_integer("count")?;
                Command::RandomRole {
                    role: RoleId(self.required_snowflake("role")?),
                    days: self.required_integer("days")?,
                    count: usize::try_from(count).map_err(|_| "count must not be negative".to_string())?,
                }
            }
            "help" => Command::Help,
            other => return Err(format!("unknown command `{other}`")),
        };
        Ok(cmd)
    }
}

impl Interaction {
    /// Build the invocation for an application command. Commands are only
    /// accepted inside a guild.
    pub fn invocation(&self) -> Result<Invocation, String> {
        let guild = self
            .guild_id
            .ok_or_else(|| "This bot only works inside a server.".to_string())?;
        let member = self
            .member
            .as_ref()
            .ok_or_else(|| "This bot only works inside a server.".to_string())?;
        let data = self.data.as_ref().ok_or_else(|| "missing command data".to_string())?;
        let permissions = Permissions(member.permissions.parse().unwrap_or(0));
        Ok(Invocation {
            guild,
            caller: member.user.id,
            permissions,
            command: data.to_command()?,
        })
    }
}

pub fn pong() -> Value {
    json!({ "type": RESPONSE_PONG })
}

pub fn deferred() -> Value {
    json!({ "type": RESPONSE_DEFERRED })
}

/// Immediate ephemeral reply.
pub fn message(content: &str) -> Value {
    json!({
        "type": RESPONSE_MESSAGE,
        "data": { "content": content, "flags": 64, "allowed_mentions": { "parse": [] } },
    })
}

fn opt(kind: u8, name: &str, description: &str, required: bool) -> Value {
    json!({ "type": kind, "name": name, "description": description, "required": required })
}

/// Slash-command definitions, for bulk registration.
pub fn command_definitions() -> Value {
    let manage_roles = Permissions::MANAGE_ROLES.0.to_string();
    let manage_guild = Permissions::MANAGE_GUILD.0.to_string();
    let member = || opt(OPTION_USER, "member", "Member", true);
    let role = || opt(OPTION_ROLE, "role", "Role", true);
    json!([
        {
            "name": "grant",
            "description": "Assign a role, optionally for a number of days",
            "default_member_permissions": manage_roles,
            "dm_permission": false,
            "options": [member(), role(), opt(OPTION_INTEGER, "days", "Days until the role is removed", false)],
        },
        {
            "name": "revoke",
            "description": "Remove a tracked role",
            "default_member_permissions": manage_roles,
            "dm_permission": false,
            "options": [member(), role()],
        },
        {
            "name": "prolong",
            "description": "Extend a role's duration",
            "default_member_permissions": manage_roles,
            "dm_permission": false,
            "options": [member(), role(), opt(OPTION_INTEGER, "days", "Extra days", true)],
        },
        {
            "name": "list-mine",
            "description": "Show your active roles",
            "dm_permission": false,
        },
        {
            "name": "list-role",
            "description": "List users with a role",
            "default_member_permissions": manage_roles,
            "dm_permission": false,
            "options": [role()],
        },
        {
            "name": "list-expiring",
            "description": "List roles that are about to expire",
            "default_member_permissions": manage_roles,
            "dm_permission": false,
        },
        {
            "name": "random-role",
            "description": "Give a role to random members",
            "default_member_permissions": manage_roles,
            "dm_permission": false,
            "options": [
                role(),
                opt(OPTION_INTEGER, "days", "Days until the role is removed", true),
                opt(OPTION_INTEGER, "count", "How many members", true),
            ],
        },
        {
            "name": "set-log-channel",
            "description": "Set the log channel for role actions",
            "default_member_permissions": manage_guild,
            "dm_permission": false,
            "options": [opt(OPTION_CHANNEL, "channel", "Channel", true)],
        },
        {
            "name": "disable-log-channel",
            "description": "Disable the log channel",
            "default_member_permissions": manage_guild,
            "dm_permission": false,
        },
        {
            "name": "help",
            "description": "List available commands",
        },
    ])
}
