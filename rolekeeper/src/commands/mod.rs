//! Moderator and member commands.
//!
//! Every command is checked against the caller's permissions, run against
//! the store and the platform, and turned into reply text. Nothing here
//! returns an error to the transport: failures become replies.

pub mod format;
pub mod parse;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;

use crate::error::Error;
use crate::expiry;
use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use crate::platform::{self, Member, Permissions, Platform, PlatformError, Role};
use crate::state::SharedState;

pub use parse::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Grant { subject: UserId, role: RoleId, days: Option<i64> },
    Revoke { subject: UserId, role: RoleId },
    Prolong { subject: UserId, role: RoleId, days: i64 },
    ListMine,
    ListRole { role: RoleId },
    ListExpiring,
    SetLogChannel { channel: ChannelId },
    DisableLogChannel,
    RandomRole { role: RoleId, days: i64, count: usize },
    Help,
}

impl Command {
    /// Permission the caller must hold, with its display name.
    pub fn required_permission(&self) -> Option<(Permissions, &'static str)> {
        match self {
            Command::Grant { .. }
            | Command::Revoke { .. }
            | Command::Prolong { .. }
            | Command::ListRole { .. }
            | Command::ListExpiring
            | Command::RandomRole { .. } => Some((Permissions::MANAGE_ROLES, "Manage Roles")),
            Command::SetLogChannel { .. } | Command::DisableLogChannel => {
                Some((Permissions::MANAGE_GUILD, "Manage Server"))
            }
            Command::ListMine | Command::Help => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Grant { .. }
                | Command::Revoke { .. }
                | Command::Prolong { .. }
                | Command::SetLogChannel { .. }
                | Command::DisableLogChannel
                | Command::RandomRole { .. }
        )
    }
}

/// A command together with who issued it and where.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub guild: GuildId,
    pub caller: UserId,
    pub permissions: Permissions,
    pub command: Command,
}

pub const HELP: &str = "🛠 **Available Commands:**
`grant @user @role [days]` — assign a role, optionally for a number of days
`revoke @user @role` — remove a role
`prolong @user @role days` — extend a role's duration
`list-mine` — show your active roles
`list-role @role` — list users with this role
`list-expiring` — list roles that are about to expire
`random-role @role days count` — give a role to random members
`set-log-channel #channel` — set the log channel for role actions
`disable-log-channel` — disable the log channel";

/// Command-level failure, rendered as a reply.
#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error(transparent)]
    Core(#[from] Error),
    #[error("member {0} is not in this server")]
    UnknownMember(UserId),
    #[error("role {0} does not exist")]
    UnknownRole(RoleId),
    #[error("{0}")]
    Invalid(String),
}

impl From<PlatformError> for Failure {
    fn from(e: PlatformError) -> Self {
        Failure::Core(Error::TransientExternalFailure(e))
    }
}

fn describe(failure: &Failure) -> String {
    match failure {
        Failure::Core(Error::DuplicateAssignment { subject, role }) => format!(
            "⚠️ {} already has the role {} tracked by the bot.",
            subject.mention(),
            role.mention()
        ),
        Failure::Core(Error::NotFound { subject, role }) => format!(
            "⚠️ Role {} is not tracked for {}.",
            role.mention(),
            subject.mention()
        ),
        Failure::Core(Error::PermissionDenied(perm)) => {
            format!("⛔ You need the '{perm}' permission to use this command.")
        }
        Failure::Core(Error::TransientExternalFailure(e)) => {
            format!("⚠️ Discord request failed ({e}). Nothing was changed, please try again.")
        }
        Failure::Core(e @ (Error::StorageFailure(_) | Error::Io(_))) => {
            tracing::error!(error = %e, "Storage failure while handling command");
            "💥 Internal storage error, the operation was not applied.".to_string()
        }
        Failure::UnknownMember(user) => format!("⚠️ {} is not a member of this server.", user.mention()),
        Failure::UnknownRole(role) => format!("⚠️ Role `{role}` does not exist."),
        Failure::Invalid(msg) => format!("⚠️ {msg}"),
    }
}

/// Run an invocation and produce the reply for the caller.
pub async fn execute<P: Platform>(state: &Arc<SharedState<P>>, inv: Invocation, now: DateTime<Utc>) -> String {
    let mutating = inv.command.is_mutating();
    tracing::info!(guild = %inv.guild, caller = %inv.caller, command = ?inv.command, "Command");
    match run(state, &inv, now).await {
        Ok(reply) => {
            if mutating {
                state.schedule_backup();
            }
            reply
        }
        Err(failure) => {
            tracing::warn!(guild = %inv.guild, caller = %inv.caller, error = %failure, "Command failed");
            describe(&failure)
        }
    }
}

/// Parse and run a textual command.
pub async fn execute_text<P: Platform>(
    state: &Arc<SharedState<P>>,
    guild: GuildId,
    caller: UserId,
    permissions: Permissions,
    text: &str,
    now: DateTime<Utc>,
) -> String {
    match text.parse::<Command>() {
        Ok(command) => {
            let inv = Invocation { guild, caller, permissions, command };
            execute(state, inv, now).await
        }
        Err(e) => format!("⚠️ {e}"),
    }
}

async fn run<P: Platform>(state: &Arc<SharedState<P>>, inv: &Invocation, now: DateTime<Utc>) -> Result<String, Failure> {
    if let Some((perm, name)) = inv.command.required_permission() {
        if !inv.permissions.contains(perm) {
            return Err(Error::PermissionDenied(name).into());
        }
    }
    let ctx = Ctx { state, guild: inv.guild, caller: inv.caller, now };
    match inv.command {
        Command::Grant { subject, role, days } => ctx.grant(subject, role, days).await,
        Command::Revoke { subject, role } => ctx.revoke(subject, role).await,
        Command::Prolong { subject, role, days } => ctx.prolong(subject, role, days).await,
        Command::ListMine => ctx.list_mine().await,
        Command::ListRole { role } => ctx.list_role(role).await,
        Command::ListExpiring => ctx.list_expiring().await,
        Command::SetLogChannel { channel } => {
            state.store.set_log_channel(inv.guild, Some(channel))?;
            Ok(format!("📓 Log channel set to {}", channel.mention()))
        }
        Command::DisableLogChannel => {
            state.store.set_log_channel(inv.guild, None)?;
            Ok("📵 Log channel disabled.".to_string())
        }
        Command::RandomRole { role, days, count } => ctx.random_role(role, days, count).await,
        Command::Help => Ok(HELP.to_string()),
    }
}

fn within_limit(days: i64) -> Result<(), Failure> {
    if days > expiry::MAX_DAYS {
        return Err(Failure::Invalid(format!("Days must be at most {}.", expiry::MAX_DAYS)));
    }
    Ok(())
}

struct Ctx<'a, P: Platform> {
    state: &'a Arc<SharedState<P>>,
    guild: GuildId,
    caller: UserId,
    now: DateTime<Utc>,
}

impl<P: Platform> Ctx<'_, P> {
    async fn member(&self, user: UserId) -> Result<Option<Member>, PlatformError> {
        platform::bounded(self.state.platform_timeout, self.state.platform.member(self.guild, user)).await
    }

    async fn role(&self, role: RoleId) -> Result<Option<Role>, PlatformError> {
        platform::bounded(self.state.platform_timeout, self.state.platform.role(self.guild, role)).await
    }

    async fn require_member(&self, user: UserId) -> Result<Member, Failure> {
        self.member(user).await?.ok_or(Failure::UnknownMember(user))
    }

    async fn require_role(&self, role: RoleId) -> Result<Role, Failure> {
        self.role(role).await?.ok_or(Failure::UnknownRole(role))
    }

    async fn notify(&self, text: &str) {
        self.state.notify(self.guild, text).await;
    }

    async fn roles(&self) -> Result<Vec<Role>, PlatformError> {
        platform::bounded(self.state.platform_timeout, self.state.platform.roles(self.guild)).await
    }

    /// Undo a platform grant whose store write failed.
    async fn roll_back(&self, subject: UserId, role_id: RoleId) {
        let undo = platform::bounded(
            self.state.platform_timeout,
            self.state
                .platform
                .remove_role(self.guild, subject, role_id, "Rolling back failed grant"),
        )
        .await;
        if let Err(e) = undo {
            tracing::error!(%subject, role = %role_id, error = %e, "Could not roll back role grant");
        }
    }

    fn reason(&self, action: &str) -> String {
        format!("{action} by {}", self.caller)
    }

    async fn grant(&self, subject: UserId, role_id: RoleId, days: Option<i64>) -> Result<String, Failure> {
        if let Some(d) = days {
            within_limit(d)?;
        }
        let member = self.require_member(subject).await?;
        let role = self.require_role(role_id).await?;
        let state = self.state;

        let _key = state.locks.lock(subject, role_id).await;
        if state.store.exists(subject, role_id)? {
            return Err(Error::DuplicateAssignment { subject, role: role_id }.into());
        }
        platform::bounded(
            state.platform_timeout,
            state.platform.add_role(self.guild, subject, role_id, &self.reason("Timed role granted")),
        )
        .await?;
        if let Err(e) = state.store.create(self.guild, subject, role_id, days, self.caller, self.now) {
            self.roll_back(subject, role_id).await;
            return Err(e.into());
        }
        tracing::info!(guild = %self.guild, %subject, role = %role_id, ?days, "Role granted");

        let suffix = format::for_days(days);
        self.notify(&format!(
            "✅ {} assigned `{}` to {}{}.",
            self.caller.mention(),
            role.name,
            subject.mention(),
            suffix
        ))
        .await;
        Ok(format!(
            "✅ Role `{}` has been assigned to {}{}.",
            role.name, member.display_name, suffix
        ))
    }

    async fn revoke(&self, subject: UserId, role_id: RoleId) -> Result<String, Failure> {
        let member = self.member(subject).await?;
        let role = self.role(role_id).await?;
        let state = self.state;

        let _key = state.locks.lock(subject, role_id).await;
        if member.is_some() && role.is_some() {
            platform::bounded(
                state.platform_timeout,
                state.platform.remove_role(self.guild, subject, role_id, &self.reason("Role removed")),
            )
            .await?;
        }
        let existed = state.store.delete(subject, role_id)?;
        tracing::info!(guild = %self.guild, %subject, role = %role_id, existed, "Role revoked");

        let role_name = role.map(|r| r.name).unwrap_or_else(|| role_id.to_string());
        let who = member
            .map(|m| m.display_name)
            .unwrap_or_else(|| subject.mention());
        self.notify(&format!(
            "🗑️ {} removed `{}` from {}",
            self.caller.mention(),
            role_name,
            subject.mention()
        ))
        .await;
        Ok(format!("🗑️ Role `{role_name}` has been removed from {who}."))
    }

    async fn prolong(&self, subject: UserId, role_id: RoleId, days: i64) -> Result<String, Failure> {
        if days <= 0 {
            return Err(Failure::Invalid("Days must be a positive number.".to_string()));
        }
        within_limit(days)?;
        let state = self.state;
        let new_expiry = {
            let _key = state.locks.lock(subject, role_id).await;
            state.store.prolong(subject, role_id, days, self.now)?
        };
        tracing::info!(guild = %self.guild, %subject, role = %role_id, days, %new_expiry, "Role prolonged");

        // Names are cosmetic here; fall back to mentions when lookups fail.
        let role_name = match self.role(role_id).await {
            Ok(Some(r)) => r.name,
            _ => role_id.to_string(),
        };
        let who = match self.member(subject).await {
            Ok(Some(m)) => m.display_name,
            _ => subject.mention(),
        };
        self.notify(&format!(
            "🔁 {} prolonged `{}` for {} by {}d",
            self.caller.mention(),
            role_name,
            subject.mention(),
            days
        ))
        .await;
        let left = expiry::remaining(Some(new_expiry), self.now).unwrap_or_else(Duration::zero);
        Ok(format!(
            "🔁 Role `{role_name}` for {who} has been extended by {days} days ({} left).",
            format::remaining(left)
        ))
    }

    fn describe_expiry(&self, expires_at: Option<DateTime<Utc>>) -> String {
        match expiry::remaining(expires_at, self.now) {
            Some(left) => format!("{} left", format::remaining(left)),
            None => "permanent".to_string(),
        }
    }

    async fn list_mine(&self) -> Result<String, Failure> {
        let rows = self.state.store.get_for_subject(self.caller)?;
        if rows.is_empty() {
            return Ok("📭 You have no active roles assigned by the bot.".to_string());
        }
        let roles = self.roles().await?;
        let mut lines = Vec::new();
        for (role_id, expires_at) in rows {
            // Roles from other servers or deleted roles are not shown.
            let Some(role) = platform::find_role(&roles, role_id) else {
                continue;
            };
            lines.push(format!("• `{}` — {}", role.name, self.describe_expiry(expires_at)));
        }
        if lines.is_empty() {
            return Ok("📭 You have no active roles assigned by the bot.".to_string());
        }
        Ok(format::bulleted("🧾 Your active roles:", &lines))
    }

    async fn list_role(&self, role_id: RoleId) -> Result<String, Failure> {
        let role = self.require_role(role_id).await?;
        let rows = self.state.store.get_for_role(role_id)?;
        let mut lines = Vec::new();
        for (user, expires_at) in rows {
            let Some(member) = self.member(user).await? else {
                continue;
            };
            lines.push(format!("• {} — {}", member.display_name, self.describe_expiry(expires_at)));
        }
        if lines.is_empty() {
            return Ok(format!("📭 No users have the role `{}`.", role.name));
        }
        Ok(format::bulleted(&format!("📋 Users with role `{}`:", role.name), &lines))
    }

    async fn list_expiring(&self) -> Result<String, Failure> {
        let rows: Vec<_> = self
            .state
            .store
            .get_expiring(self.now)?
            .into_iter()
            .filter(|a| a.guild_id == self.guild)
            .collect();
        if rows.is_empty() {
            return Ok("✅ No expiring roles found.".to_string());
        }
        let roles = self.roles().await?;
        let mut lines = Vec::new();
        for a in rows {
            let Some(member) = self.member(a.subject_id).await? else {
                continue;
            };
            if member.bot {
                continue;
            }
            let Some(role) = platform::find_role(&roles, a.role_id) else {
                continue;
            };
            let left = expiry::remaining(a.expires_at, self.now).unwrap_or_else(Duration::zero);
            lines.push(format!(
                "• {} — `{}` expires in {}",
                member.display_name,
                role.name,
                format::remaining(left)
            ));
        }
        if lines.is_empty() {
            return Ok("✅ No expiring roles found.".to_string());
        }
        Ok(format::bulleted("⏳ Expiring roles:", &lines))
    }

    async fn random_role(&self, role_id: RoleId, days: i64, count: usize) -> Result<String, Failure> {
        if count == 0 {
            return Err(Failure::Invalid("Count must be at least 1.".to_string()));
        }
        within_limit(days)?;
        let role = self.require_role(role_id).await?;
        let state = self.state;
        let members = platform::bounded(state.platform_timeout, state.platform.list_members(self.guild)).await?;

        let mut eligible = Vec::new();
        for m in members {
            if m.bot || m.has_role(role_id) || state.store.exists(m.user_id, role_id)? {
                continue;
            }
            eligible.push(m);
        }
        if eligible.len() < count {
            return Err(Failure::Invalid(format!(
                "Not enough eligible members. Found only {}.",
                eligible.len()
            )));
        }
        let selected: Vec<Member> = {
            let mut rng = rand::thread_rng();
            eligible.choose_multiple(&mut rng, count).cloned().collect()
        };

        let mut granted = Vec::new();
        let mut failed = 0usize;
        for m in &selected {
            let _key = state.locks.lock(m.user_id, role_id).await;
            // Earlier members may already be granted; a failure here only
            // skips this member so the reply and backup cover the rest.
            match state.store.exists(m.user_id, role_id) {
                Ok(false) => {}
                Ok(true) => {
                    failed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(subject = %m.user_id, role = %role_id, error = %e, "Random grant lookup failed");
                    failed += 1;
                    continue;
                }
            }
            let added = platform::bounded(
                state.platform_timeout,
                state
                    .platform
                    .add_role(self.guild, m.user_id, role_id, &self.reason("Random role draw")),
            )
            .await;
            if let Err(e) = added {
                tracing::warn!(subject = %m.user_id, role = %role_id, error = %e, "Random grant failed");
                failed += 1;
                continue;
            }
            if let Err(e) = state
                .store
                .create(self.guild, m.user_id, role_id, Some(days), self.caller, self.now)
            {
                tracing::error!(subject = %m.user_id, role = %role_id, error = %e, "Random grant not recorded");
                self.roll_back(m.user_id, role_id).await;
                failed += 1;
                continue;
            }
            granted.push(m.user_id.mention());
        }

        let mentions = granted.join(", ");
        tracing::info!(guild = %self.guild, role = %role_id, granted = granted.len(), failed, "Random role draw");
        if !granted.is_empty() {
            self.notify(&format!(
                "🎲 {} assigned `{}`{} to: {}",
                self.caller.mention(),
                role.name,
                format::for_days(Some(days)),
                mentions
            ))
            .await;
        }
        let mut reply = format!(
            "🎲 Assigned role `{}`{} to: {}",
            role.name,
            format::for_days(Some(days)),
            if mentions.is_empty() { "nobody" } else { mentions.as_str() }
        );
        if failed > 0 {
            reply.push_str(&format!(" ({failed} could not be assigned)"));
        }
        Ok(reply)
    }
}
