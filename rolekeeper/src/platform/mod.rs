//! Chat-platform capability used by the command layer and the sweep.
//!
//! `Platform` is injected everywhere a live lookup or role mutation is
//! needed. `DiscordClient` talks to the real REST API; `MockPlatform` keeps
//! everything in memory for tests.

pub mod discord;
pub mod mock;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::ids::{ChannelId, GuildId, RoleId, UserId};

pub use discord::DiscordClient;
pub use mock::MockPlatform;

/// A live guild member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub bot: bool,
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// A live guild role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// Permission bitset as sent by Discord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const MANAGE_GUILD: Permissions = Permissions(1 << 5);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);

    pub fn all() -> Self {
        Permissions(u64::MAX)
    }

    /// Administrators implicitly hold every permission.
    pub fn contains(self, other: Permissions) -> bool {
        self.0 & Self::ADMINISTRATOR.0 != 0 || self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("not configured: {0}")]
    Unconfigured(&'static str),
}

#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Look up a member. `Ok(None)` when the user is not in the guild.
    async fn member(&self, guild: GuildId, user: UserId) -> Result<Option<Member>, PlatformError>;

    /// Every role defined in the guild.
    async fn roles(&self, guild: GuildId) -> Result<Vec<Role>, PlatformError>;

    /// Look up a role. `Ok(None)` when the role no longer exists.
    ///
    /// Costs a full [`Platform::roles`] listing; callers resolving several
    /// roles should list once and use [`find_role`].
    async fn role(&self, guild: GuildId, role: RoleId) -> Result<Option<Role>, PlatformError> {
        Ok(find_role(&self.roles(guild).await?, role))
    }

    async fn list_members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError>;

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError>;

    /// Replace the body of a deferred interaction response.
    async fn edit_interaction_reply(&self, token: &str, content: &str) -> Result<(), PlatformError>;
}

pub fn find_role(roles: &[Role], id: RoleId) -> Option<Role> {
    roles.iter().find(|r| r.id == id).cloned()
}

/// Run a platform call with an upper bound on its duration.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, PlatformError>
where
    F: Future<Output = Result<T, PlatformError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Timeout(limit)),
    }
}
