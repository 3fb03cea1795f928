//! In-memory [`Platform`] for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Member, Platform, PlatformError, Role};
use crate::ids::{ChannelId, GuildId, RoleId, UserId};

#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    members: HashMap<(GuildId, UserId), Member>,
    roles: HashMap<(GuildId, RoleId), Role>,
    sent: Vec<(ChannelId, String)>,
    replies: Vec<(String, String)>,
    failing_removals: HashSet<(UserId, RoleId)>,
    failing_lookups: bool,
    removal_delay: Option<Duration>,
    removals: usize,
    role_listings: usize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, guild: GuildId, user: UserId, name: &str) {
        self.add_member_with(guild, user, name, false);
    }

    pub fn add_bot(&self, guild: GuildId, user: UserId, name: &str) {
        self.add_member_with(guild, user, name, true);
    }

    fn add_member_with(&self, guild: GuildId, user: UserId, name: &str, bot: bool) {
        self.state.lock().members.insert(
            (guild, user),
            Member {
                user_id: user,
                display_name: name.to_string(),
                bot,
                roles: Vec::new(),
            },
        );
    }

    pub fn remove_member(&self, guild: GuildId, user: UserId) {
        self.state.lock().members.remove(&(guild, user));
    }

    pub fn add_role_def(&self, guild: GuildId, role: RoleId, name: &str) {
        self.state.lock().roles.insert(
            (guild, role),
            Role {
                id: role,
                name: name.to_string(),
            },
        );
    }

    pub fn delete_role_def(&self, guild: GuildId, role: RoleId) {
        self.state.lock().roles.remove(&(guild, role));
    }

    /// Roles the member currently holds on the platform side.
    pub fn member_roles(&self, guild: GuildId, user: UserId) -> Vec<RoleId> {
        self.state
            .lock()
            .members
            .get(&(guild, user))
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }

    pub fn sent_messages(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().sent.clone()
    }

    pub fn interaction_replies(&self) -> Vec<(String, String)> {
        self.state.lock().replies.clone()
    }

    /// Make `remove_role` fail for this pair until cleared.
    pub fn fail_removal(&self, user: UserId, role: RoleId) {
        self.state.lock().failing_removals.insert((user, role));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_removals.clear();
        state.failing_lookups = false;
    }

    pub fn fail_lookups(&self) {
        self.state.lock().failing_lookups = true;
    }

    pub fn delay_removals(&self, delay: Duration) {
        self.state.lock().removal_delay = Some(delay);
    }

    pub fn removal_count(&self) -> usize {
        self.state.lock().removals
    }

    /// Number of full role listings served so far.
    pub fn role_listings(&self) -> usize {
        self.state.lock().role_listings
    }

    fn lookup_guard(&self) -> Result<(), PlatformError> {
        if self.state.lock().failing_lookups {
            return Err(PlatformError::Transport("mock lookup failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn member(&self, guild: GuildId, user: UserId) -> Result<Option<Member>, PlatformError> {
        self.lookup_guard()?;
        Ok(self.state.lock().members.get(&(guild, user)).cloned())
    }

    async fn roles(&self, guild: GuildId) -> Result<Vec<Role>, PlatformError> {
        self.lookup_guard()?;
        let mut state = self.state.lock();
        state.role_listings += 1;
        let mut roles: Vec<Role> = state
            .roles
            .iter()
            .filter(|((g, _), _)| *g == guild)
            .map(|(_, r)| r.clone())
            .collect();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn list_members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError> {
        self.lookup_guard()?;
        let mut members: Vec<Member> = self
            .state
            .lock()
            .members
            .iter()
            .filter(|((g, _), _)| *g == guild)
            .map(|(_, m)| m.clone())
            .collect();
        members.sort_by_key(|m| m.user_id);
        Ok(members)
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if !state.roles.contains_key(&(guild, role)) {
            return Err(PlatformError::Http { status: 404, body: "Unknown Role".to_string() });
        }
        let member = state
            .members
            .get_mut(&(guild, user))
            .ok_or_else(|| PlatformError::Http { status: 404, body: "Unknown Member".to_string() })?;
        if !member.roles.contains(&role) {
            member.roles.push(role);
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        let delay = self.state.lock().removal_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        if state.failing_removals.contains(&(user, role)) {
            return Err(PlatformError::Forbidden("Missing Permissions".to_string()));
        }
        state.removals += 1;
        if let Some(member) = state.members.get_mut(&(guild, user)) {
            member.roles.retain(|r| *r != role);
        }
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError> {
        self.state.lock().sent.push((channel, content.to_string()));
        Ok(())
    }

    async fn edit_interaction_reply(&self, token: &str, content: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .replies
            .push((token.to_string(), content.to_string()));
        Ok(())
    }
}
