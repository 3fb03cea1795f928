//! Discord REST (v10) implementation of [`Platform`].

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{Member, Platform, PlatformError, Role};
use crate::ids::{ChannelId, GuildId, RoleId, UserId};

const API_BASE: &str = "https://discord.com/api/v10";
const MEMBER_PAGE: usize = 1000;

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: UserId,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct ApiMember {
    user: ApiUser,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<RoleId>,
}

impl From<ApiMember> for Member {
    fn from(m: ApiMember) -> Self {
        let display_name = m
            .nick
            .or(m.user.global_name)
            .unwrap_or(m.user.username);
        Member {
            user_id: m.user.id,
            display_name,
            bot: m.user.bot,
            roles: m.roles,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiRole {
    id: RoleId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Bot-token authenticated Discord API client.
pub struct DiscordClient {
    token: String,
    application_id: Option<u64>,
    base: String,
    http: reqwest::Client,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, application_id: Option<u64>) -> Self {
        Self {
            token: token.into(),
            application_id,
            base: API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at a different API root (proxies, local fakes).
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    fn application_id(&self) -> Result<u64, PlatformError> {
        self.application_id
            .ok_or(PlatformError::Unconfigured("DISCORD_APPLICATION_ID"))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, PlatformError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        check(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let resp = self.send(self.http.get(self.url(path))).await?;
        resp.json::<T>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, PlatformError> {
        let resp = self
            .authed(self.http.get(self.url(path)))
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp).await?;
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }

    fn member_role_path(guild: GuildId, user: UserId, role: RoleId) -> String {
        format!("/guilds/{guild}/members/{user}/roles/{role}")
    }

    fn with_reason(req: RequestBuilder, reason: &str) -> RequestBuilder {
        req.header(
            "X-Audit-Log-Reason",
            utf8_percent_encode(reason, NON_ALPHANUMERIC).to_string(),
        )
    }

    /// Overwrite the application's slash commands, globally or for one guild.
    /// Returns the number of commands Discord now has registered.
    pub async fn register_commands(
        &self,
        guild: Option<GuildId>,
        commands: &serde_json::Value,
    ) -> Result<usize, PlatformError> {
        let app = self.application_id()?;
        let path = match guild {
            Some(g) => format!("/applications/{app}/guilds/{g}/commands"),
            None => format!("/applications/{app}/commands"),
        };
        let resp = self.send(self.http.put(self.url(&path)).json(commands)).await?;
        let registered: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok(registered.len())
    }
}

async fn check(resp: Response) -> Result<Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let header_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let body_secs = resp
            .json::<RateLimitBody>()
            .await
            .ok()
            .map(|b| b.retry_after);
        let secs = body_secs.or(header_secs).unwrap_or(1.0).max(0.0);
        return Err(PlatformError::RateLimited {
            retry_after: Duration::from_secs_f64(secs),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::FORBIDDEN {
        return Err(PlatformError::Forbidden(body));
    }
    Err(PlatformError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Platform for DiscordClient {
    async fn member(&self, guild: GuildId, user: UserId) -> Result<Option<Member>, PlatformError> {
        let member: Option<ApiMember> = self
            .get_optional(&format!("/guilds/{guild}/members/{user}"))
            .await?;
        Ok(member.map(Member::from))
    }

    async fn roles(&self, guild: GuildId) -> Result<Vec<Role>, PlatformError> {
        let roles: Option<Vec<ApiRole>> = self.get_optional(&format!("/guilds/{guild}/roles")).await?;
        Ok(roles
            .unwrap_or_default()
            .into_iter()
            .map(|r| Role { id: r.id, name: r.name })
            .collect())
    }

    async fn list_members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError> {
        let mut out = Vec::new();
        let mut after = 0u64;
        loop {
            let page: Vec<ApiMember> = self
                .get_json(&format!(
                    "/guilds/{guild}/members?limit={MEMBER_PAGE}&after={after}"
                ))
                .await?;
            let full = page.len() == MEMBER_PAGE;
            if let Some(last) = page.last() {
                after = last.user.id.get();
            }
            out.extend(page.into_iter().map(Member::from));
            if !full {
                break;
            }
        }
        Ok(out)
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let url = self.url(&Self::member_role_path(guild, user, role));
        self.send(Self::with_reason(self.http.put(url), reason)).await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let url = self.url(&Self::member_role_path(guild, user, role));
        self.send(Self::with_reason(self.http.delete(url), reason)).await?;
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError> {
        let body = serde_json::json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });
        let url = self.url(&format!("/channels/{channel}/messages"));
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn edit_interaction_reply(&self, token: &str, content: &str) -> Result<(), PlatformError> {
        let app = self.application_id()?;
        let body = serde_json::json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });
        let url = self.url(&format!("/webhooks/{app}/{token}/messages/@original"));
        self.send(self.http.patch(url).json(&body)).await?;
        Ok(())
    }
}
