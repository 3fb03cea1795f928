//! Handles shared by the command layer, the web server and the sweep.

use std::sync::Arc;
use std::time::Duration;

use crate::backup::Backup;
use crate::ids::GuildId;
use crate::keylock::KeyLocks;
use crate::platform::{self, Platform};
use crate::store::Store;

pub struct SharedState<P: Platform> {
    pub store: Store,
    pub platform: P,
    pub locks: KeyLocks,
    pub backup: Option<Backup>,
    /// Upper bound on any single platform call.
    pub platform_timeout: Duration,
}

impl<P: Platform> SharedState<P> {
    pub fn new(store: Store, platform: P, backup: Option<Backup>, platform_timeout: Duration) -> Self {
        Self {
            store,
            platform,
            locks: KeyLocks::new(),
            backup,
            platform_timeout,
        }
    }

    /// Post to the guild's log channel, if one is bound.
    ///
    /// Runs after a change has been committed, so nothing here can fail the
    /// caller: lookup and delivery problems are logged and dropped.
    pub async fn notify(&self, guild: GuildId, text: &str) {
        let channel = match self.store.get_log_channel(guild) {
            Ok(Some(channel)) => channel,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(%guild, error = %e, "Could not read log channel binding");
                return;
            }
        };
        let sent = platform::bounded(self.platform_timeout, self.platform.send_message(channel, text)).await;
        if let Err(e) = sent {
            tracing::warn!(%guild, %channel, error = %e, "Failed to post to log channel");
        }
    }

    /// Push the database to the backup target in the background.
    pub fn schedule_backup(self: &Arc<Self>) {
        if self.backup.is_none() {
            return;
        }
        let state = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(backup) = &state.backup {
                match backup.push(&state.store).await {
                    Ok(()) => tracing::debug!("Database pushed to Dropbox"),
                    Err(e) => tracing::warn!(error = %e, "Dropbox backup failed"),
                }
            }
        });
    }
}
