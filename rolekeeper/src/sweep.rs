//! Periodic cleanup of expired role assignments.
//!
//! Each cycle loads every expired record and, per record, revokes the live
//! role and deletes the row. Platform failures leave the row in place for
//! the next cycle. A member who left or a role that was deleted has nothing
//! to revoke, so the row is dropped without a platform call. Storage errors
//! abort the cycle.
//!
//! Cycles never overlap: a trigger that arrives while one is running is
//! skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::expiry;
use crate::ids::GuildId;
use crate::platform::{self, Platform, PlatformError, Role};
use crate::state::SharedState;
use crate::store::Assignment;

const REVOKE_REASON: &str = "Timed role assignment expired";

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired records selected at the start of the cycle.
    pub examined: usize,
    /// Live role removed and record deleted.
    pub revoked: usize,
    /// Record deleted without a platform call (member or role gone).
    pub purged: usize,
    /// Platform failure; record kept for the next cycle.
    pub failed: usize,
    /// Record changed under us (prolonged or revoked meanwhile).
    pub skipped: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.revoked + self.purged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another cycle was already running.
    Skipped,
}

enum ItemOutcome {
    Revoked,
    Purged,
    Failed,
    Skipped,
}

pub struct Sweeper<P: Platform> {
    state: Arc<SharedState<P>>,
    running: AtomicBool,
}

/// Clears the running flag however the cycle ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<P: Platform> Sweeper<P> {
    pub fn new(state: Arc<SharedState<P>>) -> Self {
        Self {
            state,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle against `now`, unless one is already in progress.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SweepOutcome::Skipped);
        }
        let _running = RunningGuard(&self.running);

        let expired = self.state.store.get_expired(now)?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };
        // Role listings are fetched once per guild per cycle.
        let mut roles = HashMap::new();
        for assignment in &expired {
            match self.process(assignment, now, &mut roles).await? {
                ItemOutcome::Revoked => report.revoked += 1,
                ItemOutcome::Purged => report.purged += 1,
                ItemOutcome::Failed => report.failed += 1,
                ItemOutcome::Skipped => report.skipped += 1,
            }
        }
        Ok(SweepOutcome::Completed(report))
    }

    async fn guild_roles<'c>(
        &self,
        guild: GuildId,
        cache: &'c mut HashMap<GuildId, Vec<Role>>,
    ) -> std::result::Result<&'c [Role], PlatformError> {
        if !cache.contains_key(&guild) {
            let listed = platform::bounded(self.state.platform_timeout, self.state.platform.roles(guild)).await?;
            cache.insert(guild, listed);
        }
        Ok(cache.get(&guild).map(Vec::as_slice).unwrap_or_default())
    }

    async fn process(
        &self,
        a: &Assignment,
        now: DateTime<Utc>,
        roles: &mut HashMap<GuildId, Vec<Role>>,
    ) -> Result<ItemOutcome> {
        let state = &self.state;
        let (guild, subject, role_id) = (a.guild_id, a.subject_id, a.role_id);
        let _key = state.locks.lock(subject, role_id).await;

        // A prolong or revoke may have landed between the query and the lock.
        match state.store.get(subject, role_id)? {
            Some(current) if expiry::is_expired(current.expires_at, now) => {}
            _ => return Ok(ItemOutcome::Skipped),
        }

        let limit = state.platform_timeout;
        let member = platform::bounded(limit, state.platform.member(guild, subject)).await;
        let role = self
            .guild_roles(guild, roles)
            .await
            .map(|listed| platform::find_role(listed, role_id));
        let (member, role) = match (member, role) {
            (Ok(m), Ok(r)) => (m, r),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(%guild, %subject, role = %role_id, error = %e, "Lookup failed, will retry next sweep");
                return Ok(ItemOutcome::Failed);
            }
        };

        let (Some(member), Some(role)) = (member, role) else {
            state.store.delete(subject, role_id)?;
            tracing::info!(%guild, %subject, role = %role_id, "Dropped expired record for departed member or deleted role");
            return Ok(ItemOutcome::Purged);
        };

        let revoked = platform::bounded(
            limit,
            state.platform.remove_role(guild, subject, role_id, REVOKE_REASON),
        )
        .await;
        if let Err(e) = revoked {
            tracing::warn!(%guild, %subject, role = %role_id, error = %e, "Revoke failed, will retry next sweep");
            return Ok(ItemOutcome::Failed);
        }

        state.store.delete(subject, role_id)?;
        tracing::info!(
            %guild,
            %subject,
            role = %role_id,
            "[AUTO] Removed role '{}' from '{}' (expired)",
            role.name,
            member.display_name
        );
        state
            .notify(
                guild,
                &format!("⏰ Auto-removed `{}` from {} (expired)", role.name, subject.mention()),
            )
            .await;
        Ok(ItemOutcome::Revoked)
    }

    async fn tick(&self) {
        match self.run_once(Utc::now()).await {
            Ok(SweepOutcome::Completed(report)) => {
                tracing::info!(
                    examined = report.examined,
                    revoked = report.revoked,
                    purged = report.purged,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Sweep complete"
                );
                if report.removed() > 0 {
                    self.state.schedule_backup();
                }
            }
            Ok(SweepOutcome::Skipped) => tracing::debug!("Sweep already running, skipping"),
            Err(e) => tracing::error!(error = %e, "Sweep aborted"),
        }
    }

    /// Sweep immediately, then every `every`, until `shutdown` flips to true
    /// or its sender goes away. A running cycle always finishes first.
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
        }
        tracing::info!("Sweep stopped");
    }
}
