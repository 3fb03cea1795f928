//! Expiry sweep against the in-memory platform.
//!
//! Tests cover:
//! - The grant → near-expiry listing → sweep lifecycle
//! - Permanent assignments surviving any sweep
//! - Departed members and deleted roles purging their records
//! - Platform failures and timeouts keeping records for the next cycle
//! - Overlapping cycles being skipped
//! - Records prolonged while a cycle waits on them being left alone
//! - One role listing per guild per cycle
//! - The timer loop stopping on shutdown

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use rolekeeper::commands::{self, Command, Invocation};
use rolekeeper::ids::{ChannelId, GuildId, RoleId, UserId};
use rolekeeper::platform::{MockPlatform, Permissions, Platform};
use rolekeeper::state::SharedState;
use rolekeeper::store::Store;
use rolekeeper::sweep::{SweepOutcome, SweepReport, Sweeper};

const GUILD: GuildId = GuildId(1);
const MOD: UserId = UserId(2);
const ALICE: UserId = UserId(10);
const VIP: RoleId = RoleId(20);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn setup_with_timeout(timeout: StdDuration) -> (Arc<SharedState<MockPlatform>>, MockPlatform) {
    let platform = MockPlatform::new();
    platform.add_member(GUILD, ALICE, "alice");
    platform.add_role_def(GUILD, VIP, "VIP");
    let state = SharedState::new(Store::open_memory().unwrap(), platform.clone(), None, timeout);
    (Arc::new(state), platform)
}

fn setup() -> (Arc<SharedState<MockPlatform>>, MockPlatform) {
    setup_with_timeout(StdDuration::from_secs(5))
}

fn report(outcome: SweepOutcome) -> SweepReport {
    match outcome {
        SweepOutcome::Completed(r) => r,
        SweepOutcome::Skipped => panic!("sweep unexpectedly skipped"),
    }
}

async fn grant(state: &Arc<SharedState<MockPlatform>>, days: Option<i64>, now: DateTime<Utc>) -> String {
    let inv = Invocation {
        guild: GUILD,
        caller: MOD,
        permissions: Permissions::MANAGE_ROLES,
        command: Command::Grant { subject: ALICE, role: VIP, days },
    };
    commands::execute(state, inv, now).await
}

#[tokio::test]
async fn one_day_grant_lifecycle() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));

    let reply = grant(&state, Some(1), t0()).await;
    assert!(reply.starts_with("✅"), "{reply}");
    assert_eq!(platform.member_roles(GUILD, ALICE), vec![VIP]);

    let at_23h = t0() + Duration::hours(23);
    let listing = commands::execute_text(&state, GUILD, MOD, Permissions::MANAGE_ROLES, "list-role <@&20>", at_23h).await;
    assert!(listing.contains("alice — 0d 1h 0m 0s left"), "{listing}");

    let early = report(sweeper.run_once(at_23h).await.unwrap());
    assert_eq!(early.examined, 0);
    assert!(state.store.exists(ALICE, VIP).unwrap());

    let late = report(sweeper.run_once(t0() + Duration::hours(25)).await.unwrap());
    assert_eq!(late.examined, 1);
    assert_eq!(late.revoked, 1);
    assert!(!state.store.exists(ALICE, VIP).unwrap());
    assert!(platform.member_roles(GUILD, ALICE).is_empty());
}

#[tokio::test]
async fn permanent_grant_survives_sweeps() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    grant(&state, None, t0()).await;

    for years in [0, 1, 10] {
        let r = report(sweeper.run_once(t0() + Duration::days(365 * years)).await.unwrap());
        assert_eq!(r.examined, 0);
    }
    assert!(state.store.exists(ALICE, VIP).unwrap());
    assert_eq!(platform.member_roles(GUILD, ALICE), vec![VIP]);
}

#[tokio::test]
async fn departed_member_record_is_purged_without_revoke() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();
    platform.remove_member(GUILD, ALICE);

    let r = report(sweeper.run_once(t0() + Duration::days(2)).await.unwrap());
    assert_eq!(r.purged, 1);
    assert_eq!(r.revoked, 0);
    assert_eq!(platform.removal_count(), 0);
    assert!(!state.store.exists(ALICE, VIP).unwrap());
}

#[tokio::test]
async fn deleted_role_record_is_purged() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();
    platform.delete_role_def(GUILD, VIP);

    let r = report(sweeper.run_once(t0() + Duration::days(2)).await.unwrap());
    assert_eq!(r.purged, 1);
    assert!(!state.store.exists(ALICE, VIP).unwrap());
}

#[tokio::test]
async fn failed_revoke_keeps_record_for_next_cycle() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    grant(&state, Some(1), t0()).await;
    platform.fail_removal(ALICE, VIP);

    let later = t0() + Duration::days(2);
    let r = report(sweeper.run_once(later).await.unwrap());
    assert_eq!(r.failed, 1);
    assert!(state.store.exists(ALICE, VIP).unwrap());
    assert_eq!(platform.member_roles(GUILD, ALICE), vec![VIP]);

    platform.clear_failures();
    let r = report(sweeper.run_once(later).await.unwrap());
    assert_eq!(r.revoked, 1);
    assert!(!state.store.exists(ALICE, VIP).unwrap());
}

#[tokio::test]
async fn lookup_failure_keeps_record() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();
    platform.fail_lookups();

    let r = report(sweeper.run_once(t0() + Duration::days(2)).await.unwrap());
    assert_eq!(r.failed, 1);
    assert!(state.store.exists(ALICE, VIP).unwrap());
}

#[tokio::test]
async fn slow_revoke_times_out() {
    let (state, platform) = setup_with_timeout(StdDuration::from_millis(20));
    let sweeper = Sweeper::new(Arc::clone(&state));
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();
    platform.delay_removals(StdDuration::from_millis(500));

    let r = report(sweeper.run_once(t0() + Duration::days(2)).await.unwrap());
    assert_eq!(r.failed, 1);
    assert!(state.store.exists(ALICE, VIP).unwrap());
}

#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let (state, platform) = setup();
    let sweeper = Arc::new(Sweeper::new(Arc::clone(&state)));
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();
    platform.delay_removals(StdDuration::from_millis(300));

    let later = t0() + Duration::days(2);
    let first = {
        let sweeper = Arc::clone(&sweeper);
        tokio::spawn(async move { sweeper.run_once(later).await })
    };
    while !sweeper.is_running() {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }

    assert_eq!(sweeper.run_once(later).await.unwrap(), SweepOutcome::Skipped);
    let r = report(first.await.unwrap().unwrap());
    assert_eq!(r.revoked, 1);
    assert_eq!(platform.removal_count(), 1);
    assert!(!sweeper.is_running());
}

#[tokio::test]
async fn record_prolonged_mid_cycle_is_skipped() {
    let (state, platform) = setup();
    let sweeper = Arc::new(Sweeper::new(Arc::clone(&state)));
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();
    platform.add_role(GUILD, ALICE, VIP, "setup").await.unwrap();

    let later = t0() + Duration::days(2);
    let key = state.locks.lock(ALICE, VIP).await;
    let cycle = {
        let sweeper = Arc::clone(&sweeper);
        tokio::spawn(async move { sweeper.run_once(later).await })
    };
    // The cycle selects the expired row, then waits for the key we hold.
    while !sweeper.is_running() {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    state.store.prolong(ALICE, VIP, 5, later).unwrap();
    drop(key);

    let r = report(cycle.await.unwrap().unwrap());
    assert_eq!(r.examined, 1);
    assert_eq!(r.skipped, 1);
    assert_eq!(r.removed(), 0);
    assert_eq!(platform.removal_count(), 0);
    assert_eq!(platform.member_roles(GUILD, ALICE), vec![VIP]);
    assert_eq!(
        state.store.get(ALICE, VIP).unwrap().unwrap().expires_at,
        Some(later + Duration::days(5))
    );
}

#[tokio::test]
async fn guild_roles_are_listed_once_per_cycle() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    let bob = UserId(11);
    let gold = RoleId(21);
    platform.add_member(GUILD, bob, "bob");
    platform.add_role_def(GUILD, gold, "Gold");
    for (subject, role) in [(ALICE, VIP), (ALICE, gold), (bob, VIP), (bob, gold)] {
        state.store.create(GUILD, subject, role, Some(1), MOD, t0()).unwrap();
        platform.add_role(GUILD, subject, role, "setup").await.unwrap();
    }

    let before = platform.role_listings();
    let r = report(sweeper.run_once(t0() + Duration::days(2)).await.unwrap());
    assert_eq!(r.revoked, 4);
    assert_eq!(platform.role_listings() - before, 1);
}

#[tokio::test]
async fn auto_removal_is_posted_to_log_channel() {
    let (state, platform) = setup();
    let sweeper = Sweeper::new(Arc::clone(&state));
    state.store.set_log_channel(GUILD, Some(ChannelId(99))).unwrap();
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, t0()).unwrap();

    report(sweeper.run_once(t0() + Duration::days(2)).await.unwrap());
    let sent = platform.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, ChannelId(99));
    assert_eq!(sent[0].1, "⏰ Auto-removed `VIP` from <@10> (expired)");
}

#[tokio::test]
async fn timer_loop_sweeps_then_stops_on_shutdown() {
    let (state, _platform) = setup();
    let sweeper = Arc::new(Sweeper::new(Arc::clone(&state)));
    let long_ago = Utc::now() - Duration::days(3);
    state.store.create(GUILD, ALICE, VIP, Some(1), MOD, long_ago).unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(Arc::clone(&sweeper).run(StdDuration::from_secs(3600), rx));

    let mut waited = 0;
    while state.store.exists(ALICE, VIP).unwrap() && waited < 200 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        waited += 1;
    }
    assert!(!state.store.exists(ALICE, VIP).unwrap(), "first tick should sweep immediately");

    tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(2), task)
        .await
        .expect("sweep loop did not stop")
        .unwrap();
}
