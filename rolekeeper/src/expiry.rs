//! Expiry arithmetic for role assignments.
//!
//! Everything here is pure and total. Days are fixed 24h spans in UTC.
//! A timestamp `t` is expired at `now` when `t <= now`; a prolong on an
//! already-expired (or permanent) assignment starts counting from `now`.

use chrono::{DateTime, Duration, Utc};

/// Longest duration an assignment can be given, about a century. Larger
/// inputs are clamped so the arithmetic below cannot overflow.
pub const MAX_DAYS: i64 = 36_500;

/// Length of `n` assignment days.
pub fn days(n: i64) -> Duration {
    Duration::hours(24 * n.clamp(-MAX_DAYS, MAX_DAYS))
}

/// Expiry for an assignment created at `now`. `None` means permanent.
pub fn compute_expiry(now: DateTime<Utc>, duration_days: Option<i64>) -> Option<DateTime<Utc>> {
    match duration_days {
        Some(d) if d > 0 => Some(later(now, d)),
        _ => None,
    }
}

fn later(t: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    t.checked_add_signed(days(n)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn is_expired(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expiry {
        Some(t) => t <= now,
        None => false,
    }
}

/// New expiry after extending by `extra_days`.
///
/// Extends from the stored expiry while it is still in the future, otherwise
/// from `now`. Non-positive `extra_days` leaves the base unchanged.
pub fn prolong(existing: Option<DateTime<Utc>>, now: DateTime<Utc>, extra_days: i64) -> DateTime<Utc> {
    let base = match existing {
        Some(t) if !is_expired(Some(t), now) => t,
        _ => now,
    };
    later(base, extra_days.max(0))
}

/// Time left before expiry, clamped at zero. `None` for permanent.
pub fn remaining(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    expiry.map(|t| (t - now).max(Duration::zero()))
}
