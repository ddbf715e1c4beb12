//! Effective-plan resolution.
//!
//! [`resolve`] is the single function that answers "what plan does this user
//! effectively hold right now?". It is pure: same record and instant always
//! produce the same answer, and it never mutates stored state. An expired
//! non-free record is reported inactive but left untouched — cleaning it up
//! is [`crate::transitions::PlanTransitionManager`]'s exclusive job, so the
//! resolver's answer and the stored record may legitimately disagree until a
//! transition runs.

use crate::plan::{EntitlementRecord, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The effective plan: tier plus derived activity at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePlan {
    /// The stored tier, which may be expired.
    pub tier: Tier,
    /// Whether the tier is currently in force. Always `false` for `Free`.
    pub active: bool,
    /// When the current period ends, for non-free tiers.
    pub expires_at: Option<DateTime<Utc>>,
}

impl EffectivePlan {
    /// Whether daily quotas apply: everyone without an active paid-or-trial
    /// plan is effectively free.
    pub fn is_effectively_free(&self) -> bool {
        !self.active
    }
}

/// Compute the effective plan from a stored record and the current time.
///
/// `active` is `false` whenever `tier == Free`, regardless of any stale
/// dates; for non-free tiers the record is active strictly before
/// `period_end`.
pub fn resolve(record: &EntitlementRecord, now: DateTime<Utc>) -> EffectivePlan {
    if record.tier == Tier::Free {
        return EffectivePlan {
            tier: Tier::Free,
            active: false,
            expires_at: None,
        };
    }

    let active = record.period_end.map(|end| now < end).unwrap_or(false);
    EffectivePlan {
        tier: record.tier,
        active,
        expires_at: record.period_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(tier: Tier, start: DateTime<Utc>, end: DateTime<Utc>) -> EntitlementRecord {
        EntitlementRecord {
            tier,
            period_start: Some(start),
            period_end: Some(end),
            has_used_trial: false,
        }
    }

    #[test]
    fn test_free_is_never_active() {
        let now = Utc::now();
        let plan = resolve(&EntitlementRecord::free(), now);
        assert_eq!(plan.tier, Tier::Free);
        assert!(!plan.active);
        assert!(plan.expires_at.is_none());
        assert!(plan.is_effectively_free());
    }

    #[test]
    fn test_free_with_stale_dates_is_still_inactive() {
        // A malformed record (free tier, leftover dates) must not grant access.
        let now = Utc::now();
        let stale = EntitlementRecord {
            tier: Tier::Free,
            period_start: Some(now - Duration::days(1)),
            period_end: Some(now + Duration::days(1)),
            has_used_trial: true,
        };
        let plan = resolve(&stale, now);
        assert!(!plan.active);
        assert!(plan.expires_at.is_none());
    }

    #[test]
    fn test_active_within_period() {
        let now = Utc::now();
        let rec = record(Tier::Pro, now - Duration::days(1), now + Duration::days(29));
        let plan = resolve(&rec, now);
        assert_eq!(plan.tier, Tier::Pro);
        assert!(plan.active);
        assert_eq!(plan.expires_at, rec.period_end);
        assert!(!plan.is_effectively_free());
    }

    #[test]
    fn test_active_at_period_start_inactive_at_period_end() {
        let start = Utc::now();
        let end = start + Duration::days(3);
        let rec = record(Tier::Trial, start, end);

        assert!(resolve(&rec, start).active);
        assert!(resolve(&rec, end - Duration::seconds(1)).active);
        // Expiry boundary is exclusive: inactive exactly at period_end.
        assert!(!resolve(&rec, end).active);
        assert!(!resolve(&rec, end + Duration::seconds(1)).active);
    }

    #[test]
    fn test_expired_tier_is_reported_not_rewritten() {
        let now = Utc::now();
        let rec = record(Tier::Lite, now - Duration::days(40), now - Duration::days(10));
        let plan = resolve(&rec, now);
        // The stored tier survives in the answer even though it is expired.
        assert_eq!(plan.tier, Tier::Lite);
        assert!(!plan.active);
        assert_eq!(plan.expires_at, rec.period_end);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let now = Utc::now();
        let rec = record(Tier::Trial, now, now + Duration::days(3));
        assert_eq!(resolve(&rec, now), resolve(&rec, now));
    }
}
