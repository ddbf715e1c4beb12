//! Core plan types: subscription tiers, the per-user entitlement record,
//! and the rate-limited action kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription tier a user can hold.
///
/// Tier names are ordered by price, but price order does **not** imply a
/// superset of features — `Lite` is deliberately excluded from features that
/// `Trial` includes. Feature access is decided by explicit per-feature
/// allow-sets (see [`crate::features`]), never by comparing tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Trial,
    Lite,
    Pro,
}

impl Tier {
    /// Whether this tier is a paid, renewable subscription (Lite or Pro).
    ///
    /// Trials are time-bounded but not renewable; `renew` only applies here.
    pub fn is_subscription(&self) -> bool {
        matches!(self, Tier::Lite | Tier::Pro)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Trial => write!(f, "trial"),
            Tier::Lite => write!(f, "lite"),
            Tier::Pro => write!(f, "pro"),
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "trial" => Ok(Tier::Trial),
            "lite" => Ok(Tier::Lite),
            "pro" => Ok(Tier::Pro),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// A rate-limited action subject to daily quota on the free tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Solving a practice problem set.
    Practice,
    /// Taking a mock exam.
    Exam,
}

impl ActionType {
    /// All rate-limited action kinds, for status aggregation.
    pub const ALL: [ActionType; 2] = [ActionType::Practice, ActionType::Exam];
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Practice => write!(f, "practice"),
            ActionType::Exam => write!(f, "exam"),
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "practice" => Ok(ActionType::Practice),
            "exam" => Ok(ActionType::Exam),
            other => Err(format!("unknown action type: {}", other)),
        }
    }
}

/// Durable per-user record of tier and period bounds.
///
/// Invariants:
/// - `tier == Free` if and only if both period bounds are `None`.
/// - For non-free tiers, `period_end > period_start`.
///
/// Whether the plan is currently *active* is derived, never stored: see
/// [`crate::resolver::resolve`]. The record is mutated exclusively by
/// [`crate::transitions::PlanTransitionManager`] under compare-and-swap,
/// so an expired non-free record may legitimately persist until the next
/// transition runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub tier: Tier,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// Set once the user has consumed their one trial. Never cleared.
    pub has_used_trial: bool,
}

impl EntitlementRecord {
    /// The implicit initial record every user starts with.
    pub fn free() -> Self {
        Self {
            tier: Tier::Free,
            period_start: None,
            period_end: None,
            has_used_trial: false,
        }
    }

    /// A record on the given non-free tier covering `[start, end)`,
    /// preserving the trial-consumed flag from `self`.
    pub fn with_period(&self, tier: Tier, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            tier,
            period_start: Some(start),
            period_end: Some(end),
            has_used_trial: self.has_used_trial,
        }
    }

    /// Reset to free, preserving the trial-consumed flag.
    pub fn reset_to_free(&self) -> Self {
        Self {
            tier: Tier::Free,
            period_start: None,
            period_end: None,
            has_used_trial: self.has_used_trial,
        }
    }

    /// Check the stored-record invariants.
    pub fn is_well_formed(&self) -> bool {
        match self.tier {
            Tier::Free => self.period_start.is_none() && self.period_end.is_none(),
            _ => match (self.period_start, self.period_end) {
                (Some(start), Some(end)) => end > start,
                _ => false,
            },
        }
    }
}

impl Default for EntitlementRecord {
    fn default() -> Self {
        Self::free()
    }
}
