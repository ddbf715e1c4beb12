//! Feature gating by tier allow-sets.
//!
//! Each feature declares an explicit *set* of tiers that unlock it rather
//! than a minimum tier, because tier price order does not imply a superset
//! of features: Lite costs more than a trial is worth, yet the community and
//! AI features are deliberately Trial-and-Pro only. An expired tier
//! satisfies no requirement — the gate consults the resolver, not the raw
//! stored tier.
//!
//! # Tracing Events
//!
//! - `feature.denied` - A gated feature was requested by a tier outside its allow-set

use crate::error::{Result, StudygateError};
use crate::plan::Tier;
use crate::resolver::resolve;
use crate::store::EntitlementStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A binary (non-countable) gated capability of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Posting and commenting in the study community.
    Community,
    /// AI-generated explanations and study coaching.
    AiTutor,
    /// Ad-free experience.
    AdFree,
    /// Access to the past-exam archive.
    ExamArchive,
}

impl Feature {
    /// All gated features, for status aggregation.
    pub const ALL: [Feature; 4] = [
        Feature::Community,
        Feature::AiTutor,
        Feature::AdFree,
        Feature::ExamArchive,
    ];

    /// The built-in allow-set for this feature.
    ///
    /// Community and AI are Trial-and-Pro only: Lite is priced for solo
    /// study and excludes the social/AI surface on purpose.
    fn default_unlocked_by(&self) -> &'static [Tier] {
        match self {
            Feature::Community => &[Tier::Trial, Tier::Pro],
            Feature::AiTutor => &[Tier::Trial, Tier::Pro],
            Feature::AdFree => &[Tier::Trial, Tier::Lite, Tier::Pro],
            Feature::ExamArchive => &[Tier::Trial, Tier::Lite, Tier::Pro],
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Community => write!(f, "community"),
            Feature::AiTutor => write!(f, "ai_tutor"),
            Feature::AdFree => write!(f, "ad_free"),
            Feature::ExamArchive => write!(f, "exam_archive"),
        }
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "community" => Ok(Feature::Community),
            "ai_tutor" => Ok(Feature::AiTutor),
            "ad_free" => Ok(Feature::AdFree),
            "exam_archive" => Ok(Feature::ExamArchive),
            other => Err(format!("unknown feature: {}", other)),
        }
    }
}

/// Feature-to-allow-set lookup table.
///
/// Starts with the built-in sets; deployments can override individual
/// features at construction.
#[derive(Debug, Clone, Default)]
pub struct FeatureCatalog {
    overrides: HashMap<Feature, Vec<Tier>>,
}

impl FeatureCatalog {
    /// Catalog with the built-in allow-sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the allow-set for one feature.
    #[must_use]
    pub fn unlock(mut self, feature: Feature, tiers: impl Into<Vec<Tier>>) -> Self {
        self.overrides.insert(feature, tiers.into());
        self
    }

    /// The tiers that unlock a feature.
    #[must_use]
    pub fn unlocked_by(&self, feature: Feature) -> &[Tier] {
        self.overrides
            .get(&feature)
            .map(Vec::as_slice)
            .unwrap_or_else(|| feature.default_unlocked_by())
    }
}

/// Outcome of a feature check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDecision {
    /// Whether the user may use the feature right now.
    pub allowed: bool,
    /// The user's stored tier (possibly expired).
    pub current_tier: Tier,
    /// The tiers that unlock the feature, for upsell messaging.
    pub unlocked_by: Vec<Tier>,
}

/// Maps a requested feature to the tiers that may use it.
pub struct FeatureGate<E> {
    entitlements: Arc<E>,
    catalog: FeatureCatalog,
}

impl<E: EntitlementStore> FeatureGate<E> {
    /// Create a gate over a shared store handle.
    pub fn new(entitlements: Arc<E>, catalog: FeatureCatalog) -> Self {
        Self {
            entitlements,
            catalog,
        }
    }

    /// Create a gate with the built-in catalog.
    pub fn with_defaults(entitlements: Arc<E>) -> Self {
        Self::new(entitlements, FeatureCatalog::new())
    }

    /// Decide whether `user_id` may use `feature` at instant `now`.
    ///
    /// Allowed iff the user's effective plan is active *and* its tier is in
    /// the feature's allow-set; an expired non-free tier satisfies nothing.
    pub async fn is_allowed(
        &self,
        feature: Feature,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FeatureDecision> {
        let record = self
            .entitlements
            .get(user_id)
            .await?
            .ok_or_else(|| StudygateError::not_found(format!("user {}", user_id)))?;

        let plan = resolve(&record, now);
        let unlocked_by = self.catalog.unlocked_by(feature).to_vec();
        let allowed = plan.active && unlocked_by.contains(&plan.tier);

        if !allowed {
            tracing::debug!(
                target: "feature.denied",
                user_id = %user_id,
                feature = %feature,
                tier = %plan.tier,
                active = plan.active,
                "Feature not unlocked by current plan"
            );
        }

        Ok(FeatureDecision {
            allowed,
            current_tier: plan.tier,
            unlocked_by,
        })
    }

    /// The catalog in force.
    #[must_use]
    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }
}
