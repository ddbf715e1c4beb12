//! The entitlement engine facade.
//!
//! [`EntitlementEngine`] wires the resolver, quota enforcer, transition
//! manager, and feature gate over shared store handles and exposes the
//! surface the API layer calls. Every method returns a structured value —
//! quota denials and feature denials are decisions, not errors — and every
//! method takes the current instant explicitly so callers (and tests) own
//! the clock; request handlers simply pass `Utc::now()`.

use crate::error::{Result, StudygateError};
use crate::features::{Feature, FeatureCatalog, FeatureDecision, FeatureGate};
use crate::plan::{ActionType, Tier};
use crate::quota::{QuotaDecision, QuotaEnforcer, QuotaPolicy};
use crate::resolver::{resolve, EffectivePlan};
use crate::store::{EntitlementStore, UsageStore};
use crate::transitions::{PlanPolicy, PlanTransitionManager, TrialExpiry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Aggregate answer to "what can this user do right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStatus {
    /// The stored tier (possibly expired).
    pub tier: Tier,
    /// Whether the tier is currently in force.
    pub active: bool,
    /// When the current period ends, for non-free tiers.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the one-shot trial has been consumed.
    pub has_used_trial: bool,
    /// Practice sessions left today; `None` means unlimited.
    pub practice_remaining: Option<u32>,
    /// Mock exams left today; `None` means unlimited.
    pub exam_remaining: Option<u32>,
}

/// Entitlement and usage-quota engine.
///
/// # Example
///
/// ```rust,no_run
/// use studygate::{ActionType, EntitlementEngine, Feature, Tier};
/// use studygate::store::{InMemoryEntitlementStore, InMemoryUsageStore};
/// use chrono::Utc;
/// use std::sync::Arc;
///
/// # async fn run() -> studygate::Result<()> {
/// let entitlements = Arc::new(InMemoryEntitlementStore::new());
/// let usage = Arc::new(InMemoryUsageStore::new());
/// entitlements.insert_user("u-1").await;
///
/// let engine = EntitlementEngine::new(entitlements, usage);
///
/// let decision = engine.consume_quota("u-1", ActionType::Practice, Utc::now()).await?;
/// if decision.allowed {
///     // run the practice session
/// }
///
/// engine.subscribe("u-1", Tier::Pro, Utc::now()).await?;
/// let check = engine.check_feature(Feature::Community, "u-1", Utc::now()).await?;
/// assert!(check.allowed);
/// # Ok(())
/// # }
/// ```
pub struct EntitlementEngine<E, U> {
    entitlements: Arc<E>,
    transitions: PlanTransitionManager<E>,
    quota: QuotaEnforcer<E, U>,
    gate: FeatureGate<E>,
}

impl<E: EntitlementStore, U: UsageStore> EntitlementEngine<E, U> {
    /// Create an engine with default policies and the built-in feature
    /// catalog.
    pub fn new(entitlements: Arc<E>, usage: Arc<U>) -> Self {
        Self::with_policies(
            entitlements,
            usage,
            PlanPolicy::default(),
            QuotaPolicy::default(),
            FeatureCatalog::default(),
        )
    }

    /// Create an engine with explicit policies.
    pub fn with_policies(
        entitlements: Arc<E>,
        usage: Arc<U>,
        plan_policy: PlanPolicy,
        quota_policy: QuotaPolicy,
        catalog: FeatureCatalog,
    ) -> Self {
        Self {
            transitions: PlanTransitionManager::new(Arc::clone(&entitlements), plan_policy),
            quota: QuotaEnforcer::new(Arc::clone(&entitlements), usage, quota_policy),
            gate: FeatureGate::new(Arc::clone(&entitlements), catalog),
            entitlements,
        }
    }

    /// The user's effective plan plus today's remaining quota per action.
    pub async fn status(&self, user_id: &str, now: DateTime<Utc>) -> Result<PlanStatus> {
        let record = self
            .entitlements
            .get(user_id)
            .await?
            .ok_or_else(|| StudygateError::not_found(format!("user {}", user_id)))?;
        let plan = resolve(&record, now);

        let practice_remaining = self.quota.remaining(user_id, ActionType::Practice, now).await?;
        let exam_remaining = self.quota.remaining(user_id, ActionType::Exam, now).await?;

        Ok(PlanStatus {
            tier: plan.tier,
            active: plan.active,
            expires_at: plan.expires_at,
            has_used_trial: record.has_used_trial,
            practice_remaining,
            exam_remaining,
        })
    }

    /// Start the user's trial. See [`PlanTransitionManager::start_trial`].
    pub async fn start_trial(&self, user_id: &str, now: DateTime<Utc>) -> Result<EffectivePlan> {
        let record = self.transitions.start_trial(user_id, now).await?;
        Ok(resolve(&record, now))
    }

    /// Subscribe to Lite or Pro. See [`PlanTransitionManager::subscribe`].
    pub async fn subscribe(
        &self,
        user_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<EffectivePlan> {
        let record = self.transitions.subscribe(user_id, tier, now).await?;
        Ok(resolve(&record, now))
    }

    /// Extend the current subscription. See [`PlanTransitionManager::renew`].
    pub async fn renew(&self, user_id: &str, now: DateTime<Utc>) -> Result<EffectivePlan> {
        let record = self.transitions.renew(user_id, now).await?;
        Ok(resolve(&record, now))
    }

    /// Drop back to the free tier. See [`PlanTransitionManager::cancel`].
    pub async fn cancel(&self, user_id: &str, now: DateTime<Utc>) -> Result<EffectivePlan> {
        let record = self.transitions.cancel(user_id).await?;
        Ok(resolve(&record, now))
    }

    /// Process a possibly-expired trial (background sweep entry point).
    /// See [`PlanTransitionManager::expire_trial`].
    pub async fn expire_trial(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        auto_pay_to_pro: bool,
    ) -> Result<TrialExpiry> {
        self.transitions.expire_trial(user_id, now, auto_pay_to_pro).await
    }

    /// Atomically consume one unit of a rate-limited action.
    /// See [`QuotaEnforcer::consume`].
    pub async fn consume_quota(
        &self,
        user_id: &str,
        action: ActionType,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        self.quota.consume(user_id, action, now).await
    }

    /// Check whether a binary feature is unlocked for the user.
    /// See [`FeatureGate::is_allowed`].
    pub async fn check_feature(
        &self,
        feature: Feature,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FeatureDecision> {
        self.gate.is_allowed(feature, user_id, now).await
    }

    /// The transition manager, for callers that need its policy.
    pub fn transitions(&self) -> &PlanTransitionManager<E> {
        &self.transitions
    }

    /// The quota enforcer, for callers that need its policy.
    pub fn quota(&self) -> &QuotaEnforcer<E, U> {
        &self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryEntitlementStore, InMemoryUsageStore};

    async fn engine_with_user(
        user_id: &str,
    ) -> EntitlementEngine<InMemoryEntitlementStore, InMemoryUsageStore> {
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        entitlements.insert_user(user_id).await;
        EntitlementEngine::new(entitlements, Arc::new(InMemoryUsageStore::new()))
    }

    #[tokio::test]
    async fn test_status_for_fresh_free_user() {
        let engine = engine_with_user("u-1").await;
        let status = engine.status("u-1", Utc::now()).await.unwrap();

        assert_eq!(status.tier, Tier::Free);
        assert!(!status.active);
        assert!(status.expires_at.is_none());
        assert!(!status.has_used_trial);
        assert_eq!(status.practice_remaining, Some(3));
        assert_eq!(status.exam_remaining, Some(3));
    }

    #[tokio::test]
    async fn test_status_reflects_consumption() {
        let engine = engine_with_user("u-1").await;
        let now = Utc::now();

        engine.consume_quota("u-1", ActionType::Practice, now).await.unwrap();
        engine.consume_quota("u-1", ActionType::Practice, now).await.unwrap();

        let status = engine.status("u-1", now).await.unwrap();
        assert_eq!(status.practice_remaining, Some(1));
        assert_eq!(status.exam_remaining, Some(3));
    }

    #[tokio::test]
    async fn test_status_for_subscriber_is_unmetered() {
        let engine = engine_with_user("u-1").await;
        let now = Utc::now();
        engine.subscribe("u-1", Tier::Pro, now).await.unwrap();

        let status = engine.status("u-1", now).await.unwrap();
        assert_eq!(status.tier, Tier::Pro);
        assert!(status.active);
        assert!(status.expires_at.is_some());
        assert_eq!(status.practice_remaining, None);
        assert_eq!(status.exam_remaining, None);
    }

    #[tokio::test]
    async fn test_transitions_return_effective_plan() {
        let engine = engine_with_user("u-1").await;
        let now = Utc::now();

        let plan = engine.start_trial("u-1", now).await.unwrap();
        assert_eq!(plan.tier, Tier::Trial);
        assert!(plan.active);

        let plan = engine.cancel("u-1", now).await.unwrap();
        assert_eq!(plan.tier, Tier::Free);
        assert!(!plan.active);
    }

    #[tokio::test]
    async fn test_unknown_user_status_is_not_found() {
        let engine = engine_with_user("u-1").await;
        let err = engine.status("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StudygateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_serializes_for_the_api_layer() {
        let engine = engine_with_user("u-1").await;
        let status = engine.status("u-1", Utc::now()).await.unwrap();

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["tier"], "free");
        assert_eq!(json["active"], false);
        assert_eq!(json["practice_remaining"], 3);
    }
}
