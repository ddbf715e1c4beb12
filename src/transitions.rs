//! Plan transition state machine.
//!
//! All tier changes flow through [`PlanTransitionManager`]: trial start,
//! subscribe, renew, cancel, and trial expiry. Every transition is applied as
//! a read-compute-CAS cycle against the entitlement store; on conflict the
//! whole cycle is retried with backoff up to a small bound, so concurrent
//! writers (two request handlers, or a request racing a background expiry
//! sweep) can never corrupt a record or double-apply an effect.
//!
//! `subscribe`, `cancel`, `start_trial`, and `expire_trial` are idempotent by
//! construction (absolute overwrites or precondition-guarded no-ops). `renew`
//! extends the existing period and is the one non-idempotent operation; CAS
//! is what makes a retried renew safe.
//!
//! # Tracing Events
//!
//! - `plan.transition.applied` - A transition committed
//! - `plan.transition.conflict` - A CAS cycle lost a race and will retry
//! - `plan.transition.exhausted` - Retry budget spent without committing

use crate::error::{Result, StudygateError};
use crate::plan::{EntitlementRecord, Tier};
use crate::store::{CasOutcome, EntitlementStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default trial length.
const DEFAULT_TRIAL_DAYS: i64 = 3;

/// Default subscription period granted by subscribe/renew.
const DEFAULT_SUBSCRIPTION_DAYS: i64 = 30;

/// Default bound on CAS retry cycles per transition.
const DEFAULT_MAX_CAS_RETRIES: u32 = 5;

/// Transition policy: period lengths, trial reuse, and CAS retry behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanPolicy {
    /// How long a trial lasts.
    pub trial_period: Duration,
    /// How long one subscription period lasts (subscribe and renew).
    pub subscription_period: Duration,
    /// Whether a user may only ever start one trial. When `false`, the
    /// precondition relaxes to "currently on the free tier", matching
    /// deployments that let a cancelled user re-trial.
    pub single_trial: bool,
    /// How many times a losing CAS cycle is retried before giving up.
    pub max_cas_retries: u32,
    /// Sleep between CAS retries.
    pub retry_backoff: std::time::Duration,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            trial_period: Duration::days(DEFAULT_TRIAL_DAYS),
            subscription_period: Duration::days(DEFAULT_SUBSCRIPTION_DAYS),
            single_trial: true,
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
            retry_backoff: std::time::Duration::from_millis(25),
        }
    }
}

impl PlanPolicy {
    /// Create a policy with default settings (3-day trial, 30-day periods,
    /// one trial per user).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the trial length.
    #[must_use]
    pub fn trial_period(mut self, period: Duration) -> Self {
        self.trial_period = period;
        self
    }

    /// Set the subscription period length.
    #[must_use]
    pub fn subscription_period(mut self, period: Duration) -> Self {
        self.subscription_period = period;
        self
    }

    /// Allow or forbid repeat trials.
    #[must_use]
    pub fn single_trial(mut self, single: bool) -> Self {
        self.single_trial = single;
        self
    }

    /// Set the CAS retry bound.
    #[must_use]
    pub fn max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries;
        self
    }

    /// Set the sleep between CAS retries.
    #[must_use]
    pub fn retry_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Outcome of a trial-expiry sweep for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialExpiry {
    /// The trial had ended and auto-pay converted the user to Pro.
    ConvertedToPro,
    /// The trial had ended and the user reverted to free.
    Reverted,
    /// The user is no longer on a trial; an earlier sweep or a user action
    /// already handled it. No-op.
    AlreadyHandled,
    /// The trial has not reached its period end yet. No-op.
    NotDue,
}

/// Applies plan transitions to the entitlement store with CAS safety.
pub struct PlanTransitionManager<E> {
    store: Arc<E>,
    policy: PlanPolicy,
}

impl<E: EntitlementStore> PlanTransitionManager<E> {
    /// Create a manager over a shared store handle.
    pub fn new(store: Arc<E>, policy: PlanPolicy) -> Self {
        Self { store, policy }
    }

    /// Create a manager with the default policy.
    pub fn with_defaults(store: Arc<E>) -> Self {
        Self::new(store, PlanPolicy::default())
    }

    /// Start a trial: free tier only, and (by default) only if the user has
    /// never used one. The trial runs `[now, now + trial_period)` and marks
    /// the trial as consumed.
    pub async fn start_trial(&self, user_id: &str, now: DateTime<Utc>) -> Result<EntitlementRecord> {
        let trial_period = self.policy.trial_period;
        let single_trial = self.policy.single_trial;
        self.apply(user_id, "start_trial", move |current| {
            if current.tier != Tier::Free {
                return Err(StudygateError::invalid_transition(format!(
                    "cannot start a trial from the {} tier",
                    current.tier
                )));
            }
            if single_trial && current.has_used_trial {
                return Err(StudygateError::invalid_transition(
                    "trial has already been used",
                ));
            }
            let mut next = current.with_period(Tier::Trial, now, now + trial_period);
            next.has_used_trial = true;
            Ok(next)
        })
        .await
    }

    /// Subscribe to Lite or Pro: an absolute overwrite, valid from any state.
    /// The new period is `[now, now + subscription_period)`; there is no
    /// merging with any previous period.
    pub async fn subscribe(
        &self,
        user_id: &str,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<EntitlementRecord> {
        if !tier.is_subscription() {
            return Err(StudygateError::invalid_transition(format!(
                "cannot subscribe to the {} tier",
                tier
            )));
        }
        let period = self.policy.subscription_period;
        self.apply(user_id, "subscribe", move |current| {
            Ok(current.with_period(tier, now, now + period))
        })
        .await
    }

    /// Renew an active or lapsed subscription: `period_end` becomes
    /// `max(period_end, now) + subscription_period`, so an early renew stacks
    /// onto the remaining time and a late renew restarts from now.
    pub async fn renew(&self, user_id: &str, now: DateTime<Utc>) -> Result<EntitlementRecord> {
        let period = self.policy.subscription_period;
        self.apply(user_id, "renew", move |current| {
            if !current.tier.is_subscription() {
                return Err(StudygateError::invalid_transition(format!(
                    "cannot renew from the {} tier",
                    current.tier
                )));
            }
            let base = current.period_end.map_or(now, |end| end.max(now));
            let mut next = current.clone();
            next.period_end = Some(base + period);
            Ok(next)
        })
        .await
    }

    /// Cancel: unconditional reset to free with no period bounds. Idempotent;
    /// the trial-consumed flag survives.
    pub async fn cancel(&self, user_id: &str) -> Result<EntitlementRecord> {
        self.apply(user_id, "cancel", |current| Ok(current.reset_to_free()))
            .await
    }

    /// Sweep one user's expired trial. Acts only when the user is on a trial
    /// whose period has ended: converts to Pro when `auto_pay_to_pro`
    /// (identical effect to `subscribe(Pro, now)`), otherwise reverts to free
    /// (identical effect to `cancel`). Any other state is a no-op, which is
    /// what makes overlapping background sweeps idempotent.
    pub async fn expire_trial(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        auto_pay_to_pro: bool,
    ) -> Result<TrialExpiry> {
        for attempt in 0..=self.policy.max_cas_retries {
            let current = self.get_record(user_id).await?;

            if current.tier != Tier::Trial {
                return Ok(TrialExpiry::AlreadyHandled);
            }
            match current.period_end {
                Some(end) if now >= end => {}
                _ => return Ok(TrialExpiry::NotDue),
            }

            let (next, outcome) = if auto_pay_to_pro {
                (
                    current.with_period(Tier::Pro, now, now + self.policy.subscription_period),
                    TrialExpiry::ConvertedToPro,
                )
            } else {
                (current.reset_to_free(), TrialExpiry::Reverted)
            };

            match self.store.compare_and_set(user_id, &current, next).await? {
                CasOutcome::Committed => {
                    tracing::info!(
                        target: "plan.transition.applied",
                        user_id = %user_id,
                        op = "expire_trial",
                        outcome = ?outcome,
                        "Trial expiry processed"
                    );
                    return Ok(outcome);
                }
                CasOutcome::Conflict => self.on_conflict(user_id, "expire_trial", attempt).await,
            }
        }

        Err(self.exhausted(user_id, "expire_trial"))
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> &PlanPolicy {
        &self.policy
    }

    /// Run one transition as a bounded read-compute-CAS loop.
    ///
    /// `compute` sees the freshly read record on every cycle, so precondition
    /// checks are re-evaluated against whatever the winning writer left
    /// behind.
    async fn apply<F>(&self, user_id: &str, op: &'static str, compute: F) -> Result<EntitlementRecord>
    where
        F: Fn(&EntitlementRecord) -> Result<EntitlementRecord>,
    {
        for attempt in 0..=self.policy.max_cas_retries {
            let current = self.get_record(user_id).await?;
            let next = compute(&current)?;
            debug_assert!(next.is_well_formed());

            match self
                .store
                .compare_and_set(user_id, &current, next.clone())
                .await?
            {
                CasOutcome::Committed => {
                    tracing::info!(
                        target: "plan.transition.applied",
                        user_id = %user_id,
                        op = op,
                        tier = %next.tier,
                        period_end = ?next.period_end,
                        "Plan transition applied"
                    );
                    return Ok(next);
                }
                CasOutcome::Conflict => self.on_conflict(user_id, op, attempt).await,
            }
        }

        Err(self.exhausted(user_id, op))
    }

    async fn get_record(&self, user_id: &str) -> Result<EntitlementRecord> {
        self.store
            .get(user_id)
            .await?
            .ok_or_else(|| StudygateError::not_found(format!("user {}", user_id)))
    }

    async fn on_conflict(&self, user_id: &str, op: &'static str, attempt: u32) {
        tracing::debug!(
            target: "plan.transition.conflict",
            user_id = %user_id,
            op = op,
            attempt = attempt,
            "Lost CAS race, retrying"
        );
        if !self.policy.retry_backoff.is_zero() {
            tokio::time::sleep(self.policy.retry_backoff).await;
        }
    }

    fn exhausted(&self, user_id: &str, op: &'static str) -> StudygateError {
        tracing::warn!(
            target: "plan.transition.exhausted",
            user_id = %user_id,
            op = op,
            retries = self.policy.max_cas_retries,
            "Transition did not commit within retry budget"
        );
        StudygateError::transition_conflict(format!(
            "{} for user {} did not commit after {} retries",
            op, user_id, self.policy.max_cas_retries
        ))
    }
}
