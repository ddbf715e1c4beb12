//! Storage traits for entitlement records and usage counters.
//!
//! These traits abstract the durable store so the engine can run against a
//! relational database, Redis, or the bundled in-memory backends. The engine
//! assumes multiple service instances share the store with no common
//! in-process memory, so every mutation the traits expose is atomic:
//! entitlement writes are conditional (compare-and-swap) and usage counter
//! updates are single increment-and-read operations. A split
//! read-then-write sequence is never part of the contract.

use crate::error::Result;
use crate::plan::{ActionType, EntitlementRecord};
use async_trait::async_trait;
use chrono::NaiveDate;

mod memory;

pub use memory::{InMemoryEntitlementStore, InMemoryUsageStore};

/// Calendar-day bucket used to reset usage counters.
///
/// Computed from the current instant in the deployment's fixed reference
/// timezone (see [`crate::quota::QuotaPolicy`]). Old day keys simply become
/// irrelevant at rollover; stores may garbage-collect them on any schedule.
pub type DayKey = NaiveDate;

/// Outcome of a conditional entitlement write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was unchanged since it was read; the write took effect.
    Committed,
    /// Another writer got there first. Re-read and retry.
    Conflict,
}

/// Durable per-user record of tier and period bounds.
///
/// Implement this for your database layer. The record for a user is created
/// implicitly (free tier) when the user is created, mutated only through
/// compare-and-swap, and never deleted.
///
/// # Example
///
/// ```rust,ignore
/// use studygate::{CasOutcome, EntitlementRecord, EntitlementStore};
/// use async_trait::async_trait;
///
/// struct PgEntitlementStore {
///     pool: sqlx::PgPool,
/// }
///
/// #[async_trait]
/// impl EntitlementStore for PgEntitlementStore {
///     async fn get(&self, user_id: &str) -> studygate::Result<Option<EntitlementRecord>> {
///         // SELECT ... WHERE user_id = $1
///         # unimplemented!()
///     }
///
///     async fn compare_and_set(
///         &self,
///         user_id: &str,
///         expected: &EntitlementRecord,
///         next: EntitlementRecord,
///     ) -> studygate::Result<CasOutcome> {
///         // UPDATE ... SET ... WHERE user_id = $1 AND tier = $2 AND ...
///         // zero rows affected => CasOutcome::Conflict
///         # unimplemented!()
///     }
/// }
/// ```
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Fetch the record for a user, or `None` if the user is unknown.
    async fn get(&self, user_id: &str) -> Result<Option<EntitlementRecord>>;

    /// Write `next` only if the stored record still equals `expected`.
    ///
    /// Implementations must make the comparison and the write atomic — a
    /// version column, a conditional `UPDATE` matching every field, or a
    /// serializable transaction all qualify.
    async fn compare_and_set(
        &self,
        user_id: &str,
        expected: &EntitlementRecord,
        next: EntitlementRecord,
    ) -> Result<CasOutcome>;
}

/// Durable per-user/action/day atomic counters.
///
/// Counters are created on first increment for a given day key and only ever
/// touched through these operations.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically increment the counter and return the post-increment value.
    ///
    /// Concurrent callers must each observe a distinct value; this is what
    /// makes the daily cap race-free.
    async fn increment(&self, user_id: &str, action: ActionType, day: DayKey) -> Result<u64>;

    /// Compensate a rejected increment so a denied call does not permanently
    /// consume a slot. Must not drop the counter below zero.
    async fn decrement(&self, user_id: &str, action: ActionType, day: DayKey) -> Result<()>;

    /// Read the counter without modifying it (for status reporting).
    async fn current(&self, user_id: &str, action: ActionType, day: DayKey) -> Result<u64>;
}
