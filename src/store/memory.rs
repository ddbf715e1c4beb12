//! In-memory store implementations.
//!
//! These backends use in-memory data structures and are suitable for
//! development, testing, and single-instance deployments. They honor the
//! same atomicity contracts as a durable implementation: the entitlement
//! CAS compares the whole record under one lock, and counter increments
//! hand out distinct post-increment values.

use crate::error::Result;
use crate::plan::{ActionType, EntitlementRecord};
use crate::store::{CasOutcome, DayKey, EntitlementStore, UsageStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory entitlement record store.
#[derive(Default)]
pub struct InMemoryEntitlementStore {
    records: Mutex<HashMap<String, EntitlementRecord>>,
}

impl InMemoryEntitlementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with the implicit initial record (free tier).
    ///
    /// Mirrors the user-creation hook of a real deployment; existing records
    /// are left untouched.
    pub async fn insert_user(&self, user_id: &str) {
        self.records
            .lock()
            .await
            .entry(user_id.to_string())
            .or_insert_with(EntitlementRecord::free);
    }

    /// Overwrite a user's record directly, bypassing CAS. Test setup only.
    pub async fn seed(&self, user_id: &str, record: EntitlementRecord) {
        self.records
            .lock()
            .await
            .insert(user_id.to_string(), record);
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn get(&self, user_id: &str) -> Result<Option<EntitlementRecord>> {
        Ok(self.records.lock().await.get(user_id).cloned())
    }

    async fn compare_and_set(
        &self,
        user_id: &str,
        expected: &EntitlementRecord,
        next: EntitlementRecord,
    ) -> Result<CasOutcome> {
        let mut records = self.records.lock().await;
        match records.get(user_id) {
            Some(current) if current == expected => {
                records.insert(user_id.to_string(), next);
                Ok(CasOutcome::Committed)
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }
}

/// In-memory usage counter store.
#[derive(Default)]
pub struct InMemoryUsageStore {
    counters: Mutex<HashMap<(String, ActionType, DayKey), u64>>,
}

impl InMemoryUsageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live counter keys (for GC/rollover tests).
    pub async fn key_count(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment(&self, user_id: &str, action: ActionType, day: DayKey) -> Result<u64> {
        let mut counters = self.counters.lock().await;
        let count = counters
            .entry((user_id.to_string(), action, day))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn decrement(&self, user_id: &str, action: ActionType, day: DayKey) -> Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(count) = counters.get_mut(&(user_id.to_string(), action, day)) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    async fn current(&self, user_id: &str, action: ActionType, day: DayKey) -> Result<u64> {
        Ok(self
            .counters
            .lock()
            .await
            .get(&(user_id.to_string(), action, day))
            .copied()
            .unwrap_or(0))
    }
}
