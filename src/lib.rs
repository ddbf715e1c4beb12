//! Studygate - entitlement and usage-quota engine for a learning app backend
//!
//! Studygate decides which subscription tier a user currently holds, whether
//! that tier is still in force, how many of a rate-limited action a free
//! user has consumed today, and how tier transitions apply safely under
//! concurrent access. The surrounding application — CRUD screens,
//! notification delivery, payment redirects — stays outside; it talks to
//! this engine through a handful of structured calls.
//!
//! # Features
//!
//! - **Resolver**: pure derivation of the effective plan from a stored record
//! - **Quota**: atomic daily caps that hold under concurrent requests
//! - **Transitions**: trial/subscribe/renew/cancel/expiry via compare-and-swap
//! - **Feature gate**: explicit per-feature tier allow-sets (no tier ranking)
//! - **Stores**: async traits with bundled in-memory backends for tests and
//!   single-instance deployments
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use studygate::{ActionType, EntitlementEngine};
//! use studygate::store::{InMemoryEntitlementStore, InMemoryUsageStore};
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> studygate::Result<()> {
//!     studygate::init_tracing();
//!
//!     let entitlements = Arc::new(InMemoryEntitlementStore::new());
//!     let usage = Arc::new(InMemoryUsageStore::new());
//!     entitlements.insert_user("u-1").await;
//!
//!     let engine = EntitlementEngine::new(entitlements, usage);
//!     let decision = engine
//!         .consume_quota("u-1", ActionType::Practice, Utc::now())
//!         .await?;
//!     println!("allowed: {}, remaining: {:?}", decision.allowed, decision.remaining);
//!     Ok(())
//! }
//! ```

mod engine;
mod error;
pub mod features;
pub mod plan;
pub mod quota;
pub mod resolver;
pub mod store;
pub mod transitions;

// Re-exports for the public API
pub use engine::{EntitlementEngine, PlanStatus};
pub use error::{Result, StudygateError};
pub use features::{Feature, FeatureCatalog, FeatureDecision, FeatureGate};
pub use plan::{ActionType, EntitlementRecord, Tier};
pub use quota::{QuotaDecision, QuotaEnforcer, QuotaPolicy};
pub use resolver::{resolve, EffectivePlan};
pub use store::{CasOutcome, DayKey, EntitlementStore, UsageStore};
pub use transitions::{PlanPolicy, PlanTransitionManager, TrialExpiry};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call early in your application, before constructing the engine.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "studygate=debug")
/// - `STUDYGATE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("STUDYGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
