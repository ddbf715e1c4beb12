/// The main error type for the studygate engine.
///
/// Business outcomes that callers are expected to handle — a denied quota
/// consumption, a feature the current tier does not unlock — are **not**
/// errors; they come back as ordinary decision values. This enum covers
/// genuine faults and precondition violations only.
#[derive(Debug, thiserror::Error)]
pub enum StudygateError {
    /// No entitlement record exists for the given user.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A plan transition was requested from a state that does not permit it
    /// (e.g. `renew` while on the free tier).
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A compare-and-swap cycle kept losing races and exhausted its retry
    /// budget. Transient: the caller may safely retry the whole operation.
    #[error("Transition conflict: {0}")]
    TransitionConflict(String),

    /// The backing store could not be reached or failed transiently.
    /// Safe to retry with backoff.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StudygateError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn transition_conflict(msg: impl Into<String>) -> Self {
        Self::TransitionConflict(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Whether a client-side retry of the failed operation is safe and
    /// potentially useful.
    ///
    /// All mutating operations in this crate are designed so that a retry
    /// after a timeout cannot corrupt state; this only reports whether a
    /// retry could *succeed*.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransitionConflict(_) | Self::StoreUnavailable(_)
        )
    }

    /// Stable machine-readable reason code for API responses.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::TransitionConflict(_) => "transition_conflict",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Other(_) => "internal",
        }
    }
}

/// Result type alias for studygate operations.
pub type Result<T> = std::result::Result<T, StudygateError>;
