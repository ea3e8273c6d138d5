use serde::{Deserialize, Serialize};

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Graph authoring problems, recoverable by re-publishing.
    ValidationError,
    /// A Condition/Switch fell through with no default edge.
    NoMatchingBranch,
    /// Cycle guard or run-wide step budget tripped.
    CycleOrBudgetExceeded,
    /// Side effect failed after retries or was rejected.
    EffectError,
    /// Optimistic concurrency collision on save.
    ConflictError,
    /// External event never arrived before the suspension ceiling.
    SuspendTimeout,
    NotFound,
    TimeoutError,
    SerializationError,
    IoError,
    InternalError,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error severity enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
    Debug,
}
