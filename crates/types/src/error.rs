//! The WFL error taxonomy (spec §7): seven kinds, each naming the phase of
//! the pipeline it can originate from. `WflError` is the single error type
//! threaded through the engine, worker, and CLI crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationKind {
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("dependency graph contains a cycle: {0}")]
    CyclicGraph(String),
    #[error("type mismatch for {field}: expected {expected}, found {found}")]
    TypeMismatch { field: String, expected: String, found: String },
    #[error("draft-3-only construct is not supported: {0}")]
    LegacyConstruct(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ExpressionKind {
    #[error("unbalanced {0} in expression")]
    Unbalanced(&'static str),
    #[error("reference to undefined identifier: {0}")]
    Undefined(String),
    #[error("`.length` is not defined on this value type")]
    LengthNotDefined,
    #[error("script evaluation failed: {0}")]
    EvaluationFailed(String),
}

#[derive(Debug, Error)]
pub enum StageKind {
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("stage-in failed for {location}: {reason}")]
    StageInFailed { location: String, reason: String },
    #[error("stage-out failed for {path}: {reason}")]
    StageOutFailed { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ExecutionKind {
    #[error("runtime adapter failed to start: {0}")]
    SpawnFailed(String),
    #[error("task was cancelled")]
    Cancelled,
    #[error("task exited with permanent failure code {0}")]
    PermanentFailure(i32),
    #[error("task timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum CollectKind {
    #[error("glob pattern matched no files: {0}")]
    GlobEmpty(String),
    #[error("failed to compute checksum for {path}: {reason}")]
    ChecksumFailed { path: String, reason: String },
    #[error("malformed cwl.output.json: {0}")]
    MalformedOverride(String),
    #[error("outputEval did not return a value for {0}")]
    OutputEvalFailed(String),
}

#[derive(Debug, Error)]
pub enum ProtocolKind {
    #[error("worker request failed: {0}")]
    RequestFailed(String),
    #[error("unauthorized: missing or invalid worker key")]
    Unauthorized,
    #[error("server returned malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("no task available")]
    NoWorkAvailable,
}

#[derive(Debug, Error)]
pub enum InternalKind {
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    #[error("poisoned lock: {0}")]
    PoisonedLock(String),
}

/// The top-level error type threaded through the runner. Each variant wraps
/// one member of the taxonomy described in spec §7; propagation policy
/// (fatal vs. retryable) is decided by callers inspecting the variant, not
/// baked into this type.
#[derive(Debug, Error)]
pub enum WflError {
    #[error(transparent)]
    Validation(#[from] ValidationKind),
    #[error(transparent)]
    Expression(#[from] ExpressionKind),
    #[error(transparent)]
    Stage(#[from] StageKind),
    #[error(transparent)]
    Execution(#[from] ExecutionKind),
    #[error(transparent)]
    Collect(#[from] CollectKind),
    #[error(transparent)]
    Protocol(#[from] ProtocolKind),
    #[error(transparent)]
    Internal(#[from] InternalKind),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WflError {
    /// Expression errors are always fatal and never retried (spec §7).
    pub fn is_retryable(&self) -> bool {
        match self {
            WflError::Protocol(_) => true,
            WflError::Execution(ExecutionKind::TimedOut(_)) => true,
            _ => false,
        }
    }
}

pub type WflResult<T> = Result<T, WflError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_errors_are_never_retryable() {
        let err = WflError::from(ExpressionKind::LengthNotDefined);
        assert!(!err.is_retryable());
    }

    #[test]
    fn protocol_errors_are_retryable() {
        let err = WflError::from(ProtocolKind::NoWorkAvailable);
        assert!(err.is_retryable());
    }
}
