//! Error taxonomy for the engine
//!
//! Every failure maps onto a stable [`ErrorCode`], which in turn belongs to
//! one [`ErrorKind`]. The kind decides the process exit code and whether an
//! automated caller may retry.

use crate::config::ConfigError;
use crate::lock::LockError;
use crate::ops::OperationError;
use crate::policy::PolicyViolation;
use crate::workflow::WorkflowError;
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use wbpatch_artifact::{AdapterError, Fingerprint};
use wbpatch_plan::{ComposeError, PlanError};

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Protection,
    Conflict,
    LockHeld,
    Io,
    Unsupported,
    Internal,
}

impl ErrorKind {
    /// Process exit code for this category
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation => 10,
            Self::Protection => 20,
            Self::Conflict => 40,
            Self::LockHeld | Self::Io => 50,
            Self::Unsupported => 70,
            Self::Internal => 90,
        }
    }

    /// Whether retrying the same request may succeed
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::LockHeld)
    }
}

/// Stable machine-readable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationFailed,
    PlanInvalid,
    SchemaMismatch,
    RangeInvalid,
    FormulaOverwriteBlocked,
    TableNotFound,
    SheetNotFound,
    UnknownAssertion,
    InvalidRequest,
    Protected,
    FingerprintConflict,
    LockHeld,
    Io,
    WorkbookNotFound,
    WorkbookCorrupt,
    Unsupported,
    Internal,
}

impl ErrorCode {
    /// `ERR_*` string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "ERR_VALIDATION_FAILED",
            Self::PlanInvalid => "ERR_PLAN_INVALID",
            Self::SchemaMismatch => "ERR_SCHEMA_MISMATCH",
            Self::RangeInvalid => "ERR_RANGE_INVALID",
            Self::FormulaOverwriteBlocked => "ERR_FORMULA_OVERWRITE_BLOCKED",
            Self::TableNotFound => "ERR_TABLE_NOT_FOUND",
            Self::SheetNotFound => "ERR_SHEET_NOT_FOUND",
            Self::UnknownAssertion => "ERR_UNKNOWN_ASSERTION",
            Self::InvalidRequest => "ERR_INVALID_REQUEST",
            Self::Protected => "ERR_PROTECTED",
            Self::FingerprintConflict => "ERR_PLAN_FINGERPRINT_CONFLICT",
            Self::LockHeld => "ERR_LOCK_HELD",
            Self::Io => "ERR_IO",
            Self::WorkbookNotFound => "ERR_WORKBOOK_NOT_FOUND",
            Self::WorkbookCorrupt => "ERR_WORKBOOK_CORRUPT",
            Self::Unsupported => "ERR_UNSUPPORTED",
            Self::Internal => "ERR_INTERNAL",
        }
    }

    /// Category of this code
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed
            | Self::PlanInvalid
            | Self::SchemaMismatch
            | Self::RangeInvalid
            | Self::FormulaOverwriteBlocked
            | Self::TableNotFound
            | Self::SheetNotFound
            | Self::UnknownAssertion
            | Self::InvalidRequest => ErrorKind::Validation,
            Self::Protected => ErrorKind::Protection,
            Self::FingerprintConflict => ErrorKind::Conflict,
            Self::LockHeld => ErrorKind::LockHeld,
            Self::Io | Self::WorkbookNotFound | Self::WorkbookCorrupt => ErrorKind::Io,
            Self::Unsupported => ErrorKind::Unsupported,
            Self::Internal => ErrorKind::Internal,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Plan failed to load or violates a plan invariant
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    /// Plans could not be composed
    #[error("composition failed: {0}")]
    Compose(#[from] ComposeError),

    /// One or more preconditions did not hold
    #[error("precondition failed: {}", failures.join("; "))]
    PreconditionFailed { failures: Vec<String> },

    /// One or more postconditions did not hold after executing
    #[error("postcondition failed: {}", failures.join("; "))]
    PostconditionFailed { failures: Vec<String> },

    /// An operation could not be executed
    #[error("operation '{op_id}' failed: {source}")]
    Operation {
        op_id: String,
        #[source]
        source: OperationError,
    },

    /// Document changed since the plan was generated
    #[error("fingerprint conflict on {path:?}: plan expects {expected}, document is {actual}")]
    Conflict {
        path: PathBuf,
        expected: Fingerprint,
        actual: Fingerprint,
    },

    /// Lock acquisition failed
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Filesystem failure
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document does not exist
    #[error("workbook not found: {0:?}")]
    NotFound(PathBuf),

    /// Document bytes could not be decoded or encoded
    #[error("cannot read workbook {path:?}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: AdapterError,
    },

    /// Policy refused a mutation
    #[error(transparent)]
    Protection(#[from] PolicyViolation),

    /// Bad request that is not about a plan (locators, filters, assertions)
    #[error("{message}")]
    Invalid { code: ErrorCode, message: String },

    /// Configuration or policy file is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Workflow document is unusable
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Feature not supported
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invariant broken inside the engine
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Invalid-request error with an explicit code
    #[must_use]
    pub fn invalid(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Invalid {
            code,
            message: message.into(),
        }
    }

    /// Io error with path context
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Plan(_) | Self::Compose(_) | Self::Workflow(_) => ErrorCode::PlanInvalid,
            Self::PreconditionFailed { .. }
            | Self::PostconditionFailed { .. }
            | Self::Config(_) => ErrorCode::ValidationFailed,
            Self::Operation { source, .. } => source.code(),
            Self::Conflict { .. } => ErrorCode::FingerprintConflict,
            Self::Lock(LockError::Held { .. }) => ErrorCode::LockHeld,
            Self::Lock(LockError::Io { .. }) | Self::Io { .. } => ErrorCode::Io,
            Self::NotFound(_) => ErrorCode::WorkbookNotFound,
            Self::Document { .. } => ErrorCode::WorkbookCorrupt,
            Self::Protection(_) => ErrorCode::Protected,
            Self::Invalid { code, .. } => *code,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Category
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Process exit code
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Structured context for the response envelope
    #[must_use]
    pub fn details(&self) -> Json {
        match self {
            Self::PreconditionFailed { failures } | Self::PostconditionFailed { failures } => {
                json!({ "failures": failures })
            }
            Self::Operation { op_id, source } => {
                let mut details = source.details();
                if let Json::Object(map) = &mut details {
                    map.insert("op_id".into(), Json::String(op_id.clone()));
                }
                details
            }
            Self::Conflict {
                path,
                expected,
                actual,
            } => json!({
                "path": path,
                "expected": expected.to_string(),
                "actual": actual.to_string(),
            }),
            Self::Lock(LockError::Held {
                path,
                holder_info,
                waited,
            }) => json!({
                "path": path,
                "holder_info": holder_info,
                "waited_ms": u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            }),
            Self::Lock(LockError::Io { path, .. })
            | Self::Io { path, .. }
            | Self::NotFound(path)
            | Self::Document { path, .. } => json!({ "path": path }),
            Self::Protection(v) => json!({ "rule": v.rule, "target": v.target }),
            _ => json!({}),
        }
    }
}

/// Stage of the apply protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStage {
    Lock,
    Load,
    FingerprintCheck,
    Preconditions,
    Policy,
    Backup,
    Execute,
    Postconditions,
    /// Encode and atomic replace; after this the commit has happened
    Persist,
}

impl ApplyStage {
    /// Stable snake_case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Load => "load",
            Self::FingerprintCheck => "fingerprint_check",
            Self::Preconditions => "preconditions",
            Self::Policy => "policy",
            Self::Backup => "backup",
            Self::Execute => "execute",
            Self::Postconditions => "postconditions",
            Self::Persist => "persist",
        }
    }
}

impl Display for ApplyStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply failure tagged with the stage it happened in
#[derive(Debug, thiserror::Error)]
#[error("apply failed at {stage}: {source}")]
pub struct ApplyError {
    pub stage: ApplyStage,
    #[source]
    pub source: EngineError,
}

impl ApplyError {
    pub(crate) fn at(stage: ApplyStage) -> impl FnOnce(EngineError) -> Self {
        move |source| Self { stage, source }
    }

    /// Stable code of the underlying error
    #[inline]
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.source.code()
    }

    /// Category of the underlying error
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Process exit code
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }

    /// Underlying details plus the stage
    #[must_use]
    pub fn details(&self) -> Json {
        let mut details = self.source.details();
        if let Json::Object(map) = &mut details {
            map.insert("stage".into(), Json::String(self.stage.as_str().into()));
        }
        details
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn exit_codes_follow_kind() {
        assert_eq!(ErrorCode::RangeInvalid.kind().exit_code(), 10);
        assert_eq!(ErrorCode::Protected.kind().exit_code(), 20);
        assert_eq!(ErrorCode::FingerprintConflict.kind().exit_code(), 40);
        assert_eq!(ErrorCode::LockHeld.kind().exit_code(), 50);
        assert_eq!(ErrorCode::WorkbookCorrupt.kind().exit_code(), 50);
        assert_eq!(ErrorCode::Unsupported.kind().exit_code(), 70);
        assert_eq!(ErrorCode::Internal.kind().exit_code(), 90);
    }

    #[test]
    fn only_conflict_and_lock_are_retryable() {
        let conflict = EngineError::Conflict {
            path: "book.json".into(),
            expected: Fingerprint::compute(b"a"),
            actual: Fingerprint::compute(b"b"),
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.code().as_str(), "ERR_PLAN_FINGERPRINT_CONFLICT");

        let held = EngineError::Lock(LockError::Held {
            path: "book.json.lock".into(),
            holder_info: "{}".into(),
            waited: Duration::ZERO,
        });
        assert!(held.is_retryable());
        assert_eq!(held.exit_code(), 50);

        let io = EngineError::io("x", std::io::Error::other("boom"));
        assert!(!io.is_retryable());
        assert_eq!(io.exit_code(), 50);
    }

    #[test]
    fn apply_error_details_carry_stage() {
        let err = ApplyError::at(ApplyStage::FingerprintCheck)(EngineError::Conflict {
            path: "book.json".into(),
            expected: Fingerprint::compute(b"a"),
            actual: Fingerprint::compute(b"b"),
        });
        let details = err.details();
        assert_eq!(details["stage"], "fingerprint_check");
        assert!(details["expected"].as_str().unwrap().starts_with("sha256:"));
        assert!(err.to_string().contains("fingerprint_check"));
    }

    #[test]
    fn code_serializes_as_string() {
        assert_eq!(
            serde_json::to_value(ErrorCode::SheetNotFound).unwrap(),
            serde_json::json!("ERR_SHEET_NOT_FOUND")
        );
    }
}
