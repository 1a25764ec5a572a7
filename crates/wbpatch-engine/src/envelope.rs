//! Response envelope
//!
//! Every command answers with the same shape so callers can branch on `ok`
//! and the first error's `code` without knowing which command ran:
//!
//! ```json
//! { "ok": false, "command": "apply", "target": "book.json", "result": null,
//!   "changes": [], "warnings": [],
//!   "errors": [{ "code": "ERR_LOCK_HELD", "message": "...", "details": {} }],
//!   "metrics": { "duration_ms": 3 } }
//! ```

use crate::error::{ApplyError, EngineError, ErrorCode};
use crate::record::{ChangeRecord, Warning};
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::time::Instant;

/// One reported error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub code: ErrorCode,
    pub message: String,
    pub details: Json,
}

impl ErrorEntry {
    /// Error with empty details
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: json!({}),
        }
    }
}

impl From<&EngineError> for ErrorEntry {
    fn from(e: &EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<&ApplyError> for ErrorEntry {
    fn from(e: &ApplyError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

/// Timing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub duration_ms: u64,
}

/// Uniform command response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub ok: bool,
    pub command: String,
    pub target: Option<String>,
    pub result: Json,
    pub changes: Vec<ChangeRecord>,
    pub warnings: Vec<Warning>,
    pub errors: Vec<ErrorEntry>,
    pub metrics: Metrics,
}

impl ResponseEnvelope {
    /// Successful response carrying `result`
    #[must_use]
    pub fn success(command: impl Into<String>, result: Json) -> Self {
        Self {
            ok: true,
            command: command.into(),
            target: None,
            result,
            changes: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            metrics: Metrics::default(),
        }
    }

    /// Successful response from any serializable result
    ///
    /// A result that fails to serialize turns the envelope into an
    /// `ERR_INTERNAL` failure.
    #[must_use]
    pub fn from_result<T: Serialize>(command: impl Into<String>, result: &T) -> Self {
        let command = command.into();
        match serde_json::to_value(result) {
            Ok(value) => Self::success(command, value),
            Err(e) => Self::failure(command, &EngineError::Internal(e.to_string())),
        }
    }

    /// Failed response for an engine error
    #[must_use]
    pub fn failure(command: impl Into<String>, error: &EngineError) -> Self {
        Self::success(command, Json::Null).with_error(ErrorEntry::from(error))
    }

    /// Set the target
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach change records
    #[inline]
    #[must_use]
    pub fn with_changes(mut self, changes: Vec<ChangeRecord>) -> Self {
        self.changes = changes;
        self
    }

    /// Append warnings
    #[inline]
    #[must_use]
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = Warning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Append an error; the envelope is no longer ok
    #[must_use]
    pub fn with_error(mut self, error: ErrorEntry) -> Self {
        self.ok = false;
        self.errors.push(error);
        self
    }

    /// Record elapsed time since `started`
    #[must_use]
    pub fn timed(mut self, started: Instant) -> Self {
        self.metrics.duration_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Exit code: 0 when ok, otherwise the first error's category code
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.errors.first() {
            Some(e) => e.code.kind().exit_code(),
            None if self.ok => 0,
            None => ErrorCode::Internal.kind().exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockError;
    use std::time::Duration;
    use wbpatch_plan::OperationKind;

    #[test]
    fn success_has_every_field() {
        let env = ResponseEnvelope::success("fingerprint", json!({ "fingerprint": "sha256:00" }))
            .with_target("book.json")
            .with_changes(vec![ChangeRecord::new("op1", OperationKind::AddColumn, "T")])
            .with_warnings([Warning::new("WARN_DESTRUCTIVE", "sheet removed")]);
        assert_eq!(env.exit_code(), 0);

        let value = serde_json::to_value(&env).unwrap();
        for key in [
            "ok", "command", "target", "result", "changes", "warnings", "errors", "metrics",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["metrics"]["duration_ms"], 0);
        assert_eq!(value["errors"], json!([]));
    }

    #[test]
    fn failure_carries_code_and_exit() {
        let err = EngineError::Lock(LockError::Held {
            path: "book.json.lock".into(),
            holder_info: "{}".into(),
            waited: Duration::from_millis(20),
        });
        let env = ResponseEnvelope::failure("apply", &err);
        assert!(!env.ok);
        assert_eq!(env.exit_code(), 50);

        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["errors"][0]["code"], "ERR_LOCK_HELD");
        assert_eq!(value["errors"][0]["details"]["waited_ms"], 20);
    }

    #[test]
    fn report_failure_uses_validation_exit() {
        let env = ResponseEnvelope::success("validate", json!({ "valid": false }))
            .with_error(ErrorEntry::new(ErrorCode::ValidationFailed, "2 checks failed"));
        assert!(!env.ok);
        assert_eq!(env.exit_code(), 10);
    }
}
