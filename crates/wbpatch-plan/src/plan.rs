//! Patch plans
//!
//! A [`PatchPlan`] is an immutable, reviewable change set: the document it
//! targets, the fingerprint that document had when the plan was generated,
//! and the ordered operations to apply.
//!
//! # Invariants
//! - `schema_version` is [`PLAN_SCHEMA_VERSION`]
//! - op_ids are non-empty and unique
//! - the target fingerprint is never rewritten after construction

use crate::condition::Condition;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use wbpatch_artifact::Fingerprint;

/// Plan document schema version
pub const PLAN_SCHEMA_VERSION: &str = "1.0";

/// Document a plan applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTarget {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

/// Apply-time options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    #[serde(default = "yes")]
    pub backup: bool,
    #[serde(default = "yes")]
    pub fail_on_external_change: bool,
}

const fn yes() -> bool {
    true
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            backup: true,
            fail_on_external_change: true,
        }
    }
}

/// Operation with its stable id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub op_id: String,
    #[serde(flatten)]
    pub operation: Operation,
}

/// Immutable change set against one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPlan {
    schema_version: String,
    plan_id: String,
    target: PlanTarget,
    #[serde(default)]
    options: PlanOptions,
    #[serde(default)]
    preconditions: Vec<Condition>,
    operations: Vec<PlannedOperation>,
    #[serde(default)]
    postconditions: Vec<Condition>,
}

impl PatchPlan {
    pub(crate) fn from_parts(
        plan_id: String,
        target: PlanTarget,
        options: PlanOptions,
        preconditions: Vec<Condition>,
        operations: Vec<PlannedOperation>,
        postconditions: Vec<Condition>,
    ) -> Result<Self, PlanError> {
        let plan = Self {
            schema_version: PLAN_SCHEMA_VERSION.to_string(),
            plan_id,
            target,
            options,
            preconditions,
            operations,
            postconditions,
        };
        plan.check()?;
        Ok(plan)
    }

    /// Take the plan apart for further building
    pub(crate) fn into_parts(
        self,
    ) -> (String, PlanTarget, PlanOptions, Vec<Condition>, Vec<PlannedOperation>, Vec<Condition>)
    {
        (
            self.plan_id,
            self.target,
            self.options,
            self.preconditions,
            self.operations,
            self.postconditions,
        )
    }

    /// Parse and validate a plan document
    ///
    /// # Errors
    /// Returns error on malformed JSON, missing required fields, an
    /// unsupported schema version, duplicate op_ids or invalid operation fields
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let plan: Self = serde_json::from_str(json)?;
        plan.check()?;
        Ok(plan)
    }

    /// Parse and validate a plan from bytes
    ///
    /// # Errors
    /// Same as [`PatchPlan::from_json`]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PlanError> {
        let plan: Self = serde_json::from_slice(bytes)?;
        plan.check()?;
        Ok(plan)
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json_pretty(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Schema version
    #[inline]
    #[must_use]
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Plan id
    #[inline]
    #[must_use]
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    /// Target document
    #[inline]
    #[must_use]
    pub fn target(&self) -> &PlanTarget {
        &self.target
    }

    /// Target path
    #[inline]
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target.path
    }

    /// Fingerprint captured when the plan was generated
    #[inline]
    #[must_use]
    pub fn target_fingerprint(&self) -> &Fingerprint {
        &self.target.fingerprint
    }

    /// Apply options
    #[inline]
    #[must_use]
    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Preconditions
    #[inline]
    #[must_use]
    pub fn preconditions(&self) -> &[Condition] {
        &self.preconditions
    }

    /// Operations in apply order
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &[PlannedOperation] {
        &self.operations
    }

    /// Postconditions
    #[inline]
    #[must_use]
    pub fn postconditions(&self) -> &[Condition] {
        &self.postconditions
    }

    /// Validate structural invariants
    ///
    /// # Errors
    /// Returns the first violated invariant
    pub fn check(&self) -> Result<(), PlanError> {
        if self.schema_version != PLAN_SCHEMA_VERSION {
            return Err(PlanError::UnsupportedSchemaVersion(self.schema_version.clone()));
        }
        if self.plan_id.trim().is_empty() {
            return Err(PlanError::MissingField("plan_id"));
        }
        if self.target.path.as_os_str().is_empty() {
            return Err(PlanError::MissingField("target.path"));
        }
        let mut seen = HashSet::new();
        for (index, planned) in self.operations.iter().enumerate() {
            if planned.op_id.trim().is_empty() {
                return Err(PlanError::EmptyOpId { index });
            }
            if !seen.insert(planned.op_id.as_str()) {
                return Err(PlanError::DuplicateOpId(planned.op_id.clone()));
            }
            planned
                .operation
                .check_fields()
                .map_err(|reason| PlanError::InvalidOperation {
                    op_id: planned.op_id.clone(),
                    reason,
                })?;
        }
        for (index, c) in self.preconditions.iter().chain(&self.postconditions).enumerate() {
            if c.target.trim().is_empty() {
                return Err(PlanError::InvalidCondition {
                    index,
                    reason: format!("{} has an empty target", c.kind),
                });
            }
        }
        Ok(())
    }
}

/// Generate a plan id: `pln_<YYYYMMDD>_<8 hex>`
#[must_use]
pub fn new_plan_id() -> String {
    let date = chrono::Utc::now().format("%Y%m%d");
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("pln_{date}_{}", &rand[..8])
}

/// Generate an operation id: `op_<6 hex>`
///
/// Random rather than positional so plans built independently against the
/// same document can be composed without renumbering.
#[must_use]
pub fn new_op_id() -> String {
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("op_{}", &rand[..6])
}

/// Errors from loading or constructing plans
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Malformed JSON or missing required field
    #[error("invalid plan document: {0}")]
    Json(#[from] serde_json::Error),

    /// Plan written for another schema
    #[error("unsupported plan schema_version '{0}' (expected {PLAN_SCHEMA_VERSION})")]
    UnsupportedSchemaVersion(String),

    /// Required field empty or absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Operation without an id
    #[error("operation at index {index} has an empty op_id")]
    EmptyOpId { index: usize },

    /// Two operations share an id
    #[error("duplicate op_id: '{0}'")]
    DuplicateOpId(String),

    /// Operation fields violate a constraint
    #[error("invalid operation '{op_id}': {reason}")]
    InvalidOperation { op_id: String, reason: String },

    /// Condition fields violate a constraint
    #[error("invalid condition at index {index}: {reason}")]
    InvalidCondition { index: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_json(ops: serde_json::Value) -> String {
        json!({
            "schema_version": "1.0",
            "plan_id": "pln_test",
            "target": {"path": "book.json", "fingerprint": Fingerprint::compute(b"x").to_string()},
            "operations": ops,
        })
        .to_string()
    }

    #[test]
    fn from_json_applies_defaults() {
        let plan = PatchPlan::from_json(&plan_json(json!([
            {"op_id": "op1", "kind": "add_column", "table": "Sales", "name": "Margin"}
        ])))
        .unwrap();
        assert!(plan.options().backup);
        assert!(plan.options().fail_on_external_change);
        assert!(plan.preconditions().is_empty());
        assert_eq!(plan.operations()[0].op_id, "op1");
    }

    #[test]
    fn from_json_rejects_duplicate_op_ids() {
        let err = PatchPlan::from_json(&plan_json(json!([
            {"op_id": "op1", "kind": "add_column", "table": "Sales", "name": "A"},
            {"op_id": "op1", "kind": "add_column", "table": "Sales", "name": "B"}
        ])))
        .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateOpId(id) if id == "op1"));
    }

    #[test]
    fn from_json_rejects_schema_version() {
        let mut doc: serde_json::Value = serde_json::from_str(&plan_json(json!([]))).unwrap();
        doc["schema_version"] = json!("2.0");
        let err = PatchPlan::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, PlanError::UnsupportedSchemaVersion(_)));
    }

    #[test]
    fn from_json_rejects_missing_fingerprint() {
        let doc = json!({
            "schema_version": "1.0",
            "plan_id": "p",
            "target": {"path": "book.json"},
            "operations": []
        });
        assert!(matches!(
            PatchPlan::from_json(&doc.to_string()),
            Err(PlanError::Json(_))
        ));
    }

    #[test]
    fn from_json_rejects_invalid_operation_fields() {
        let err = PatchPlan::from_json(&plan_json(json!([
            {"op_id": "op1", "kind": "add_column", "table": "", "name": "A"}
        ])))
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidOperation { .. }));
    }

    #[test]
    fn plan_id_format() {
        let id = new_plan_id();
        assert!(id.starts_with("pln_"));
        assert_eq!(id.len(), "pln_".len() + 8 + 1 + 8);
    }

    #[test]
    fn op_id_format() {
        let id = new_op_id();
        assert!(id.starts_with("op_"));
        assert_eq!(id.len(), "op_".len() + 6);
        assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn json_roundtrip_keeps_flattened_kind() {
        let plan = PatchPlan::from_json(&plan_json(json!([
            {"op_id": "op1", "kind": "format_range", "target": "Sales[Margin]", "style": "percent"}
        ])))
        .unwrap();
        let text = plan.to_json_pretty().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["operations"][0]["kind"], "format_range");
        assert_eq!(PatchPlan::from_json(&text).unwrap(), plan);
    }
}
