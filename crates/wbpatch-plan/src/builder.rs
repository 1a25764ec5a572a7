//! Fluent plan construction

use crate::condition::Condition;
use crate::operation::Operation;
use crate::plan::{new_op_id, new_plan_id, PatchPlan, PlanError, PlanOptions, PlanTarget, PlannedOperation};
use std::path::PathBuf;
use wbpatch_artifact::Fingerprint;

/// Builder for [`PatchPlan`]
///
/// Operations added with [`PlanBuilder::operation`] get random `op_<hex>`
/// ids, unique within the plan; [`PlanBuilder::operation_with_id`] sets one
/// explicitly.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    plan_id: Option<String>,
    path: Option<PathBuf>,
    fingerprint: Option<Fingerprint>,
    options: PlanOptions,
    preconditions: Vec<Condition>,
    operations: Vec<PlannedOperation>,
    postconditions: Vec<Condition>,
}

impl PlanBuilder {
    /// Create new builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder targeting `path` at `fingerprint`
    #[inline]
    #[must_use]
    pub fn for_target(path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self::new().path(path).fingerprint(fingerprint)
    }

    /// Builder continuing an existing plan
    ///
    /// Keeps its id, target, options, conditions and operations; new
    /// operations get ids distinct from the ones already present.
    #[must_use]
    pub fn from_plan(plan: PatchPlan) -> Self {
        let (plan_id, target, options, preconditions, operations, postconditions) =
            plan.into_parts();
        Self {
            plan_id: Some(plan_id),
            path: Some(target.path),
            fingerprint: Some(target.fingerprint),
            options,
            preconditions,
            operations,
            postconditions,
        }
    }

    /// Set plan id (generated when absent)
    #[inline]
    #[must_use]
    pub fn plan_id(mut self, id: impl Into<String>) -> Self {
        self.plan_id = Some(id.into());
        self
    }

    /// Set target path
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set base fingerprint
    #[inline]
    #[must_use]
    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Toggle backup before apply
    #[inline]
    #[must_use]
    pub fn backup(mut self, backup: bool) -> Self {
        self.options.backup = backup;
        self
    }

    /// Toggle refusing to apply over external changes
    #[inline]
    #[must_use]
    pub fn fail_on_external_change(mut self, fail: bool) -> Self {
        self.options.fail_on_external_change = fail;
        self
    }

    /// Add a precondition
    #[inline]
    #[must_use]
    pub fn precondition(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    /// Add a precondition unless an equal one is already present
    #[must_use]
    pub(crate) fn precondition_once(self, condition: Condition) -> Self {
        if self.preconditions.contains(&condition) {
            self
        } else {
            self.precondition(condition)
        }
    }

    /// Add an operation with a generated id
    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        let mut op_id = new_op_id();
        while self.operations.iter().any(|o| o.op_id == op_id) {
            op_id = new_op_id();
        }
        self.operations.push(PlannedOperation { op_id, operation });
        self
    }

    /// Add an operation with an explicit id
    #[inline]
    #[must_use]
    pub fn operation_with_id(mut self, op_id: impl Into<String>, operation: Operation) -> Self {
        self.operations.push(PlannedOperation {
            op_id: op_id.into(),
            operation,
        });
        self
    }

    /// Add a postcondition
    #[inline]
    #[must_use]
    pub fn postcondition(mut self, condition: Condition) -> Self {
        self.postconditions.push(condition);
        self
    }

    /// Add a postcondition unless an equal one is already present
    #[must_use]
    pub(crate) fn postcondition_once(self, condition: Condition) -> Self {
        if self.postconditions.contains(&condition) {
            self
        } else {
            self.postcondition(condition)
        }
    }

    /// Build plan
    ///
    /// # Errors
    /// Returns error if path or fingerprint is missing, or the assembled plan
    /// violates a plan invariant
    pub fn build(self) -> Result<PatchPlan, PlanError> {
        let path = self.path.ok_or(PlanError::MissingField("target.path"))?;
        let fingerprint = self
            .fingerprint
            .ok_or(PlanError::MissingField("target.fingerprint"))?;
        PatchPlan::from_parts(
            self.plan_id.unwrap_or_else(new_plan_id),
            PlanTarget { path, fingerprint },
            self.options,
            self.preconditions,
            self.operations,
            self.postconditions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionKind;

    fn add_column(name: &str) -> Operation {
        Operation::AddColumn {
            table: "Sales".into(),
            name: name.into(),
            formula: None,
            default_value: None,
        }
    }

    #[test]
    fn builder_assigns_distinct_generated_ids() {
        let plan = PlanBuilder::for_target("book.json", Fingerprint::compute(b"base"))
            .operation(add_column("A"))
            .operation(add_column("B"))
            .build()
            .unwrap();
        let ids: Vec<&str> = plan.operations().iter().map(|o| o.op_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(ids.iter().all(|id| id.starts_with("op_")));
        assert!(plan.plan_id().starts_with("pln_"));
    }

    #[test]
    fn builder_requires_fingerprint() {
        let err = PlanBuilder::new().path("book.json").build().unwrap_err();
        assert!(matches!(err, PlanError::MissingField("target.fingerprint")));
    }

    #[test]
    fn builder_detects_duplicate_explicit_ids() {
        let err = PlanBuilder::for_target("book.json", Fingerprint::compute(b"base"))
            .operation_with_id("op1", add_column("A"))
            .operation_with_id("op1", add_column("B"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateOpId(_)));
    }

    #[test]
    fn builder_keeps_conditions_and_options() {
        let plan = PlanBuilder::for_target("book.json", Fingerprint::compute(b"base"))
            .plan_id("pln_fixed")
            .backup(false)
            .precondition(Condition::new(ConditionKind::ColumnAbsent, "Sales[Margin]"))
            .operation(add_column("Margin"))
            .postcondition(Condition::new(ConditionKind::ColumnExists, "Sales[Margin]"))
            .build()
            .unwrap();
        assert_eq!(plan.plan_id(), "pln_fixed");
        assert!(!plan.options().backup);
        assert_eq!(plan.preconditions().len(), 1);
        assert_eq!(plan.postconditions().len(), 1);
    }

    #[test]
    fn from_plan_keeps_identity_and_extends() {
        let plan = PlanBuilder::for_target("book.json", Fingerprint::compute(b"base"))
            .plan_id("pln_keep")
            .backup(false)
            .operation_with_id("op_first", add_column("A"))
            .build()
            .unwrap();
        let extended = PlanBuilder::from_plan(plan)
            .operation(add_column("B"))
            .build()
            .unwrap();
        assert_eq!(extended.plan_id(), "pln_keep");
        assert!(!extended.options().backup);
        assert_eq!(extended.operations().len(), 2);
        assert_eq!(extended.operations()[0].op_id, "op_first");
        assert_ne!(extended.operations()[1].op_id, "op_first");
    }
}
