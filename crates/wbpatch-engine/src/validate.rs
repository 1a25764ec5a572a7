//! Plan validation
//!
//! Validation never mutates the live document. Operations are projected in
//! order onto a scratch copy so later operations see the structure earlier
//! ones create. Every failure is recorded; nothing short-circuits except
//! postconditions, which are only meaningful once every operation is
//! feasible.

use crate::checks;
use crate::context::DocumentHandle;
use crate::error::ErrorCode;
use crate::ops;
use crate::policy::Policy;
use serde::Serialize;
use tracing::debug;
use wbpatch_artifact::{Fingerprint, Workbook};
use wbpatch_plan::{Condition, PatchPlan};

/// Which part of the plan a check covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    /// Advisory: a mismatch is reported but does not fail validation
    Fingerprint,
    Precondition,
    Operation,
    Policy,
    Postcondition,
}

/// One check in a [`ValidationReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub phase: CheckPhase,
    /// Condition kind or op_id
    pub subject: String,
    pub target: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl Check {
    fn pass(
        phase: CheckPhase,
        subject: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            subject: subject.into(),
            target: target.into(),
            passed: true,
            message: message.into(),
            code: None,
        }
    }

    fn fail(
        phase: CheckPhase,
        subject: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
        code: ErrorCode,
    ) -> Self {
        Self {
            passed: false,
            code: Some(code),
            ..Self::pass(phase, subject, target, message)
        }
    }
}

/// Outcome of validating a plan against a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub plan_id: String,
    /// True when every non-advisory check passed
    pub valid: bool,
    pub fingerprint_expected: Fingerprint,
    pub fingerprint_actual: Fingerprint,
    pub fingerprint_match: bool,
    pub checks: Vec<Check>,
    pub passed: usize,
    pub failed: usize,
}

impl ValidationReport {
    /// Failed non-advisory checks
    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.phase != CheckPhase::Fingerprint)
    }
}

/// Validate `plan` against `handle`
#[must_use]
pub fn validate(
    plan: &PatchPlan,
    handle: &DocumentHandle,
    policy: Option<&Policy>,
) -> ValidationReport {
    let mut checks = Vec::new();

    let expected = plan.target_fingerprint();
    let fingerprint_match = *expected == handle.fingerprint;
    checks.push(if fingerprint_match {
        Check::pass(
            CheckPhase::Fingerprint,
            "fingerprint",
            expected.to_string(),
            "document unchanged since planning",
        )
    } else {
        Check::fail(
            CheckPhase::Fingerprint,
            "fingerprint",
            expected.to_string(),
            format!("document changed since planning (now {})", handle.fingerprint),
            ErrorCode::FingerprintConflict,
        )
    });

    condition_checks(
        &mut checks,
        CheckPhase::Precondition,
        plan.preconditions(),
        &handle.workbook,
    );

    let mut scratch = handle.workbook.clone();
    let mut feasible = true;
    for planned in plan.operations() {
        let target = planned.operation.target();
        if let Some(policy) = policy {
            if let Err(v) = policy.check(planned, &scratch) {
                checks.push(Check::fail(
                    CheckPhase::Policy,
                    &planned.op_id,
                    &target,
                    v.message,
                    ErrorCode::Protected,
                ));
            }
        }
        match ops::execute(&mut scratch, planned) {
            Ok(record) => checks.push(Check::pass(
                CheckPhase::Operation,
                &planned.op_id,
                target,
                format!("{} feasible ({} cells)", record.kind, record.impact.cells),
            )),
            Err(e) => {
                debug!(op_id = %planned.op_id, error = %e, "operation infeasible");
                feasible = false;
                checks.push(Check::fail(
                    CheckPhase::Operation,
                    &planned.op_id,
                    target,
                    e.to_string(),
                    e.code(),
                ));
            }
        }
    }

    if let Some(policy) = policy {
        if let Err(v) = policy.check_plan_totals(plan.operations(), &handle.workbook) {
            checks.push(Check::fail(
                CheckPhase::Policy,
                v.rule,
                v.target,
                v.message,
                ErrorCode::Protected,
            ));
        }
    }

    if feasible {
        condition_checks(
            &mut checks,
            CheckPhase::Postcondition,
            plan.postconditions(),
            &scratch,
        );
    }

    let passed = checks.iter().filter(|c| c.passed).count();
    let failed = checks.len() - passed;
    let valid = !checks
        .iter()
        .any(|c| !c.passed && c.phase != CheckPhase::Fingerprint);
    ValidationReport {
        plan_id: plan.plan_id().to_string(),
        valid,
        fingerprint_expected: *expected,
        fingerprint_actual: handle.fingerprint,
        fingerprint_match,
        checks,
        passed,
        failed,
    }
}

fn condition_checks(
    checks: &mut Vec<Check>,
    phase: CheckPhase,
    conditions: &[Condition],
    workbook: &Workbook,
) {
    for condition in conditions {
        let result = checks::evaluate(workbook, condition);
        let check = if result.passed {
            Check::pass(phase, result.kind.to_string(), result.target, result.message)
        } else {
            Check::fail(
                phase,
                result.kind.to_string(),
                result.target,
                result.message,
                ErrorCode::ValidationFailed,
            )
        };
        checks.push(check);
    }
}
