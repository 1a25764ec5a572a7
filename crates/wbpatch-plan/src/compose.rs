//! Plan composition
//!
//! Merges several plans against the same document into one transaction:
//! - operations are concatenated in input order
//! - pre/postconditions are unioned, de-duplicated by `(kind, target)`
//! - op_id collisions are rejected, never renumbered
//!
//! [`compose`] takes the first plan's fingerprint as the merged base and
//! assumes all inputs were generated against the same state.
//! [`compose_strict`] rejects inputs whose fingerprints differ.

use crate::condition::{Condition, ConditionKind};
use crate::plan::{new_plan_id, PatchPlan, PlanError, PlanOptions};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use wbpatch_artifact::Fingerprint;

/// Compose plans, taking the first plan's base fingerprint
///
/// # Errors
/// See [`ComposeError`]
pub fn compose(plans: &[PatchPlan]) -> Result<PatchPlan, ComposeError> {
    compose_with(plans, false)
}

/// Compose plans that must all share one base fingerprint
///
/// # Errors
/// See [`ComposeError`]; additionally fails with
/// [`ComposeError::FingerprintMismatch`]
pub fn compose_strict(plans: &[PatchPlan]) -> Result<PatchPlan, ComposeError> {
    compose_with(plans, true)
}

fn compose_with(plans: &[PatchPlan], strict: bool) -> Result<PatchPlan, ComposeError> {
    let first = plans.first().ok_or(ComposeError::Empty)?;
    let target = first.target().clone();

    for plan in &plans[1..] {
        if plan.target_path() != target.path {
            return Err(ComposeError::TargetMismatch {
                expected: target.path.clone(),
                actual: plan.target_path().to_path_buf(),
                plan_id: plan.plan_id().to_string(),
            });
        }
        if strict && *plan.target_fingerprint() != target.fingerprint {
            return Err(ComposeError::FingerprintMismatch {
                expected: target.fingerprint,
                actual: *plan.target_fingerprint(),
                plan_id: plan.plan_id().to_string(),
            });
        }
    }

    let mut options = PlanOptions {
        backup: false,
        fail_on_external_change: false,
    };
    let mut operations = Vec::new();
    let mut op_ids = HashSet::new();
    let mut preconditions = ConditionSet::default();
    let mut postconditions = ConditionSet::default();

    for plan in plans {
        options.backup |= plan.options().backup;
        options.fail_on_external_change |= plan.options().fail_on_external_change;
        for c in plan.preconditions() {
            preconditions.insert(c)?;
        }
        for c in plan.postconditions() {
            postconditions.insert(c)?;
        }
        for op in plan.operations() {
            if !op_ids.insert(op.op_id.clone()) {
                return Err(ComposeError::DuplicateOpId {
                    op_id: op.op_id.clone(),
                    plan_id: plan.plan_id().to_string(),
                });
            }
            operations.push(op.clone());
        }
    }

    Ok(PatchPlan::from_parts(
        new_plan_id(),
        target,
        options,
        preconditions.into_vec(),
        operations,
        postconditions.into_vec(),
    )?)
}

/// Insertion-ordered condition union keyed by `(kind, target)`
#[derive(Default)]
struct ConditionSet {
    items: Vec<Condition>,
    index: HashMap<(ConditionKind, String), usize>,
}

impl ConditionSet {
    fn insert(&mut self, condition: &Condition) -> Result<(), ComposeError> {
        let key = (condition.kind, condition.target.clone());
        match self.index.get(&key) {
            Some(&i) => {
                let existing = &self.items[i];
                if existing.expected_outcome() != condition.expected_outcome() {
                    return Err(ComposeError::ConflictingCondition {
                        kind: condition.kind,
                        target: condition.target.clone(),
                    });
                }
            }
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(condition.clone());
            }
        }
        Ok(())
    }

    fn into_vec(self) -> Vec<Condition> {
        self.items
    }
}

/// Errors from plan composition
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// No plans given
    #[error("nothing to compose: no plans given")]
    Empty,

    /// Plans target different documents
    #[error("plan '{plan_id}' targets {actual:?}, expected {expected:?}")]
    TargetMismatch {
        expected: PathBuf,
        actual: PathBuf,
        plan_id: String,
    },

    /// Strict composition over different base states
    #[error("plan '{plan_id}' was generated against {actual}, expected {expected}")]
    FingerprintMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
        plan_id: String,
    },

    /// Same (kind, target) with contradicting expectations
    #[error("conflicting expectations for {kind} '{target}'")]
    ConflictingCondition { kind: ConditionKind, target: String },

    /// op_id reused across plans
    #[error("op_id '{op_id}' from plan '{plan_id}' collides with an earlier plan")]
    DuplicateOpId { op_id: String, plan_id: String },

    /// Merged plan violates a plan invariant
    #[error(transparent)]
    Plan(#[from] PlanError),
}
