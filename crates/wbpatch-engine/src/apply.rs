//! Apply executor
//!
//! Commits a plan to disk as one transaction:
//!
//! lock → load → fingerprint check → preconditions → policy → backup →
//! execute → postconditions → persist (atomic) → refingerprint → release
//!
//! Every step before persist works on the in-memory copy only, so any failure
//! up to and including postconditions leaves the document's bytes untouched.
//! The lock guard is released on every exit path.

use crate::checks;
use crate::config::EngineConfig;
use crate::context::{self, DocumentHandle};
use crate::error::{ApplyError, ApplyStage, EngineError};
use crate::fsio;
use crate::lock::LockManager;
use crate::ops;
use crate::policy::Policy;
use crate::record::{ChangeRecord, Summary, Warning};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, info_span, warn};
use wbpatch_artifact::{DocumentAdapter, Fingerprint};
use wbpatch_plan::PatchPlan;

/// Apply-time switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Write `{path}.{timestamp}.bak` before persisting
    pub backup: bool,
    /// How long to wait for a held lock
    pub wait_lock: Duration,
    /// Refuse to apply when the document no longer matches the plan
    pub fail_on_external_change: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            backup: true,
            wait_lock: Duration::ZERO,
            fail_on_external_change: true,
        }
    }
}

impl ApplyOptions {
    /// Options from the plan, with backup and lock wait bounded by `config`
    #[must_use]
    pub fn from_plan(plan: &PatchPlan, config: &EngineConfig) -> Self {
        Self {
            backup: plan.options().backup && config.backup,
            wait_lock: config.wait_lock(),
            fail_on_external_change: plan.options().fail_on_external_change,
        }
    }

    /// Set backup
    #[inline]
    #[must_use]
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Set lock wait
    #[inline]
    #[must_use]
    pub fn with_wait_lock(mut self, wait: Duration) -> Self {
        self.wait_lock = wait;
        self
    }
}

/// Committed transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub plan_id: String,
    pub path: PathBuf,
    pub changes: Vec<ChangeRecord>,
    pub summary: Summary,
    pub fingerprint_before: Fingerprint,
    pub fingerprint_after: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub warnings: Vec<Warning>,
}

/// Apply `plan` to the document at `path`
///
/// # Errors
/// Returns [`ApplyError`] naming the stage that failed. A conflict
/// ([`EngineError::Conflict`]) or held lock is retryable after refreshing the
/// plan or waiting; everything else is not.
pub fn apply(
    plan: &PatchPlan,
    path: &Path,
    options: &ApplyOptions,
    adapter: &dyn DocumentAdapter,
    locks: &LockManager,
    policy: Option<&Policy>,
) -> Result<ApplyOutcome, ApplyError> {
    let span = info_span!("apply", plan_id = plan.plan_id());
    let _entered = span.enter();
    info!(path = %path.display(), operations = plan.operations().len(), "apply started");

    let guard = locks
        .acquire(path, options.wait_lock)
        .map_err(EngineError::from)
        .map_err(ApplyError::at(ApplyStage::Lock))?;

    let original = fsio::read_bytes(path).map_err(ApplyError::at(ApplyStage::Load))?;
    let mut handle = DocumentHandle::from_bytes(adapter, path, &original)
        .map_err(ApplyError::at(ApplyStage::Load))?;
    let fingerprint_before = handle.fingerprint;

    if fingerprint_before != *plan.target_fingerprint() {
        if options.fail_on_external_change {
            warn!(
                expected = %plan.target_fingerprint(),
                actual = %fingerprint_before,
                "document changed since planning"
            );
            return Err(ApplyError::at(ApplyStage::FingerprintCheck)(
                EngineError::Conflict {
                    path: path.to_path_buf(),
                    expected: *plan.target_fingerprint(),
                    actual: fingerprint_before,
                },
            ));
        }
        warn!(actual = %fingerprint_before, "applying over an external change");
    }

    let failures = checks::failures(&handle.workbook, plan.preconditions());
    if !failures.is_empty() {
        return Err(ApplyError::at(ApplyStage::Preconditions)(
            EngineError::PreconditionFailed { failures },
        ));
    }

    let mut warnings = match policy {
        Some(policy) => policy
            .check_plan(plan.operations(), &handle.workbook)
            .map_err(EngineError::from)
            .map_err(ApplyError::at(ApplyStage::Policy))?,
        None => Vec::new(),
    };

    let backup_path = if options.backup {
        let backup =
            fsio::write_backup(path, &original).map_err(ApplyError::at(ApplyStage::Backup))?;
        info!(backup = %backup.display(), "backup written");
        Some(backup)
    } else {
        None
    };

    let mut changes = Vec::with_capacity(plan.operations().len());
    for planned in plan.operations() {
        let record = ops::execute(&mut handle.workbook, planned).map_err(|source| {
            ApplyError::at(ApplyStage::Execute)(EngineError::Operation {
                op_id: planned.op_id.clone(),
                source,
            })
        })?;
        changes.push(record);
    }

    let failures = checks::failures(&handle.workbook, plan.postconditions());
    if !failures.is_empty() {
        return Err(ApplyError::at(ApplyStage::Postconditions)(
            EngineError::PostconditionFailed { failures },
        ));
    }

    let bytes = context::encode(adapter, path, &handle.workbook)
        .map_err(ApplyError::at(ApplyStage::Persist))?;
    fsio::atomic_write(path, &bytes).map_err(ApplyError::at(ApplyStage::Persist))?;

    let (fingerprint_after, readback) = refingerprint(path, &bytes);
    warnings.extend(readback);

    if let Err(e) = guard.release() {
        warn!(error = %e, "lock release failed after commit");
    }

    warnings.extend(changes.iter().flat_map(|r| r.warnings.iter().cloned()));
    let summary = Summary::from_records(&changes);
    info!(
        before = %fingerprint_before.short(),
        after = %fingerprint_after.short(),
        cells = summary.total_cells_affected,
        "apply committed"
    );
    debug!(warnings = warnings.len(), "apply warnings collected");

    Ok(ApplyOutcome {
        plan_id: plan.plan_id().to_string(),
        path: path.to_path_buf(),
        changes,
        summary,
        fingerprint_before,
        fingerprint_after,
        backup_path,
        warnings,
    })
}

/// Fingerprint of the committed document
///
/// The file has already been replaced when this runs, so a failed or
/// mismatched read-back is reported as a warning alongside the fingerprint
/// of the bytes that were written, never as a failed apply.
fn refingerprint(path: &Path, written: &[u8]) -> (Fingerprint, Option<Warning>) {
    let expected = Fingerprint::compute(written);
    let problem = match fsio::read_bytes(path) {
        Ok(found) if Fingerprint::compute(&found) == expected => return (expected, None),
        Ok(found) => format!(
            "read-back fingerprint {} differs from the committed {}",
            Fingerprint::compute(&found),
            expected
        ),
        Err(e) => format!("committed, but reading the document back failed: {e}"),
    };
    warn!(path = %path.display(), problem = %problem, "refingerprint");
    let warning = Warning::new("WARN_REFINGERPRINT", problem).at(path.display().to_string());
    (expected, Some(warning))
}
