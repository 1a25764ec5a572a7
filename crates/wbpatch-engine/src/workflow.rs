//! Workflow executor
//!
//! A workflow is a named list of steps run strictly in order against one
//! document:
//!
//! ```yaml
//! schema_version: "1.0"
//! name: add-margin
//! defaults:
//!   continue_on_error: false
//! steps:
//!   - id: before
//!     run: table_list
//!   - id: margin
//!     run: mutate
//!     operation: { kind: add_column, table: Sales, name: Margin, formula: "=B2-C2" }
//!   - id: check
//!     run: verify
//!     assertions:
//!       - { kind: column_exists, table: Sales, column: Margin }
//! ```
//!
//! Mutations and `apply` steps act on one shared in-memory state. The
//! document is written once, atomically, after the last step.

use crate::checks;
use crate::config::{read_text, ConfigError, EngineConfig};
use crate::context::{self, DocumentHandle};
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::fsio;
use crate::inspect;
use crate::lock::LockManager;
use crate::ops;
use crate::policy::Policy;
use crate::record::ChangeRecord;
use crate::validate;
use crate::verify;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wbpatch_artifact::{DocumentAdapter, Fingerprint, Locator, Workbook};
use wbpatch_plan::{Operation, PatchPlan, PlannedOperation};

/// Supported workflow document version
pub const WORKFLOW_SCHEMA_VERSION: &str = "1.0";

fn default_version() -> String {
    WORKFLOW_SCHEMA_VERSION.to_string()
}

/// Run-wide switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowDefaults {
    /// Keep going after a failed step
    pub continue_on_error: bool,
    /// Run every step but never persist
    pub dry_run: bool,
    /// Overrides the configured backup setting
    pub backup: Option<bool>,
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "run", rename_all = "snake_case")]
pub enum StepAction {
    /// Structural summary of the document
    Inspect,
    /// Read one locator
    CellGet {
        #[serde(rename = "ref")]
        reference: String,
    },
    /// Tables, optionally on one sheet
    TableList {
        #[serde(default)]
        sheet: Option<String>,
    },
    /// Numeric statistics over a range
    RangeStat {
        #[serde(rename = "ref")]
        reference: String,
    },
    /// Execute one operation
    Mutate { operation: Operation },
    /// Validate a plan against the current state
    Validate { plan: PathBuf },
    /// Apply a plan to the current state
    Apply { plan: PathBuf },
    /// Evaluate assertions against the current state
    Verify { assertions: Vec<Json> },
}

impl StepAction {
    /// Stable step name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::CellGet { .. } => "cell_get",
            Self::TableList { .. } => "table_list",
            Self::RangeStat { .. } => "range_stat",
            Self::Mutate { .. } => "mutate",
            Self::Validate { .. } => "validate",
            Self::Apply { .. } => "apply",
            Self::Verify { .. } => "verify",
        }
    }

    /// Whether the step can change the document
    #[inline]
    #[must_use]
    pub const fn mutates(&self) -> bool {
        matches!(self, Self::Mutate { .. } | Self::Apply { .. })
    }
}

/// One step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(flatten)]
    pub action: StepAction,
}

/// Parsed workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default = "default_version")]
    pub schema_version: String,
    #[serde(default)]
    pub name: String,
    /// Document to run against when the caller names none
    #[serde(default)]
    pub target: Option<PathBuf>,
    #[serde(default)]
    pub defaults: WorkflowDefaults,
    pub steps: Vec<WorkflowStep>,
    /// Directory plan paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl WorkflowSpec {
    /// Parse YAML or JSON and check structure
    ///
    /// # Errors
    /// Returns error on malformed input, an unsupported version, no steps or
    /// duplicate step ids
    pub fn from_yaml_str(text: &str) -> Result<Self, WorkflowError> {
        let spec: Self = serde_yaml::from_str(text)?;
        spec.check()?;
        Ok(spec)
    }

    /// Load a workflow file; plan paths resolve against its directory
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let text = read_text(path).map_err(WorkflowError::Config)?;
        let mut spec = Self::from_yaml_str(&text)?;
        spec.base_dir = path.parent().map(Path::to_path_buf);
        Ok(spec)
    }

    fn check(&self) -> Result<(), WorkflowError> {
        if self.schema_version != WORKFLOW_SCHEMA_VERSION {
            return Err(WorkflowError::UnsupportedVersion(self.schema_version.clone()));
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps);
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(WorkflowError::EmptyStepId);
            }
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::DuplicateStepId(step.id.clone()));
            }
        }
        Ok(())
    }

    /// Whether any step can change the document
    #[must_use]
    pub fn mutates(&self) -> bool {
        self.steps.iter().any(|s| s.action.mutates())
    }

    /// The explicit target, else the workflow's own, resolved against its
    /// directory
    ///
    /// # Errors
    /// [`WorkflowError::NoTarget`] when neither is set
    pub fn resolve_target(&self, explicit: Option<&Path>) -> Result<PathBuf, WorkflowError> {
        match (explicit, &self.target) {
            (Some(path), _) => Ok(path.to_path_buf()),
            (None, Some(path)) => Ok(self.resolve(path)),
            (None, None) => Err(WorkflowError::NoTarget(self.name.clone())),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Error carried by a failed step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Json,
}

impl From<&EngineError> for StepError {
    fn from(e: &EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub run: &'static str,
    pub ok: bool,
    pub result: Json,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<ChangeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub name: String,
    pub ok: bool,
    pub steps_total: usize,
    pub steps_passed: usize,
    pub results: Vec<StepResult>,
    pub fingerprint_before: Fingerprint,
    pub fingerprint_after: Fingerprint,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

/// What a step produced besides its result payload
struct StepOutput {
    ok: bool,
    result: Json,
    changes: Vec<ChangeRecord>,
}

impl StepOutput {
    fn read(result: Json) -> Self {
        Self {
            ok: true,
            result,
            changes: Vec::new(),
        }
    }
}

/// Shared state of one run
struct RunState<'a> {
    spec: &'a WorkflowSpec,
    path: &'a Path,
    adapter: &'a dyn DocumentAdapter,
    policy: Option<&'a Policy>,
    workbook: Workbook,
    /// Fingerprint of the bytes on disk
    loaded: Fingerprint,
    changed: bool,
}

/// Run `spec` against the document at `target`
///
/// # Errors
/// Returns error only for failures outside any step: the lock, loading the
/// document or persisting it. Step failures are recorded in the report.
pub fn run(
    spec: &WorkflowSpec,
    target: &Path,
    adapter: &dyn DocumentAdapter,
    locks: &LockManager,
    config: &EngineConfig,
    policy: Option<&Policy>,
) -> EngineResult<WorkflowReport> {
    info!(
        workflow = %spec.name,
        path = %target.display(),
        steps = spec.steps.len(),
        "workflow started"
    );
    let guard = if spec.mutates() {
        Some(locks.acquire(target, config.wait_lock())?)
    } else {
        None
    };

    let original = fsio::read_bytes(target)?;
    let handle = DocumentHandle::from_bytes(adapter, target, &original)?;
    let fingerprint_before = handle.fingerprint;
    let mut state = RunState {
        spec,
        path: target,
        adapter,
        policy,
        workbook: handle.workbook,
        loaded: fingerprint_before,
        changed: false,
    };

    let mut results = Vec::with_capacity(spec.steps.len());
    let mut any_failed = false;
    for step in &spec.steps {
        debug!(step = %step.id, run = step.action.name(), "workflow step");
        let result = match state.step(&step.id, &step.action) {
            Ok(output) => StepResult {
                step_id: step.id.clone(),
                run: step.action.name(),
                ok: output.ok,
                result: output.result,
                changes: output.changes,
                error: None,
            },
            Err(e) => {
                warn!(step = %step.id, error = %e, "workflow step failed");
                StepResult {
                    step_id: step.id.clone(),
                    run: step.action.name(),
                    ok: false,
                    result: Json::Null,
                    changes: Vec::new(),
                    error: Some(StepError::from(&e)),
                }
            }
        };
        let ok = result.ok;
        results.push(result);
        if !ok {
            any_failed = true;
            if !spec.defaults.continue_on_error {
                break;
            }
        }
    }

    let persist = state.changed
        && !spec.defaults.dry_run
        && (!any_failed || spec.defaults.continue_on_error);
    let mut backup_path = None;
    let fingerprint_after = if persist {
        let backup = spec.defaults.backup.unwrap_or(config.backup);
        if backup {
            backup_path = Some(fsio::write_backup(target, &original)?);
        }
        let bytes = context::encode(adapter, target, &state.workbook)?;
        fsio::atomic_write(target, &bytes)?;
        let fingerprint = Fingerprint::compute(&fsio::read_bytes(target)?);
        info!(
            before = %fingerprint_before.short(),
            after = %fingerprint.short(),
            "workflow persisted"
        );
        fingerprint
    } else {
        fingerprint_before
    };

    if let Some(guard) = guard {
        if let Err(e) = guard.release() {
            warn!(error = %e, "lock release failed after workflow");
        }
    }

    let steps_passed = results.iter().filter(|r| r.ok).count();
    Ok(WorkflowReport {
        name: spec.name.clone(),
        ok: !any_failed,
        steps_total: spec.steps.len(),
        steps_passed,
        results,
        fingerprint_before,
        fingerprint_after,
        persisted: persist,
        backup_path,
    })
}

impl RunState<'_> {
    fn step(&mut self, id: &str, action: &StepAction) -> EngineResult<StepOutput> {
        match action {
            StepAction::Inspect => Ok(StepOutput::read(json!({
                "sheets": self.workbook.summary(),
                "fingerprint": self.fingerprint()?.to_string(),
            }))),
            StepAction::CellGet { reference } => {
                let locator = Locator::parse(reference)
                    .map_err(|e| EngineError::invalid(ErrorCode::RangeInvalid, e.to_string()))?;
                let value = self
                    .workbook
                    .read(&locator)
                    .map_err(|e| operation_error(id, e.into()))?;
                Ok(StepOutput::read(json!({ "ref": reference, "value": value })))
            }
            StepAction::TableList { sheet } => {
                let tables = inspect::list_tables(&self.workbook, sheet.as_deref())
                    .ok_or_else(|| {
                        let missing = sheet.clone().unwrap_or_default();
                        operation_error(id, ops::OperationError::SheetNotFound(missing))
                    })?;
                Ok(StepOutput::read(json!({ "tables": tables })))
            }
            StepAction::RangeStat { reference } => {
                range_stat(&self.workbook, reference).map(StepOutput::read)
            }
            StepAction::Mutate { operation } => {
                let planned = PlannedOperation {
                    op_id: id.to_string(),
                    operation: operation.clone(),
                };
                if let Some(policy) = self.policy {
                    policy.check_plan(std::slice::from_ref(&planned), &self.workbook)?;
                }
                let record = ops::execute(&mut self.workbook, &planned)
                    .map_err(|source| operation_error(id, source))?;
                self.changed = true;
                Ok(StepOutput {
                    ok: true,
                    result: json!({ "impact": record.impact }),
                    changes: vec![record],
                })
            }
            StepAction::Validate { plan } => {
                let plan = self.load_plan(plan)?;
                let handle = self.handle()?;
                let report = validate::validate(&plan, &handle, self.policy);
                Ok(StepOutput {
                    ok: report.valid,
                    result: serde_json::to_value(&report)
                        .map_err(|e| EngineError::Internal(e.to_string()))?,
                    changes: Vec::new(),
                })
            }
            StepAction::Apply { plan } => {
                let plan = self.load_plan(plan)?;
                let changes = self.apply(&plan)?;
                Ok(StepOutput {
                    ok: true,
                    result: json!({ "plan_id": plan.plan_id(), "operations": changes.len() }),
                    changes,
                })
            }
            StepAction::Verify { assertions } => {
                let report = verify::verify(assertions, &self.workbook);
                Ok(StepOutput {
                    ok: report.all_passed,
                    result: serde_json::to_value(&report)
                        .map_err(|e| EngineError::Internal(e.to_string()))?,
                    changes: Vec::new(),
                })
            }
        }
    }

    /// Fingerprint the shared state would have once persisted
    fn fingerprint(&self) -> EngineResult<Fingerprint> {
        if !self.changed {
            return Ok(self.loaded);
        }
        let bytes = context::encode(self.adapter, self.path, &self.workbook)?;
        Ok(Fingerprint::compute(&bytes))
    }

    fn handle(&self) -> EngineResult<DocumentHandle> {
        Ok(DocumentHandle {
            path: self.path.to_path_buf(),
            workbook: self.workbook.clone(),
            fingerprint: self.fingerprint()?,
        })
    }

    fn load_plan(&self, path: &Path) -> EngineResult<PatchPlan> {
        let path = self.spec.resolve(path);
        let bytes = fsio::read_bytes(&path)?;
        Ok(PatchPlan::from_slice(&bytes)?)
    }

    /// Apply a plan to the shared state with the same checks as a disk apply
    fn apply(&mut self, plan: &PatchPlan) -> EngineResult<Vec<ChangeRecord>> {
        let current = self.fingerprint()?;
        if plan.options().fail_on_external_change && current != *plan.target_fingerprint() {
            return Err(EngineError::Conflict {
                path: self.path.to_path_buf(),
                expected: *plan.target_fingerprint(),
                actual: current,
            });
        }
        let failures = checks::failures(&self.workbook, plan.preconditions());
        if !failures.is_empty() {
            return Err(EngineError::PreconditionFailed { failures });
        }
        if let Some(policy) = self.policy {
            policy.check_plan(plan.operations(), &self.workbook)?;
        }

        let mut scratch = self.workbook.clone();
        let mut changes = Vec::with_capacity(plan.operations().len());
        for planned in plan.operations() {
            let record = ops::execute(&mut scratch, planned)
                .map_err(|source| operation_error(&planned.op_id, source))?;
            changes.push(record);
        }
        let failures = checks::failures(&scratch, plan.postconditions());
        if !failures.is_empty() {
            return Err(EngineError::PostconditionFailed { failures });
        }
        self.workbook = scratch;
        self.changed = true;
        Ok(changes)
    }
}

fn operation_error(op_id: &str, source: ops::OperationError) -> EngineError {
    EngineError::Operation {
        op_id: op_id.to_string(),
        source,
    }
}

/// Count, numeric count, sum, min, max and mean over a range
fn range_stat(workbook: &Workbook, reference: &str) -> EngineResult<Json> {
    let invalid = |message: String| EngineError::invalid(ErrorCode::RangeInvalid, message);
    let (sheet, range) = match Locator::parse(reference).map_err(|e| invalid(e.to_string()))? {
        Locator::Range { sheet, range } => (sheet, range),
        Locator::Cell { sheet, addr } => (sheet, wbpatch_artifact::CellRange::single(addr)),
        _ => return Err(invalid(format!("'{reference}' is not a Sheet!A1:B2 range"))),
    };
    let s = workbook
        .require_sheet(&sheet)
        .map_err(|e| EngineError::invalid(ErrorCode::SheetNotFound, e.to_string()))?;

    let mut non_empty = 0u64;
    let numbers: Vec<f64> = s
        .occupied()
        .filter(|(a, _)| range.contains(*a))
        .inspect(|_| non_empty += 1)
        .filter_map(|(_, v)| v.effective().and_then(|e| e.as_number()))
        .collect();
    let sum: f64 = numbers.iter().sum();
    let min = numbers.iter().copied().reduce(f64::min);
    let max = numbers.iter().copied().reduce(f64::max);
    #[allow(clippy::cast_precision_loss)]
    let mean = (!numbers.is_empty()).then(|| sum / numbers.len() as f64);
    Ok(json!({
        "ref": reference,
        "cells": range.cell_count(),
        "non_empty": non_empty,
        "numeric": numbers.len(),
        "sum": sum,
        "min": min,
        "max": max,
        "mean": mean,
    }))
}

/// Workflow document errors
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("malformed workflow: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unsupported workflow schema_version '{0}'")]
    UnsupportedVersion(String),

    #[error("workflow has no steps")]
    NoSteps,

    #[error("workflow step has an empty id")]
    EmptyStepId,

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("workflow '{0}' names no target document")]
    NoTarget(String),

    #[error(transparent)]
    Config(ConfigError),
}
