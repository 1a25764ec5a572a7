//! Engine facade
//!
//! Bundles an adapter, configuration, lock manager, optional policy and an
//! event emitter so callers make one call per command instead of threading
//! them through every primitive.

use crate::apply::{self, ApplyOptions, ApplyOutcome};
use crate::config::EngineConfig;
use crate::context::DocumentHandle;
use crate::diff::{self, FileDiff};
use crate::error::{ApplyError, EngineResult};
use crate::events::EventEmitter;
use crate::fsio;
use crate::inspect::{self, HygieneReport, WorkbookInfo};
use crate::lock::LockManager;
use crate::mutate::{self, MutationOutcome};
use crate::policy::Policy;
use crate::simulate::{self, DryRunReport};
use crate::validate::{self, ValidationReport};
use crate::verify::{self, VerifyReport};
use crate::workflow::{self, WorkflowReport, WorkflowSpec};
use serde_json::{json, Value as Json};
use std::path::Path;
use tracing::debug;
use wbpatch_artifact::{DocumentAdapter, Fingerprint, JsonWorkbookAdapter};
use wbpatch_plan::{Operation, PatchPlan};

/// Entry point for every command
#[derive(Debug)]
pub struct Engine {
    adapter: Box<dyn DocumentAdapter>,
    config: EngineConfig,
    locks: LockManager,
    policy: Option<Policy>,
    events: EventEmitter,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(JsonWorkbookAdapter)
    }
}

impl Engine {
    /// Engine over `adapter` with default configuration and no policy
    #[must_use]
    pub fn new(adapter: impl DocumentAdapter + 'static) -> Self {
        let config = EngineConfig::default();
        Self {
            adapter: Box::new(adapter),
            locks: config.lock_manager(),
            config,
            policy: None,
            events: EventEmitter::disabled(),
        }
    }

    /// JSON engine configured for `document`: `wbpatch.toml` and the policy
    /// file beside it, when present
    ///
    /// # Errors
    /// Returns error if a discovered config or policy file is unusable
    pub fn for_document(document: &Path) -> EngineResult<Self> {
        let config = EngineConfig::discover(document)?;
        let policy = config.load_policy(document)?;
        Ok(Self::default().with_config(config).with_policy(policy))
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.locks = config.lock_manager();
        self.config = config;
        self
    }

    /// Replace the policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: Option<Policy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the event emitter
    #[inline]
    #[must_use]
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Event emitter
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> Option<&Policy> {
        self.policy.as_ref()
    }

    /// Document adapter
    #[inline]
    #[must_use]
    pub fn adapter(&self) -> &dyn DocumentAdapter {
        self.adapter.as_ref()
    }

    /// Fingerprint of the bytes at `path`
    ///
    /// # Errors
    /// Returns error if the file cannot be read
    pub fn fingerprint(&self, path: &Path) -> EngineResult<Fingerprint> {
        Ok(Fingerprint::compute(&fsio::read_bytes(path)?))
    }

    /// Load and decode `path`
    ///
    /// # Errors
    /// Returns error if the file cannot be read or decoded
    pub fn load(&self, path: &Path) -> EngineResult<DocumentHandle> {
        DocumentHandle::load(self.adapter(), path)
    }

    /// Validate `plan` against the document it targets, or `path` when given
    ///
    /// # Errors
    /// Returns error only if the document cannot be loaded; failed checks are
    /// part of the report
    pub fn validate(&self, plan: &PatchPlan, path: Option<&Path>) -> EngineResult<ValidationReport> {
        let handle = self.load(path.unwrap_or(plan.target_path()))?;
        Ok(validate::validate(plan, &handle, self.policy()))
    }

    /// Dry-run `plan`
    ///
    /// # Errors
    /// Returns error only if the document cannot be loaded
    pub fn simulate(&self, plan: &PatchPlan, path: Option<&Path>) -> EngineResult<DryRunReport> {
        let handle = self.load(path.unwrap_or(plan.target_path()))?;
        Ok(simulate::simulate(plan, &handle))
    }

    /// Apply `plan` with options taken from the plan and configuration
    ///
    /// # Errors
    /// Returns the stage-tagged failure
    pub fn apply(&self, plan: &PatchPlan, path: Option<&Path>) -> Result<ApplyOutcome, ApplyError> {
        let options = ApplyOptions::from_plan(plan, &self.config);
        self.apply_with(plan, path, &options)
    }

    /// Apply `plan` with explicit options
    ///
    /// # Errors
    /// Returns the stage-tagged failure
    pub fn apply_with(
        &self,
        plan: &PatchPlan,
        path: Option<&Path>,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome, ApplyError> {
        let path = path.unwrap_or(plan.target_path());
        debug!(path = %path.display(), backup = options.backup, "apply requested");
        self.events.emit(
            "apply.start",
            json!({
                "plan_id": plan.plan_id(),
                "path": path.display().to_string(),
                "operations": plan.operations().len(),
            }),
        );
        let result = apply::apply(plan, path, options, self.adapter(), &self.locks, self.policy());
        match &result {
            Ok(outcome) => self.events.emit(
                "apply.committed",
                json!({
                    "plan_id": outcome.plan_id,
                    "fingerprint_after": outcome.fingerprint_after.to_string(),
                    "changes": outcome.changes.len(),
                }),
            ),
            Err(e) => self.events.emit(
                "apply.failed",
                json!({ "plan_id": plan.plan_id(), "stage": e.stage.as_str(), "code": e.code().as_str() }),
            ),
        }
        result
    }

    /// Execute one operation against `path` without a plan file
    ///
    /// # Errors
    /// Returns the stage-tagged failure
    pub fn mutate(
        &self,
        path: &Path,
        operation: Operation,
        dry_run: bool,
    ) -> Result<MutationOutcome, ApplyError> {
        mutate::mutate(self, path, operation, dry_run)
    }

    /// Structural overview of the document at `path`
    ///
    /// # Errors
    /// Returns error if the document cannot be loaded
    pub fn inspect(&self, path: &Path) -> EngineResult<WorkbookInfo> {
        let handle = self.load(path)?;
        Ok(inspect::inspect(&handle, self.adapter().format_id()))
    }

    /// Hygiene findings for the document at `path`
    ///
    /// # Errors
    /// Returns error if the document cannot be loaded
    pub fn hygiene(&self, path: &Path) -> EngineResult<HygieneReport> {
        Ok(inspect::hygiene(&self.load(path)?.workbook))
    }

    /// Diff two documents
    ///
    /// # Errors
    /// Returns error if either document cannot be loaded or the sheet filter
    /// names a missing sheet
    pub fn diff(&self, a: &Path, b: &Path, sheet: Option<&str>) -> EngineResult<FileDiff> {
        diff::diff_files(self.adapter(), a, b, sheet)
    }

    /// Evaluate assertions against the document at `path`
    ///
    /// # Errors
    /// Returns error only if the document cannot be loaded
    pub fn verify(&self, path: &Path, assertions: &[Json]) -> EngineResult<VerifyReport> {
        let handle = self.load(path)?;
        Ok(verify::verify(assertions, &handle.workbook))
    }

    /// Run a workflow against `target`
    ///
    /// # Errors
    /// Returns error for lock, load or persist failures outside any step
    pub fn run_workflow(&self, spec: &WorkflowSpec, target: &Path) -> EngineResult<WorkflowReport> {
        self.events.emit(
            "workflow.start",
            json!({
                "workflow": spec.name,
                "target": target.display().to_string(),
                "steps": spec.steps.len(),
            }),
        );
        let report =
            workflow::run(spec, target, self.adapter(), &self.locks, &self.config, self.policy())?;
        self.events.emit(
            "workflow.end",
            json!({
                "workflow": report.name,
                "ok": report.ok,
                "steps_passed": report.steps_passed,
                "persisted": report.persisted,
            }),
        );
        Ok(report)
    }
}
