//! Direct mutations
//!
//! `table add-column`, `table append-rows` and `cell set` skip the plan file
//! but not the transaction: the operation is wrapped in a one-operation plan
//! against the fingerprint read just before, then applied with the usual
//! lock, checks, backup and atomic persist. A dry run executes the operation
//! on a scratch copy instead.

use crate::apply::{ApplyOptions, ApplyOutcome};
use crate::context::DocumentHandle;
use crate::engine::Engine;
use crate::error::{ApplyError, ApplyStage, EngineError};
use crate::ops;
use crate::record::{ChangeRecord, Warning};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use wbpatch_artifact::Fingerprint;
use wbpatch_plan::{Operation, PlanBuilder};

/// Result of a direct mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub dry_run: bool,
    pub path: PathBuf,
    pub changes: Vec<ChangeRecord>,
    pub fingerprint_before: Fingerprint,
    /// Absent for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_after: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub warnings: Vec<Warning>,
}

impl MutationOutcome {
    fn committed(outcome: ApplyOutcome) -> Self {
        Self {
            dry_run: false,
            path: outcome.path,
            changes: outcome.changes,
            fingerprint_before: outcome.fingerprint_before,
            fingerprint_after: Some(outcome.fingerprint_after),
            backup_path: outcome.backup_path,
            warnings: outcome.warnings,
        }
    }
}

/// Execute `operation` against `path`
///
/// # Errors
/// Returns the stage-tagged failure; a dry run reports load failures at
/// [`ApplyStage::Load`] and operation failures at [`ApplyStage::Execute`]
pub fn mutate(
    engine: &Engine,
    path: &Path,
    operation: Operation,
    dry_run: bool,
) -> Result<MutationOutcome, ApplyError> {
    let handle = engine.load(path).map_err(ApplyError::at(ApplyStage::Load))?;
    let plan = PlanBuilder::for_target(path, handle.fingerprint)
        .backup(engine.config().backup)
        .operation(operation)
        .build()
        .map_err(EngineError::from)
        .map_err(ApplyError::at(ApplyStage::Load))?;
    debug!(path = %path.display(), kind = %plan.operations()[0].operation.kind(), dry_run, "direct mutation");

    if dry_run {
        return preview(&handle, &plan.operations()[0]);
    }
    let options = ApplyOptions::from_plan(&plan, engine.config());
    engine
        .apply_with(&plan, Some(path), &options)
        .map(MutationOutcome::committed)
}

fn preview(
    handle: &DocumentHandle,
    planned: &wbpatch_plan::PlannedOperation,
) -> Result<MutationOutcome, ApplyError> {
    let mut scratch = handle.workbook.clone();
    let record = ops::execute(&mut scratch, planned).map_err(|source| {
        ApplyError::at(ApplyStage::Execute)(EngineError::Operation {
            op_id: planned.op_id.clone(),
            source,
        })
    })?;
    Ok(MutationOutcome {
        dry_run: true,
        path: handle.path.clone(),
        warnings: record.warnings.clone(),
        changes: vec![record],
        fingerprint_before: handle.fingerprint,
        fingerprint_after: None,
        backup_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::ErrorCode;
    use wbpatch_artifact::{CellValue, DocumentAdapter, JsonWorkbookAdapter, Table, Workbook};

    fn write_book(dir: &Path) -> PathBuf {
        let mut wb = Workbook::new().with_sheet("Data");
        let s = wb.sheet_mut("Data").unwrap();
        s.set_value("A1".parse().unwrap(), Some(CellValue::from("Qty")));
        s.set_value("A2".parse().unwrap(), Some(CellValue::from(2)));
        s.set_value("B2".parse().unwrap(), Some(CellValue::from("=A2*2")));
        s.push_table(Table::new("T", "A1:A2".parse().unwrap(), vec!["Qty".into()]));
        let path = dir.join("book.json");
        std::fs::write(&path, JsonWorkbookAdapter.encode(&wb).unwrap()).unwrap();
        path
    }

    fn set_b2(value: CellValue, force: bool) -> Operation {
        Operation::SetCellRange {
            sheet: "Data".into(),
            range: "B2".parse().unwrap(),
            values: vec![vec![Some(value)]],
            force_overwrite_formulas: force,
        }
    }

    #[test]
    fn dry_run_leaves_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path());
        let before = std::fs::read(&path).unwrap();
        let engine = Engine::default();

        let outcome = mutate(&engine, &path, set_b2(CellValue::from(9), true), true).unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.changes.len(), 1);
        assert!(outcome.fingerprint_after.is_none());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn commit_goes_through_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path());
        let engine = Engine::default().with_config(EngineConfig::default().with_backup(false));

        let outcome = mutate(&engine, &path, set_b2(CellValue::from(9), true), false).unwrap();
        assert!(!outcome.dry_run);
        assert!(outcome.backup_path.is_none());
        assert_eq!(outcome.fingerprint_after, Some(engine.fingerprint(&path).unwrap()));
        let wb = engine.load(&path).unwrap().workbook;
        assert_eq!(
            wb.sheet("Data").unwrap().value("B2".parse().unwrap()),
            Some(&CellValue::Number(9.0))
        );
    }

    #[test]
    fn configured_backup_applies_to_direct_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path());
        let outcome =
            mutate(&Engine::default(), &path, set_b2(CellValue::from(1), true), false).unwrap();
        assert!(outcome.backup_path.unwrap().exists());
    }

    #[test]
    fn formula_guard_still_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_book(dir.path());
        let before = std::fs::read(&path).unwrap();

        for dry_run in [true, false] {
            let err = mutate(&Engine::default(), &path, set_b2(CellValue::from(1), false), dry_run)
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::FormulaOverwriteBlocked);
            assert_eq!(err.stage, ApplyStage::Execute);
        }
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}
