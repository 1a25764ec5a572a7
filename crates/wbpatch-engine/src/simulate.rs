//! Dry-run simulation
//!
//! Runs the plan's operations through the same executor apply uses, on a
//! disposable copy of the document. Nothing is persisted.

use crate::context::DocumentHandle;
use crate::error::ErrorCode;
use crate::ops::{self, OperationError};
use crate::record::{ChangeRecord, Summary};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, warn};
use wbpatch_artifact::Workbook;
use wbpatch_plan::PatchPlan;

/// Operation that stopped a simulation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOperation {
    pub op_id: String,
    pub code: ErrorCode,
    pub message: String,
    pub details: Json,
}

impl FailedOperation {
    fn new(op_id: &str, error: &OperationError) -> Self {
        Self {
            op_id: op_id.to_string(),
            code: error.code(),
            message: error.to_string(),
            details: error.details(),
        }
    }
}

/// Change preview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunReport {
    pub plan_id: String,
    pub fingerprint_match: bool,
    /// True when the run stopped before the last operation
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub changes: Vec<ChangeRecord>,
    pub summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_op: Option<FailedOperation>,
}

impl DryRunReport {
    /// Whether every operation simulated cleanly
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.aborted
    }
}

/// Simulate `plan` against `handle`
///
/// Honors `fail_on_external_change`: on a fingerprint mismatch the run aborts
/// before the first operation.
#[must_use]
pub fn simulate(plan: &PatchPlan, handle: &DocumentHandle) -> DryRunReport {
    let fingerprint_match = *plan.target_fingerprint() == handle.fingerprint;
    if !fingerprint_match && plan.options().fail_on_external_change {
        warn!(
            plan_id = plan.plan_id(),
            expected = %plan.target_fingerprint(),
            actual = %handle.fingerprint,
            "dry-run aborted: document changed since planning"
        );
        return DryRunReport {
            plan_id: plan.plan_id().to_string(),
            fingerprint_match,
            aborted: true,
            abort_reason: Some(format!(
                "document fingerprint {} does not match plan fingerprint {}",
                handle.fingerprint,
                plan.target_fingerprint()
            )),
            changes: Vec::new(),
            summary: Summary::default(),
            failed_op: None,
        };
    }

    let mut scratch = handle.workbook.clone();
    let (changes, failure) = run(&mut scratch, plan);
    let summary = Summary::from_records(&changes);
    debug!(
        plan_id = plan.plan_id(),
        operations = changes.len(),
        cells = summary.total_cells_affected,
        "dry-run finished"
    );

    DryRunReport {
        plan_id: plan.plan_id().to_string(),
        fingerprint_match,
        aborted: failure.is_some(),
        abort_reason: failure
            .as_ref()
            .map(|f| format!("operation '{}' failed: {}", f.op_id, f.message)),
        changes,
        summary,
        failed_op: failure,
    }
}

/// Execute every operation in order, stopping at the first failure
fn run(
    workbook: &mut Workbook,
    plan: &PatchPlan,
) -> (Vec<ChangeRecord>, Option<FailedOperation>) {
    let mut changes = Vec::with_capacity(plan.operations().len());
    for planned in plan.operations() {
        match ops::execute(workbook, planned) {
            Ok(record) => changes.push(record),
            Err(e) => return (changes, Some(FailedOperation::new(&planned.op_id, &e))),
        }
    }
    (changes, None)
}

/// Short text rendering of a report, one line per change
#[must_use]
pub fn render(report: &DryRunReport) -> String {
    let mut out = String::new();
    for record in &report.changes {
        out.push_str(&format!(
            "{:<8} {:<14} {:<28} rows={} cells={}\n",
            record.op_id, record.kind, record.target, record.impact.rows, record.impact.cells
        ));
    }
    if let Some(reason) = &report.abort_reason {
        out.push_str(&format!("aborted: {reason}\n"));
    }
    out.push_str(&format!(
        "{} operation(s), {} cell(s)\n",
        report.summary.total_operations, report.summary.total_cells_affected
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wbpatch_artifact::{CellValue, DocumentAdapter, Fingerprint, JsonWorkbookAdapter, Table};
    use wbpatch_plan::{NumberStyle, Operation, OperationKind, PlanBuilder};

    fn handle() -> DocumentHandle {
        let mut wb = Workbook::new().with_sheet("Data");
        let s = wb.sheet_mut("Data").unwrap();
        s.set_value("A1".parse().unwrap(), Some(CellValue::from("Qty")));
        s.set_value("A2".parse().unwrap(), Some(CellValue::from(4)));
        s.push_table(Table::new("T", "A1:A2".parse().unwrap(), vec!["Qty".into()]));
        let bytes = JsonWorkbookAdapter.encode(&wb).unwrap();
        DocumentHandle::from_bytes(&JsonWorkbookAdapter, "book.json".as_ref(), &bytes).unwrap()
    }

    fn double() -> Operation {
        Operation::AddColumn {
            table: "T".into(),
            name: "Double".into(),
            formula: Some("=A2*2".into()),
            default_value: None,
        }
    }

    #[test]
    fn simulation_leaves_handle_untouched() {
        let h = handle();
        let plan = PlanBuilder::for_target("book.json", h.fingerprint)
            .operation(double())
            .operation(Operation::FormatRange {
                target: "T[Double]".into(),
                style: NumberStyle::Number,
                decimals: 0,
            })
            .build()
            .unwrap();
        let before = h.workbook.clone();
        let report = simulate(&plan, &h);
        assert!(report.is_complete());
        assert_eq!(report.changes.len(), 2);
        assert_eq!(report.summary.by_kind[&OperationKind::AddColumn].cells, 1);
        assert_eq!(h.workbook, before);
        assert!(render(&report).contains("2 operation(s)"));
    }

    #[test]
    fn failing_operation_keeps_partial_records() {
        let h = handle();
        let plan = PlanBuilder::for_target("book.json", h.fingerprint)
            .operation(double())
            .operation(Operation::FormatRange {
                target: "T[Missing]".into(),
                style: NumberStyle::Number,
                decimals: 0,
            })
            .operation(double())
            .build()
            .unwrap();
        let report = simulate(&plan, &h);
        assert!(report.aborted);
        assert_eq!(report.changes.len(), 1);
        let failed = report.failed_op.unwrap();
        assert_eq!(failed.op_id, plan.operations()[1].op_id);
        assert_eq!(failed.code, ErrorCode::ValidationFailed);
    }

    #[test]
    fn external_change_aborts_when_requested() {
        let h = handle();
        let plan = PlanBuilder::for_target("book.json", Fingerprint::compute(b"stale"))
            .operation(double())
            .build()
            .unwrap();
        let report = simulate(&plan, &h);
        assert!(report.aborted);
        assert!(!report.fingerprint_match);
        assert!(report.changes.is_empty());

        let lenient = PlanBuilder::for_target("book.json", Fingerprint::compute(b"stale"))
            .fail_on_external_change(false)
            .operation(double())
            .build()
            .unwrap();
        let report = simulate(&lenient, &h);
        assert!(!report.aborted);
        assert_eq!(report.changes.len(), 1);
    }
}
