//! Operation executors
//!
//! One executor per [`Operation`] variant, selected by an exhaustive match in
//! [`execute`]. Dry-run, validation, apply and workflows all go through this
//! function, so what a preview reports is what an apply does.
//!
//! Every executor checks everything it needs before touching the workbook:
//! a failed operation leaves the model exactly as it found it.

mod cells;
pub mod formula;
mod objects;
mod table;

use crate::error::ErrorCode;
use crate::record::{ChangeRecord, Impact, Warning};
use serde_json::{json, Value as Json};
use tracing::debug;
use wbpatch_artifact::{CellRange, LocatorError, Sheet, Table, Workbook, WorkbookError};
use wbpatch_plan::{Operation, PlannedOperation};

pub use cells::MAX_WRITE_CELLS;
pub use formula::{sheet_references, shift_references};

/// Cells listed per before/after snapshot
pub const SNAPSHOT_LIMIT: usize = 64;

/// Execute one planned operation against `workbook`
///
/// # Errors
/// Returns the reason the operation cannot be applied to this workbook; the
/// workbook is unchanged in that case
pub fn execute(
    workbook: &mut Workbook,
    planned: &PlannedOperation,
) -> Result<ChangeRecord, OperationError> {
    let op = &planned.operation;
    debug!(op_id = %planned.op_id, kind = %op.kind(), target = %op.target(), "executing operation");

    let effect = match op {
        Operation::AddColumn {
            table,
            name,
            formula,
            default_value,
        } => table::add_column(workbook, table, name, formula.as_deref(), default_value.as_ref())?,
        Operation::AppendRows {
            table,
            rows,
            schema_mode,
        } => table::append_rows(workbook, table, rows, *schema_mode)?,
        Operation::SetCellRange {
            sheet,
            range,
            values,
            force_overwrite_formulas,
        } => cells::set_cell_range(workbook, sheet, *range, values, *force_overwrite_formulas)?,
        Operation::SetFormula {
            sheet,
            range,
            formula,
            fill,
            force_overwrite_values,
            force_overwrite_formulas,
        } => cells::set_formula(
            workbook,
            sheet,
            *range,
            formula,
            *fill,
            *force_overwrite_values,
            *force_overwrite_formulas,
        )?,
        Operation::FormatRange {
            target,
            style,
            decimals,
        } => cells::format_range(workbook, target, *style, *decimals)?,
        Operation::RenameObject { object, new_name } => objects::rename(workbook, object, new_name)?,
        Operation::DeleteObject { object } => objects::delete(workbook, object)?,
        Operation::CreateObject { object } => objects::create(workbook, object)?,
        Operation::ClearRange {
            sheet,
            range,
            contents,
            formats,
        } => cells::clear_range(workbook, sheet, *range, *contents, *formats)?,
    };

    let mut record = ChangeRecord::new(planned.op_id.clone(), op.kind(), op.target())
        .before(effect.before)
        .after(effect.after)
        .impact(effect.impact)
        .warnings(effect.warnings);
    record.sheet = effect.sheet;
    Ok(record)
}

/// What an executor did, before it is tagged with the operation's identity
#[derive(Debug, Default)]
pub(crate) struct Effect {
    sheet: Option<String>,
    before: Json,
    after: Json,
    impact: Impact,
    warnings: Vec<Warning>,
}

impl Effect {
    fn on(sheet: impl Into<String>) -> Self {
        Self {
            sheet: Some(sheet.into()),
            ..Self::default()
        }
    }

    fn before(mut self, before: Json) -> Self {
        self.before = before;
        self
    }

    fn after(mut self, after: Json) -> Self {
        self.after = after;
        self
    }

    fn impact(mut self, impact: Impact) -> Self {
        self.impact = impact;
        self
    }

    fn warn(mut self, warning: Warning) -> Self {
        self.warnings.push(warning);
        self
    }
}

/// Values inside `range`, capped at [`SNAPSHOT_LIMIT`] cells
pub(crate) fn snapshot(sheet: &Sheet, range: CellRange) -> Json {
    let mut cells = serde_json::Map::new();
    let mut non_empty = 0usize;
    for (addr, value) in sheet.occupied().filter(|(a, _)| range.contains(*a)) {
        non_empty += 1;
        if cells.len() < SNAPSHOT_LIMIT {
            cells.insert(addr.to_string(), value.to_json());
        }
    }
    json!({
        "range": range.to_string(),
        "cells": cells,
        "non_empty": non_empty,
        "truncated": non_empty > SNAPSHOT_LIMIT,
    })
}

/// Another table on `sheet` overlapping `range`
pub(crate) fn overlapping_table<'a>(
    sheet: &'a Sheet,
    range: &CellRange,
    except: Option<&str>,
) -> Option<&'a Table> {
    sheet.tables().iter().find(|t| {
        except.map_or(true, |name| !t.name().eq_ignore_ascii_case(name))
            && t.range().intersects(range)
    })
}

/// Why an operation cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// Named sheet is absent
    #[error("sheet not found: '{0}'")]
    SheetNotFound(String),

    /// Named table is absent
    #[error("table not found: '{0}'")]
    TableNotFound(String),

    /// Named column is absent from its table
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// Range is malformed, out of bounds or collides with something
    #[error("invalid range: {0}")]
    RangeInvalid(String),

    /// Write would replace existing formulas
    #[error("{target}: {count} formula cell(s) would be overwritten (first at {first}); set force_overwrite_formulas to allow")]
    FormulaOverwriteBlocked {
        target: String,
        count: usize,
        first: String,
    },

    /// Row data or headers do not match the table's columns
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Operation is not applicable to the current state
    #[error("{0}")]
    Invalid(String),

    /// Operation is recognised but not supported in this form
    #[error("{0}")]
    Unsupported(String),
}

impl OperationError {
    /// Stable code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SheetNotFound(_) => ErrorCode::SheetNotFound,
            Self::TableNotFound(_) => ErrorCode::TableNotFound,
            Self::ColumnNotFound { .. } | Self::Invalid(_) => ErrorCode::ValidationFailed,
            Self::RangeInvalid(_) => ErrorCode::RangeInvalid,
            Self::FormulaOverwriteBlocked { .. } => ErrorCode::FormulaOverwriteBlocked,
            Self::SchemaMismatch(_) => ErrorCode::SchemaMismatch,
            Self::Unsupported(_) => ErrorCode::Unsupported,
        }
    }

    /// Structured context
    #[must_use]
    pub fn details(&self) -> Json {
        match self {
            Self::FormulaOverwriteBlocked {
                target,
                count,
                first,
            } => json!({ "target": target, "blocked": count, "first": first }),
            Self::ColumnNotFound { table, column } => json!({ "table": table, "column": column }),
            Self::SheetNotFound(name) => json!({ "sheet": name }),
            Self::TableNotFound(name) => json!({ "table": name }),
            _ => json!({}),
        }
    }
}

impl From<WorkbookError> for OperationError {
    fn from(e: WorkbookError) -> Self {
        match e {
            WorkbookError::SheetNotFound(name) => Self::SheetNotFound(name),
            WorkbookError::TableNotFound(name) => Self::TableNotFound(name),
            WorkbookError::ColumnNotFound { table, column } => Self::ColumnNotFound { table, column },
            other => Self::Invalid(other.to_string()),
        }
    }
}

impl From<LocatorError> for OperationError {
    fn from(e: LocatorError) -> Self {
        Self::RangeInvalid(e.to_string())
    }
}
