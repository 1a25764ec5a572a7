//! Mutation policy
//!
//! A policy file (YAML or JSON) guards a document:
//!
//! ```yaml
//! protected_sheets: [Summary]
//! protected_ranges: ["Data!A1:D1"]
//! mutation_thresholds:
//!   max_rows: 1000
//!   max_cells: 50000
//! allowed_operations: [add_column, format_range]
//! ```
//!
//! Sheet and range protection is checked per operation against the footprint
//! it would touch; thresholds are checked against the projected total impact
//! of the whole plan.

use crate::config::{read_text, ConfigError};
use crate::ops;
use crate::record::{ChangeRecord, Warning};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use wbpatch_artifact::{CellAddr, CellRange, Locator, Workbook};
use wbpatch_plan::{NewObject, ObjectRef, Operation, OperationKind, PlannedOperation};

/// Plan-wide limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutationThresholds {
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub max_cells: Option<u64>,
}

/// Loaded policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub protected_sheets: Vec<String>,
    /// `Sheet!A1:B2` locators
    pub protected_ranges: Vec<String>,
    pub mutation_thresholds: MutationThresholds,
    /// Empty means every operation kind is allowed
    pub allowed_operations: Vec<OperationKind>,
}

/// Refused mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("policy violation ({rule}): {message}")]
pub struct PolicyViolation {
    pub rule: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    pub target: String,
    pub message: String,
}

/// Region an operation touches; `range: None` is the whole sheet
#[derive(Debug, Clone, PartialEq, Eq)]
struct Footprint {
    sheet: String,
    range: Option<CellRange>,
}

impl Policy {
    /// Parse YAML (JSON is valid YAML)
    ///
    /// # Errors
    /// Returns error on malformed input, unknown keys or bad range locators
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let policy: Self = serde_yaml::from_str(text)?;
        for range in &policy.protected_ranges {
            match Locator::parse(range) {
                Ok(Locator::Range { .. } | Locator::Cell { .. }) => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "protected range '{range}' must be Sheet!A1 or Sheet!A1:B2"
                    )))
                }
            }
        }
        Ok(policy)
    }

    /// Load a policy file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let policy = Self::from_yaml_str(&read_text(path)?)?;
        debug!(path = %path.display(), "loaded policy");
        Ok(policy)
    }

    /// Check one operation against sheet, range and kind rules
    ///
    /// `workbook` is the state the operation would run against.
    ///
    /// # Errors
    /// Returns the first rule the operation breaks
    pub fn check(
        &self,
        planned: &PlannedOperation,
        workbook: &Workbook,
    ) -> Result<Vec<Warning>, PolicyViolation> {
        let op = &planned.operation;
        let violation = |rule, message: String| PolicyViolation {
            rule,
            op_id: Some(planned.op_id.clone()),
            target: op.target(),
            message,
        };

        if !self.allowed_operations.is_empty() && !self.allowed_operations.contains(&op.kind()) {
            return Err(violation(
                "operation_not_allowed",
                format!("{} operations are not allowed", op.kind()),
            ));
        }

        let mut warnings = Vec::new();
        for footprint in footprints(op, workbook) {
            if self
                .protected_sheets
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&footprint.sheet))
            {
                return Err(violation(
                    "protected_sheet",
                    format!("sheet '{}' is protected", footprint.sheet),
                ));
            }
            for protected in &self.protected_ranges {
                let Some((sheet, range)) = protected_range(protected) else {
                    continue;
                };
                let hit = sheet == footprint.sheet
                    && footprint.range.map_or(true, |r| r.intersects(&range));
                if hit {
                    return Err(violation(
                        "protected_range",
                        format!("touches protected range '{protected}'"),
                    ));
                }
            }
        }
        if op.kind() == OperationKind::DeleteObject {
            warnings.push(
                Warning::new("WARN_DESTRUCTIVE", format!("deletes {}", op.target()))
                    .at(planned.op_id.clone()),
            );
        }
        Ok(warnings)
    }

    /// Check plan-wide thresholds against projected records
    ///
    /// # Errors
    /// Returns a violation when a threshold is exceeded
    pub fn check_totals(&self, records: &[ChangeRecord]) -> Result<(), PolicyViolation> {
        let rows: u64 = records.iter().map(|r| r.impact.rows).sum();
        let cells: u64 = records.iter().map(|r| r.impact.cells).sum();
        if let Some(max) = self.mutation_thresholds.max_rows.filter(|m| rows > *m) {
            return Err(PolicyViolation {
                rule: "max_rows",
                op_id: None,
                target: "plan".into(),
                message: format!("plan mutates {rows} rows, exceeding the limit of {max}"),
            });
        }
        if let Some(max) = self.mutation_thresholds.max_cells.filter(|m| cells > *m) {
            return Err(PolicyViolation {
                rule: "max_cells",
                op_id: None,
                target: "plan".into(),
                message: format!("plan mutates {cells} cells, exceeding the limit of {max}"),
            });
        }
        Ok(())
    }

    /// Check every operation in order on a projection of `workbook`, then the
    /// plan-wide thresholds
    ///
    /// # Errors
    /// Returns the first violation
    pub fn check_plan(
        &self,
        operations: &[PlannedOperation],
        workbook: &Workbook,
    ) -> Result<Vec<Warning>, PolicyViolation> {
        let mut scratch = workbook.clone();
        let mut warnings = Vec::new();
        let mut records = Vec::with_capacity(operations.len());
        for planned in operations {
            warnings.extend(self.check(planned, &scratch)?);
            match ops::execute(&mut scratch, planned) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        self.check_totals(&records)?;
        Ok(warnings)
    }

    /// Check only the plan-wide thresholds, projecting `operations` onto a
    /// copy of `workbook`
    ///
    /// Projection stops at the first operation that cannot execute; execution
    /// reports those separately.
    ///
    /// # Errors
    /// Returns a violation when a threshold is exceeded
    pub fn check_plan_totals(
        &self,
        operations: &[PlannedOperation],
        workbook: &Workbook,
    ) -> Result<(), PolicyViolation> {
        let mut scratch = workbook.clone();
        let records: Vec<ChangeRecord> = operations
            .iter()
            .map_while(|planned| ops::execute(&mut scratch, planned).ok())
            .collect();
        self.check_totals(&records)
    }
}

fn protected_range(locator: &str) -> Option<(String, CellRange)> {
    match Locator::parse(locator).ok()? {
        Locator::Range { sheet, range } => Some((sheet, range)),
        Locator::Cell { sheet, addr } => Some((sheet, CellRange::single(addr))),
        _ => None,
    }
}

fn footprints(op: &Operation, workbook: &Workbook) -> Vec<Footprint> {
    let on = |sheet: &str, range: Option<CellRange>| Footprint {
        sheet: sheet.to_string(),
        range,
    };
    let table_area = |name: &str| {
        workbook
            .find_table(name)
            .map(|(s, t)| on(s.name(), Some(t.range())))
    };

    match op {
        Operation::SetCellRange { sheet, range, .. }
        | Operation::SetFormula { sheet, range, .. }
        | Operation::ClearRange { sheet, range, .. } => vec![on(sheet, Some(*range))],
        Operation::FormatRange { target, .. } => match Locator::parse(target) {
            Ok(Locator::Cell { sheet, addr }) => vec![on(&sheet, Some(CellRange::single(addr)))],
            Ok(Locator::Range { sheet, range }) => vec![on(&sheet, Some(range))],
            Ok(Locator::TableColumn { table, column }) => workbook
                .resolve_table_column(&table, &column, false)
                .map(|(sheet, range)| on(&sheet, Some(range)))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        },
        Operation::AddColumn { table, .. } => workbook
            .find_table(table)
            .and_then(|(s, t)| {
                let col = t.range().end().col() + 1;
                let top = CellAddr::new(t.range().start().row(), col).ok()?;
                let bottom = CellAddr::new(t.range().end().row(), col).ok()?;
                Some(on(s.name(), Some(CellRange::new(top, bottom))))
            })
            .into_iter()
            .collect(),
        Operation::AppendRows { table, rows, .. } => workbook
            .find_table(table)
            .and_then(|(s, t)| {
                let r = t.range();
                let n = u32::try_from(rows.len()).ok()?;
                let top = CellAddr::new(r.end().row() + 1, r.start().col()).ok()?;
                let bottom = CellAddr::new(r.end().row().saturating_add(n), r.end().col()).ok()?;
                Some(on(s.name(), Some(CellRange::new(top, bottom))))
            })
            .into_iter()
            .collect(),
        Operation::RenameObject { object, .. } | Operation::DeleteObject { object } => match object {
            ObjectRef::Sheet { name } => vec![on(name, None)],
            ObjectRef::Table { name } | ObjectRef::Column { table: name, .. } => {
                table_area(name).into_iter().collect()
            }
        },
        Operation::CreateObject { object } => match object {
            NewObject::Sheet { .. } => Vec::new(),
            NewObject::Table { sheet, range, .. } => vec![on(sheet, Some(*range))],
        },
    }
}
