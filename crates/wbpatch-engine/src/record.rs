//! Change records and impact summaries
//!
//! Dry-run and apply produce [`ChangeRecord`]s from the same executor, so the
//! "would happen" and "did happen" lists have identical shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use wbpatch_plan::OperationKind;

/// Non-fatal finding attached to a record or envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Warning {
    /// Warning without a location
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: None,
        }
    }

    /// Attach a location
    #[must_use]
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Counters describing how much an operation touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    pub rows: u64,
    pub cells: u64,
    pub sheets: u64,
    pub tables: u64,
}

impl Impact {
    /// Impact counting only cells
    #[must_use]
    pub const fn cells(cells: u64) -> Self {
        Self {
            rows: 0,
            cells,
            sheets: 0,
            tables: 0,
        }
    }

    /// Impact counting rows and cells
    #[must_use]
    pub const fn rows_cells(rows: u64, cells: u64) -> Self {
        Self {
            rows,
            cells,
            sheets: 0,
            tables: 0,
        }
    }

    fn add(&mut self, other: &Self) {
        self.rows += other.rows;
        self.cells += other.cells;
        self.sheets += other.sheets;
        self.tables += other.tables;
    }
}

/// Structured before/after description of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op_id: String,
    pub kind: OperationKind,
    pub target: String,
    /// Sheet the operation landed on, when it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    pub before: Json,
    pub after: Json,
    pub impact: Impact,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl ChangeRecord {
    /// Record with empty before/after
    #[must_use]
    pub fn new(op_id: impl Into<String>, kind: OperationKind, target: impl Into<String>) -> Self {
        Self {
            op_id: op_id.into(),
            kind,
            target: target.into(),
            sheet: None,
            before: Json::Null,
            after: Json::Null,
            impact: Impact::default(),
            warnings: Vec::new(),
        }
    }

    /// Set sheet
    #[must_use]
    pub fn on_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Set before summary
    #[must_use]
    pub fn before(mut self, before: Json) -> Self {
        self.before = before;
        self
    }

    /// Set after summary
    #[must_use]
    pub fn after(mut self, after: Json) -> Self {
        self.after = after;
        self
    }

    /// Set impact
    #[must_use]
    pub fn impact(mut self, impact: Impact) -> Self {
        self.impact = impact;
        self
    }

    /// Attach warnings
    #[must_use]
    pub fn warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Fields that must agree between dry-run and apply of the same plan
    #[must_use]
    pub fn shape(&self) -> (&str, OperationKind, &str, Impact) {
        (&self.op_id, self.kind, &self.target, self.impact)
    }
}

/// Per-kind totals in a [`Summary`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTotals {
    pub count: u64,
    pub rows: u64,
    pub cells: u64,
}

/// Aggregated impact of a set of records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total_operations: usize,
    pub total_cells_affected: u64,
    pub totals: Impact,
    pub by_kind: BTreeMap<OperationKind, KindTotals>,
    pub by_sheet: BTreeMap<String, Impact>,
}

impl Summary {
    /// Aggregate records by kind and by sheet
    #[must_use]
    pub fn from_records(records: &[ChangeRecord]) -> Self {
        let mut summary = Self {
            total_operations: records.len(),
            ..Self::default()
        };
        for record in records {
            summary.totals.add(&record.impact);
            let by_kind = summary.by_kind.entry(record.kind).or_default();
            by_kind.count += 1;
            by_kind.rows += record.impact.rows;
            by_kind.cells += record.impact.cells;
            let sheet = record.sheet.clone().unwrap_or_else(|| "(workbook)".to_string());
            summary.by_sheet.entry(sheet).or_default().add(&record.impact);
        }
        summary.total_cells_affected = summary.totals.cells;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_groups_by_kind_and_sheet() {
        let records = vec![
            ChangeRecord::new("op1", OperationKind::AddColumn, "Sales[Margin]")
                .on_sheet("Data")
                .impact(Impact::rows_cells(3, 4)),
            ChangeRecord::new("op2", OperationKind::FormatRange, "Sales[Margin]")
                .on_sheet("Data")
                .impact(Impact::cells(3)),
            ChangeRecord::new("op3", OperationKind::CreateObject, "Notes"),
        ];
        let summary = Summary::from_records(&records);
        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.total_cells_affected, 7);
        assert_eq!(summary.by_kind[&OperationKind::AddColumn].rows, 3);
        assert_eq!(summary.by_sheet["Data"].cells, 7);
        assert!(summary.by_sheet.contains_key("(workbook)"));
    }

    #[test]
    fn summary_serializes_kind_keys_as_names() {
        let records =
            vec![ChangeRecord::new("op1", OperationKind::ClearRange, "S!A1").impact(Impact::cells(1))];
        let json = serde_json::to_value(Summary::from_records(&records)).unwrap();
        assert_eq!(json["by_kind"]["clear_range"]["count"], 1);
    }
}
