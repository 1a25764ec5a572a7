//! Read-only inspection
//!
//! Structural listings of a loaded document and the hygiene report behind
//! `validate workbook`. Hygiene findings never fail a command; they describe
//! things a reviewer may want to know before planning against the document.

use crate::context::DocumentHandle;
use crate::ops::sheet_references;
use crate::record::Warning;
use serde::Serialize;
use std::path::PathBuf;
use wbpatch_artifact::{qualified, CellValue, Fingerprint, SheetSummary, TableSummary, Workbook};

/// Locations listed per hygiene finding
pub const LOCATION_LIMIT: usize = 20;

/// Overview of one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkbookInfo {
    pub path: PathBuf,
    pub format: String,
    pub fingerprint: Fingerprint,
    pub sheets: Vec<SheetSummary>,
    pub table_count: usize,
    pub cell_count: usize,
    /// Warning-level hygiene findings
    pub warnings: Vec<Warning>,
}

/// One row of `sheet ls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetListing {
    pub index: usize,
    pub name: String,
    pub used_range: Option<String>,
    pub cells: usize,
    pub tables: usize,
}

/// Describe `handle`
#[must_use]
pub fn inspect(handle: &DocumentHandle, format: &str) -> WorkbookInfo {
    let sheets = handle.workbook.summary();
    let warnings = hygiene(&handle.workbook)
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .map(|f| {
            let warning = Warning::new(format!("WARN_{}", f.category.to_uppercase()), &f.message);
            match f.locations.first() {
                Some(at) => warning.at(at.as_str()),
                None => warning,
            }
        })
        .collect();
    WorkbookInfo {
        path: handle.path.clone(),
        format: format.to_string(),
        fingerprint: handle.fingerprint,
        table_count: sheets.iter().map(|s| s.tables.len()).sum(),
        cell_count: sheets.iter().map(|s| s.cells).sum(),
        sheets,
        warnings,
    }
}

/// Sheets in workbook order
#[must_use]
pub fn list_sheets(workbook: &Workbook) -> Vec<SheetListing> {
    workbook
        .summary()
        .into_iter()
        .enumerate()
        .map(|(index, s)| SheetListing {
            index,
            name: s.name,
            used_range: s.used_range,
            cells: s.cells,
            tables: s.tables.len(),
        })
        .collect()
}

/// Tables, optionally restricted to one sheet
///
/// Returns `None` when `sheet` names a sheet the workbook does not have.
#[must_use]
pub fn list_tables(workbook: &Workbook, sheet: Option<&str>) -> Option<Vec<TableSummary>> {
    if let Some(name) = sheet {
        workbook.sheet(name)?;
    }
    Some(
        workbook
            .summary()
            .into_iter()
            .filter(|s| sheet.map_or(true, |name| s.name == name))
            .flat_map(|s| s.tables)
            .collect(),
    )
}

/// How much a hygiene finding matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

/// One hygiene observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HygieneFinding {
    pub category: String,
    pub severity: Severity,
    pub message: String,
    /// First [`LOCATION_LIMIT`] places the finding applies to
    pub locations: Vec<String>,
}

/// Result of `validate workbook`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HygieneReport {
    /// Hygiene findings are advisory, so this is always true
    pub valid: bool,
    pub findings: Vec<HygieneFinding>,
    pub warnings: usize,
}

/// Collect hygiene findings for `workbook`
#[must_use]
pub fn hygiene(workbook: &Workbook) -> HygieneReport {
    let mut broken = Vec::new();
    let mut uncached = Vec::new();
    for sheet in workbook.sheets() {
        for (addr, value) in sheet.occupied() {
            let CellValue::Formula { formula, cached } = value else {
                continue;
            };
            let at = qualified(sheet.name(), addr);
            if sheet_references(formula)
                .iter()
                .any(|name| !workbook.has_sheet(name))
            {
                broken.push(at.clone());
            }
            if cached.is_none() {
                uncached.push(at);
            }
        }
    }
    let empty_sheets: Vec<String> = workbook
        .sheets()
        .iter()
        .filter(|s| s.occupied_count() == 0 && s.tables().is_empty())
        .map(|s| s.name().to_string())
        .collect();
    let empty_tables: Vec<String> = workbook
        .tables()
        .filter(|(_, t)| t.data_rows() == 0)
        .map(|(sheet, t)| format!("{sheet}!{}", t.name()))
        .collect();

    let mut findings = Vec::new();
    let mut note = |category: &str, severity: Severity, message: String, all: Vec<String>| {
        if !all.is_empty() {
            findings.push(HygieneFinding {
                category: category.to_string(),
                severity,
                message,
                locations: all.into_iter().take(LOCATION_LIMIT).collect(),
            });
        }
    };
    note(
        "broken_references",
        Severity::Warning,
        format!("{} formula(s) reference sheets that do not exist", broken.len()),
        broken,
    );
    note(
        "uncached_formulas",
        Severity::Info,
        format!(
            "{} formula(s) have no cached value until the workbook is recalculated",
            uncached.len()
        ),
        uncached,
    );
    note(
        "empty_sheets",
        Severity::Info,
        format!("{} sheet(s) hold no cells or tables", empty_sheets.len()),
        empty_sheets,
    );
    note(
        "empty_tables",
        Severity::Info,
        format!("{} table(s) have a header but no data rows", empty_tables.len()),
        empty_tables,
    );

    let warnings = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .count();
    HygieneReport {
        valid: true,
        findings,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbpatch_artifact::{DocumentAdapter, JsonWorkbookAdapter, Table, JSON_FORMAT_ID};

    fn book() -> Workbook {
        let mut wb = Workbook::new().with_sheet("Data").with_sheet("Scratch");
        let s = wb.sheet_mut("Data").unwrap();
        s.set_value("A1".parse().unwrap(), Some(CellValue::from("Qty")));
        s.set_value("A2".parse().unwrap(), Some(CellValue::from(4)));
        s.set_value("B2".parse().unwrap(), Some(CellValue::from("=Gone!A1*2")));
        s.set_value(
            "C2".parse().unwrap(),
            Some(CellValue::Formula {
                formula: "=A2+1".into(),
                cached: Some(Box::new(CellValue::Number(5.0))),
            }),
        );
        s.push_table(Table::new("T", "A1:A2".parse().unwrap(), vec!["Qty".into()]));
        s.set_value("E1".parse().unwrap(), Some(CellValue::from("Note")));
        s.push_table(Table::new("Empty", "E1:E1".parse().unwrap(), vec!["Note".into()]));
        wb
    }

    #[test]
    fn hygiene_reports_each_category() {
        let report = hygiene(&book());
        assert!(report.valid);
        let categories: Vec<&str> = report.findings.iter().map(|f| f.category.as_str()).collect();
        assert_eq!(
            categories,
            vec!["broken_references", "uncached_formulas", "empty_sheets", "empty_tables"]
        );
        assert_eq!(report.findings[0].locations, vec!["Data!B2".to_string()]);
        assert_eq!(report.findings[1].locations, vec!["Data!B2".to_string()]);
        assert_eq!(report.findings[2].locations, vec!["Scratch".to_string()]);
        assert_eq!(report.findings[3].locations, vec!["Data!Empty".to_string()]);
        assert_eq!(report.warnings, 1);
    }

    #[test]
    fn clean_workbook_has_no_findings() {
        let mut wb = Workbook::new().with_sheet("Data");
        wb.sheet_mut("Data")
            .unwrap()
            .set_value("A1".parse().unwrap(), Some(CellValue::from(1)));
        assert!(hygiene(&wb).findings.is_empty());
    }

    #[test]
    fn inspect_counts_and_surfaces_warnings() {
        let bytes = JsonWorkbookAdapter.encode(&book()).unwrap();
        let handle =
            DocumentHandle::from_bytes(&JsonWorkbookAdapter, "book.json".as_ref(), &bytes).unwrap();
        let info = inspect(&handle, JSON_FORMAT_ID);
        assert_eq!(info.sheets.len(), 2);
        assert_eq!(info.table_count, 2);
        assert_eq!(info.cell_count, 5);
        assert_eq!(info.warnings.len(), 1);
        assert_eq!(info.warnings[0].code, "WARN_BROKEN_REFERENCES");
    }

    #[test]
    fn listings_follow_workbook_order() {
        let wb = book();
        let sheets = list_sheets(&wb);
        assert_eq!(sheets[1].name, "Scratch");
        assert_eq!(sheets[0].tables, 2);
        assert_eq!(list_tables(&wb, Some("Data")).unwrap().len(), 2);
        assert!(list_tables(&wb, Some("Scratch")).unwrap().is_empty());
        assert!(list_tables(&wb, Some("Nope")).is_none());
    }
}
