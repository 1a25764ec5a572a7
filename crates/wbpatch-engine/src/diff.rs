//! Workbook diff
//!
//! Two passes:
//! - structural: sheets and tables present on one side only
//! - cells: the union of occupied coordinates of every sheet both sides share
//!
//! Cells compare by stored value, never formatting. Formula cells compare by
//! formula text; cached results are ignored. Output is ordered by sheet name,
//! then row, then column.

use crate::context::DocumentHandle;
use crate::error::{EngineError, EngineResult, ErrorCode};
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;
use wbpatch_artifact::{
    qualified, CellAddr, CellValue, DocumentAdapter, Fingerprint, Sheet, Workbook,
};

/// Version tag of persisted diff results
pub const DIFF_SCHEMA_VERSION: &str = "1.0";

/// How a cell changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One differing cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellChange {
    /// `Sheet!A1`
    #[serde(rename = "ref")]
    pub reference: String,
    pub sheet: String,
    pub cell: CellAddr,
    pub before: Json,
    pub after: Json,
    pub change_type: ChangeType,
}

/// Differences between two workbooks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    pub schema_version: &'static str,
    pub sheets_added: Vec<String>,
    pub sheets_removed: Vec<String>,
    pub tables_added: Vec<String>,
    pub tables_removed: Vec<String>,
    pub cell_changes: Vec<CellChange>,
    /// Structural plus cell changes
    pub total_changes: usize,
}

impl DiffResult {
    /// No differences at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }
}

/// Diff of two documents on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDiff {
    pub fingerprint_a: Fingerprint,
    pub fingerprint_b: Fingerprint,
    /// Byte-identical documents
    pub identical: bool,
    #[serde(flatten)]
    pub diff: DiffResult,
}

/// Compare `a` (before) with `b` (after)
///
/// # Errors
/// `ERR_SHEET_NOT_FOUND` if `sheet_filter` names a sheet absent from either side
pub fn diff(a: &Workbook, b: &Workbook, sheet_filter: Option<&str>) -> EngineResult<DiffResult> {
    if let Some(sheet) = sheet_filter {
        for (side, wb) in [("a", a), ("b", b)] {
            if !wb.has_sheet(sheet) {
                return Err(EngineError::invalid(
                    ErrorCode::SheetNotFound,
                    format!("sheet '{sheet}' not found in workbook {side}"),
                ));
            }
        }
    }
    let keep = |name: &str| sheet_filter.map_or(true, |f| f == name);

    let sheets_a: BTreeSet<&str> = a.sheet_names().into_iter().filter(|n| keep(n)).collect();
    let sheets_b: BTreeSet<&str> = b.sheet_names().into_iter().filter(|n| keep(n)).collect();
    let tables_a = table_names(a, keep);
    let tables_b = table_names(b, keep);

    let mut cell_changes = Vec::new();
    for name in sheets_a.intersection(&sheets_b) {
        if let (Some(sa), Some(sb)) = (a.sheet(name), b.sheet(name)) {
            diff_sheet(sa, sb, &mut cell_changes);
        }
    }

    let result = DiffResult {
        schema_version: DIFF_SCHEMA_VERSION,
        sheets_added: owned(sheets_b.difference(&sheets_a)),
        sheets_removed: owned(sheets_a.difference(&sheets_b)),
        tables_added: owned(tables_b.difference(&tables_a)),
        tables_removed: owned(tables_a.difference(&tables_b)),
        total_changes: 0,
        cell_changes,
    };
    let total_changes = result.sheets_added.len()
        + result.sheets_removed.len()
        + result.tables_added.len()
        + result.tables_removed.len()
        + result.cell_changes.len();
    debug!(total_changes, "diff computed");
    Ok(DiffResult {
        total_changes,
        ..result
    })
}

/// Load two documents and compare them
///
/// # Errors
/// Load errors for either path, or a bad sheet filter
pub fn diff_files(
    adapter: &dyn DocumentAdapter,
    path_a: &Path,
    path_b: &Path,
    sheet_filter: Option<&str>,
) -> EngineResult<FileDiff> {
    let a = DocumentHandle::load(adapter, path_a)?;
    let b = DocumentHandle::load(adapter, path_b)?;
    let diff = diff(&a.workbook, &b.workbook, sheet_filter)?;
    Ok(FileDiff {
        fingerprint_a: a.fingerprint,
        fingerprint_b: b.fingerprint,
        identical: a.fingerprint == b.fingerprint,
        diff,
    })
}

fn diff_sheet(a: &Sheet, b: &Sheet, out: &mut Vec<CellChange>) {
    let mut union: BTreeMap<CellAddr, (Option<&CellValue>, Option<&CellValue>)> =
        BTreeMap::new();
    for (addr, value) in a.occupied() {
        union.entry(addr).or_default().0 = Some(value);
    }
    for (addr, value) in b.occupied() {
        union.entry(addr).or_default().1 = Some(value);
    }

    for (addr, pair) in union {
        let change_type = match pair {
            (Some(x), Some(y)) if x.stored_eq(y) => continue,
            (Some(_), Some(_)) => ChangeType::Modified,
            (None, Some(_)) => ChangeType::Added,
            (Some(_), None) => ChangeType::Removed,
            (None, None) => continue,
        };
        out.push(CellChange {
            reference: qualified(a.name(), addr),
            sheet: a.name().to_string(),
            cell: addr,
            before: pair.0.map_or(Json::Null, CellValue::to_json),
            after: pair.1.map_or(Json::Null, CellValue::to_json),
            change_type,
        });
    }
}

fn table_names(workbook: &Workbook, keep: impl Fn(&str) -> bool) -> BTreeSet<&str> {
    workbook
        .tables()
        .filter(|(sheet, _)| keep(sheet))
        .map(|(_, t)| t.name())
        .collect()
}

fn owned<'a, 'b: 'a>(names: impl Iterator<Item = &'a &'b str>) -> Vec<String> {
    names.map(|n| (*n).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use wbpatch_artifact::Table;

    fn book(cells: &[(&str, CellValue)]) -> Workbook {
        let mut wb = Workbook::new().with_sheet("Data");
        let s = wb.sheet_mut("Data").unwrap();
        for (a, v) in cells {
            s.set_value(a.parse().unwrap(), Some(v.clone()));
        }
        wb
    }

    #[test]
    fn identical_workbooks_have_no_changes() {
        let wb = book(&[("A1", CellValue::from(1)), ("B2", CellValue::formula("=A1"))]);
        let result = diff(&wb, &wb.clone(), None).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.schema_version, "1.0");
    }

    #[test]
    fn classifies_and_orders_changes() {
        let a = book(&[("B1", CellValue::from(1)), ("A2", CellValue::from("x"))]);
        let b = book(&[("B1", CellValue::from(2)), ("A1", CellValue::from(true))]);
        let result = diff(&a, &b, None).unwrap();
        let refs: Vec<_> = result.cell_changes.iter().map(|c| c.reference.as_str()).collect();
        assert_eq!(refs, vec!["Data!A1", "Data!B1", "Data!A2"]);
        let types: Vec<_> = result.cell_changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::Added, ChangeType::Modified, ChangeType::Removed]);
        assert_eq!(result.cell_changes[1].before, serde_json::json!(1.0));
    }

    #[test]
    fn formulas_compare_by_text_only() {
        let a = book(&[(
            "A1",
            CellValue::Formula {
                formula: "=1+1".into(),
                cached: Some(Box::new(CellValue::from(2))),
            },
        )]);
        let b = book(&[("A1", CellValue::formula("=1+1"))]);
        assert!(diff(&a, &b, None).unwrap().is_empty());
        let c = book(&[("A1", CellValue::formula("=1+2"))]);
        assert_eq!(diff(&a, &c, None).unwrap().cell_changes.len(), 1);
    }

    #[test]
    fn formatting_is_ignored() {
        let a = book(&[("A1", CellValue::from(1))]);
        let mut b = a.clone();
        b.sheet_mut("Data").unwrap().set_format("A1".parse().unwrap(), Some("0.00".into()));
        assert!(diff(&a, &b, None).unwrap().is_empty());
    }

    #[test]
    fn structural_changes_and_filter() {
        let a = book(&[]);
        let mut b = a.clone().with_sheet("Extra");
        b.sheet_mut("Data")
            .unwrap()
            .push_table(Table::new("T", "A1:A2".parse().unwrap(), vec!["x".into()]));
        let result = diff(&a, &b, None).unwrap();
        assert_eq!(result.sheets_added, vec!["Extra".to_string()]);
        assert_eq!(result.tables_added, vec!["T".to_string()]);
        assert_eq!(result.total_changes, 2);

        let filtered = diff(&a, &b, Some("Data")).unwrap();
        assert!(filtered.sheets_added.is_empty());
        let err = diff(&a, &b, Some("Extra")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SheetNotFound);
    }

    fn grid() -> impl Strategy<Value = Vec<(u32, u32, i32)>> {
        prop::collection::vec((1u32..6, 1u32..6, -3i32..3), 0..12)
    }

    fn from_grid(cells: &[(u32, u32, i32)]) -> Workbook {
        let mut wb = Workbook::new().with_sheet("S");
        let s = wb.sheet_mut("S").unwrap();
        for &(row, col, v) in cells {
            s.set_value(CellAddr::new(row, col).unwrap(), Some(CellValue::from(v)));
        }
        wb
    }

    proptest! {
        #[test]
        fn diff_is_symmetric(x in grid(), y in grid()) {
            let (a, b) = (from_grid(&x), from_grid(&y));
            let forward = diff(&a, &b, None).unwrap();
            let backward = diff(&b, &a, None).unwrap();
            prop_assert_eq!(forward.total_changes, backward.total_changes);
            for (f, r) in forward.cell_changes.iter().zip(&backward.cell_changes) {
                prop_assert_eq!(&f.reference, &r.reference);
                prop_assert_eq!(&f.before, &r.after);
                prop_assert_eq!(&f.after, &r.before);
                let flipped = match f.change_type {
                    ChangeType::Added => ChangeType::Removed,
                    ChangeType::Removed => ChangeType::Added,
                    ChangeType::Modified => ChangeType::Modified,
                };
                prop_assert_eq!(flipped, r.change_type);
            }
        }

        #[test]
        fn diff_with_self_is_empty(x in grid()) {
            let a = from_grid(&x);
            prop_assert!(diff(&a, &a, None).unwrap().is_empty());
        }
    }
}
