//! Testing utilities for wbpatch workspace
//!
//! Shared fixtures: the Sales workbook, on-disk copies in temp dirs and
//! plan helpers.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wbpatch_artifact::{
    CellValue, DocumentAdapter, Fingerprint, JsonWorkbookAdapter, Table, Workbook,
};
use wbpatch_plan::{
    Condition, ConditionKind, NumberStyle, Operation, PatchPlan, PlanBuilder,
};

pub const SALES_SHEET: &str = "Data";
pub const SALES_TABLE: &str = "Sales";

/// Sheet `Data` with table `Sales` over `A1:C3`:
///
/// | Region | Revenue | Cost |
/// |--------|---------|------|
/// | North  | 100     | 60   |
/// | South  | 200     | 150  |
pub fn sales_workbook() -> Workbook {
    let mut wb = Workbook::new().with_sheet(SALES_SHEET);
    let sheet = wb.sheet_mut(SALES_SHEET).unwrap();
    let rows: [[CellValue; 3]; 3] = [
        ["Region".into(), "Revenue".into(), "Cost".into()],
        ["North".into(), 100.into(), 60.into()],
        ["South".into(), 200.into(), 150.into()],
    ];
    for (r, row) in rows.into_iter().enumerate() {
        for (c, value) in row.into_iter().enumerate() {
            let addr = wbpatch_artifact::CellAddr::new(
                u32::try_from(r + 1).unwrap(),
                u32::try_from(c + 1).unwrap(),
            )
            .unwrap();
            sheet.set_value(addr, Some(value));
        }
    }
    sheet.push_table(Table::new(
        SALES_TABLE,
        "A1:C3".parse().unwrap(),
        vec!["Region".into(), "Revenue".into(), "Cost".into()],
    ));
    wb
}

/// Encoded bytes of `workbook` with the reference adapter
pub fn encode(workbook: &Workbook) -> Vec<u8> {
    JsonWorkbookAdapter.encode(workbook).unwrap()
}

/// Decode the document at `path`
pub fn read_workbook(path: &Path) -> Workbook {
    JsonWorkbookAdapter.decode(&std::fs::read(path).unwrap()).unwrap()
}

/// Fingerprint of the bytes currently at `path`
pub fn fingerprint_of(path: &Path) -> Fingerprint {
    Fingerprint::compute(&std::fs::read(path).unwrap())
}

/// A temp dir holding one document
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl Fixture {
    /// Write `workbook` as `book.json` in a fresh temp dir
    pub fn new(workbook: &Workbook) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(&path, encode(workbook)).unwrap();
        Self { dir, path }
    }

    /// The Sales workbook on disk
    pub fn sales() -> Self {
        Self::new(&sales_workbook())
    }

    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.path).unwrap()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_of(&self.path)
    }

    pub fn workbook(&self) -> Workbook {
        read_workbook(&self.path)
    }

    /// Write an extra file beside the document
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Files in the fixture dir whose name ends in `.bak`
    pub fn backups(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "bak"))
            .collect()
    }
}

/// `add_column Sales[Margin] = (Revenue - Cost) / Revenue`
pub fn add_margin() -> Operation {
    Operation::AddColumn {
        table: SALES_TABLE.into(),
        name: "Margin".into(),
        formula: Some("=(B2-C2)/B2".into()),
        default_value: None,
    }
}

/// Percent format with one decimal on `Sales[Margin]`
pub fn format_margin() -> Operation {
    Operation::FormatRange {
        target: "Sales[Margin]".into(),
        style: NumberStyle::Percent,
        decimals: 1,
    }
}

/// Margin plan against the fixture's current fingerprint
pub fn margin_plan(fixture: &Fixture) -> PatchPlan {
    PlanBuilder::for_target(&fixture.path, fixture.fingerprint())
        .precondition(Condition::new(ConditionKind::ObjectExists, SALES_TABLE))
        .precondition(Condition::new(ConditionKind::ColumnAbsent, "Sales[Margin]"))
        .operation(add_margin())
        .operation(format_margin())
        .postcondition(Condition::new(ConditionKind::ColumnExists, "Sales[Margin]"))
        .build()
        .unwrap()
}

/// Assertions that hold after the margin plan
pub fn margin_assertions() -> Vec<serde_json::Value> {
    serde_json::from_str(
        r#"[
            { "kind": "column_exists", "table": "Sales", "column": "Margin" },
            { "kind": "row_count", "table": "Sales", "exact": 2 },
            { "kind": "cell_value_equals", "ref": "Data!A2", "expected": "North" },
            { "kind": "cell_not_empty", "ref": "Data!D3" }
        ]"#,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sales_fixture_shape() {
        let wb = sales_workbook();
        let (_, table) = wb.find_table(SALES_TABLE).unwrap();
        assert_eq!(table.columns().len(), 3);
        assert_eq!(table.data_rows(), 2);
    }

    #[test]
    fn fixture_round_trips_through_disk() {
        let fixture = Fixture::sales();
        assert_eq!(fixture.workbook(), sales_workbook());
        assert!(fixture.backups().is_empty());
    }
}
