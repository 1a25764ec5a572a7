//! Sheet and table lifecycle executors

use super::{overlapping_table, snapshot, Effect, OperationError};
use crate::record::{Impact, Warning};
use serde_json::json;
use wbpatch_artifact::{
    validate_table_name, CellAddr, Table, Workbook, WorkbookError,
};
use wbpatch_plan::{NewObject, ObjectRef};

pub(super) fn rename(
    workbook: &mut Workbook,
    object: &ObjectRef,
    new_name: &str,
) -> Result<Effect, OperationError> {
    match object {
        ObjectRef::Sheet { name } => {
            let referencing = count_formulas(workbook, |f| {
                f.contains(&format!("{name}!")) || f.contains(&format!("'{name}'!"))
            });
            workbook.rename_sheet(name, new_name)?;
            let mut effect = Effect::on(new_name)
                .before(json!({ "name": name }))
                .after(json!({ "name": new_name }))
                .impact(Impact {
                    sheets: 1,
                    ..Impact::default()
                });
            if referencing > 0 {
                effect = effect.warn(Warning::new(
                    "WARN_FORMULA_REFERENCES",
                    format!("{referencing} formula(s) reference sheet '{name}' and were not rewritten"),
                ));
            }
            Ok(effect)
        }
        ObjectRef::Table { name } => {
            let sheet = workbook
                .find_table(name)
                .map(|(s, _)| s.name().to_string())
                .ok_or_else(|| OperationError::TableNotFound(name.clone()))?;
            let referencing = count_formulas(workbook, |f| f.contains(&format!("{name}[")));
            workbook.rename_table(name, new_name)?;
            let mut effect = Effect::on(sheet)
                .before(json!({ "name": name }))
                .after(json!({ "name": new_name }))
                .impact(Impact {
                    tables: 1,
                    ..Impact::default()
                });
            if referencing > 0 {
                effect = effect.warn(Warning::new(
                    "WARN_FORMULA_REFERENCES",
                    format!("{referencing} formula(s) reference table '{name}' and were not rewritten"),
                ));
            }
            Ok(effect)
        }
        ObjectRef::Column { table, name } => Err(OperationError::Unsupported(format!(
            "renaming column '{table}[{name}]' is not supported"
        ))),
    }
}

pub(super) fn delete(workbook: &mut Workbook, object: &ObjectRef) -> Result<Effect, OperationError> {
    match object {
        ObjectRef::Sheet { name } => {
            let sheet = workbook.require_sheet(name)?;
            let tables: Vec<String> = sheet.tables().iter().map(|t| t.name().to_string()).collect();
            let cells = sheet.occupied_count() as u64;
            let used = sheet.used_range().map(|r| r.to_string());
            workbook.remove_sheet(name)?;

            let mut effect = Effect::on(name.as_str())
                .before(json!({ "name": name, "used_range": used, "cells": cells, "tables": tables }))
                .impact(Impact {
                    rows: 0,
                    cells,
                    sheets: 1,
                    tables: tables.len() as u64,
                });
            if !tables.is_empty() {
                effect = effect.warn(Warning::new(
                    "WARN_TABLES_ON_SHEET",
                    format!("deleted sheet '{name}' held table(s): {}", tables.join(", ")),
                ));
            }
            Ok(effect)
        }
        ObjectRef::Table { name } => {
            let (sheet, canonical) = workbook
                .find_table_mut(name)
                .ok_or_else(|| OperationError::TableNotFound(name.clone()))?;
            let sheet_name = sheet.name().to_string();
            let removed = sheet
                .remove_table(&canonical)
                .ok_or_else(|| OperationError::TableNotFound(name.clone()))?;
            Ok(Effect::on(sheet_name)
                .before(json!({
                    "name": removed.name(),
                    "range": removed.range().to_string(),
                    "columns": removed.columns(),
                }))
                .after(json!({ "cells_kept": true }))
                .impact(Impact {
                    tables: 1,
                    ..Impact::default()
                }))
        }
        ObjectRef::Column { table, name } => delete_column(workbook, table, name),
    }
}

/// Remove a column and shift the columns to its right one place left
fn delete_column(workbook: &mut Workbook, table: &str, column: &str) -> Result<Effect, OperationError> {
    let (sheet, t) = workbook
        .find_table(table)
        .ok_or_else(|| OperationError::TableNotFound(table.to_string()))?;
    let pos = t
        .column_position(column)
        .ok_or_else(|| OperationError::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        })?;
    if t.columns().len() == 1 {
        return Err(OperationError::Invalid(format!(
            "cannot delete '{column}': it is the only column of table '{}'",
            t.name()
        )));
    }

    let range = t.range();
    let target_col = t.sheet_column(pos);
    let mut columns = t.columns().to_vec();
    let removed_name = columns.remove(pos);
    let canonical = t.name().to_string();
    let sheet_name = sheet.name().to_string();
    let before = t
        .column_range(column, true)
        .map(|r| snapshot(sheet, r))
        .unwrap_or_default();

    let sheet = workbook.require_sheet_mut(&sheet_name)?;
    let last_col = range.end().col();
    for row in range.start().row()..=range.end().row() {
        for col in target_col..last_col {
            let from = CellAddr::new(row, col + 1)?;
            let to = CellAddr::new(row, col)?;
            let (value, format) = sheet
                .cell(from)
                .map(|c| (c.value.clone(), c.format.clone()))
                .unwrap_or_default();
            sheet.set_value(to, value);
            sheet.set_format(to, format);
        }
        let edge = CellAddr::new(row, last_col)?;
        sheet.set_value(edge, None);
        sheet.set_format(edge, None);
    }
    let new_range = range.with_end_col(last_col - 1);
    if let Some(t) = sheet.table_mut(&canonical) {
        t.reshape(new_range, columns.clone());
    }

    Ok(Effect::on(sheet_name)
        .before(before)
        .after(json!({ "range": new_range.to_string(), "columns": columns, "removed": removed_name }))
        .impact(Impact::rows_cells(
            u64::from(range.height() - 1),
            u64::from(range.height()),
        )))
}

pub(super) fn create(workbook: &mut Workbook, object: &NewObject) -> Result<Effect, OperationError> {
    match object {
        NewObject::Sheet { name } => {
            workbook.add_sheet(name)?;
            Ok(Effect::on(name.as_str())
                .after(json!({ "name": name }))
                .impact(Impact {
                    sheets: 1,
                    ..Impact::default()
                }))
        }
        NewObject::Table {
            name,
            sheet,
            range,
            columns,
        } => {
            validate_table_name(name)?;
            if let Some((_, existing)) = workbook.find_table(name) {
                return Err(WorkbookError::TableExists(existing.name().to_string()).into());
            }
            let s = workbook.require_sheet(sheet)?;
            if let Some(other) = overlapping_table(s, range, None) {
                return Err(OperationError::RangeInvalid(format!(
                    "{range} overlaps table '{}'",
                    other.name()
                )));
            }

            let header = range.with_end_row(range.start().row());
            let existing: Vec<Option<String>> = header
                .cells()
                .map(|a| s.value(a).map(ToString::to_string))
                .collect();
            let header_empty = existing.iter().all(Option::is_none);
            let (names, write_header) = if columns.is_empty() {
                let mut names = Vec::with_capacity(existing.len());
                for (addr, value) in header.cells().zip(&existing) {
                    match value {
                        Some(v) if !v.trim().is_empty() => names.push(v.clone()),
                        _ => {
                            return Err(OperationError::SchemaMismatch(format!(
                                "header cell {addr} is empty and no column names were given"
                            )))
                        }
                    }
                }
                (names, false)
            } else if header_empty {
                (columns.clone(), true)
            } else {
                for ((addr, found), wanted) in header.cells().zip(&existing).zip(columns) {
                    if found.as_deref() != Some(wanted.as_str()) {
                        return Err(OperationError::SchemaMismatch(format!(
                            "header cell {addr} holds {found:?}, expected '{wanted}'"
                        )));
                    }
                }
                (columns.clone(), false)
            };
            let mut lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
            lowered.sort();
            if lowered.windows(2).any(|w| w[0] == w[1]) {
                return Err(OperationError::SchemaMismatch(
                    "column names must be unique".into(),
                ));
            }

            let s = workbook.require_sheet_mut(sheet)?;
            if write_header {
                for (addr, n) in header.cells().zip(&names) {
                    s.set_value(addr, Some(wbpatch_artifact::CellValue::Text(n.clone())));
                }
            }
            s.push_table(Table::new(name.clone(), *range, names.clone()));

            let written = if write_header { names.len() as u64 } else { 0 };
            Ok(Effect::on(sheet.as_str())
                .after(json!({ "name": name, "range": range.to_string(), "columns": names }))
                .impact(Impact {
                    rows: u64::from(range.height() - 1),
                    cells: written,
                    sheets: 0,
                    tables: 1,
                }))
        }
    }
}

fn count_formulas(workbook: &Workbook, matches: impl Fn(&str) -> bool) -> usize {
    workbook
        .sheets()
        .iter()
        .flat_map(|s| s.occupied().filter_map(|(_, v)| v.formula_text()))
        .filter(|f| matches(f))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbpatch_artifact::{CellRange, CellValue};

    fn book() -> Workbook {
        let mut wb = Workbook::new().with_sheet("Data").with_sheet("Summary");
        let s = wb.sheet_mut("Data").unwrap();
        for (a, v) in [
            ("A1", CellValue::from("Id")),
            ("B1", "Name".into()),
            ("C1", "Score".into()),
            ("A2", 1.into()),
            ("B2", "x".into()),
            ("C2", 10.into()),
        ] {
            s.set_value(a.parse().unwrap(), Some(v));
        }
        s.push_table(Table::new(
            "People",
            "A1:C2".parse().unwrap(),
            vec!["Id".into(), "Name".into(), "Score".into()],
        ));
        wb.sheet_mut("Summary")
            .unwrap()
            .set_value("A1".parse().unwrap(), Some(CellValue::formula("=SUM(Data!C2:C9)")));
        wb
    }

    #[test]
    fn rename_sheet_warns_about_references() {
        let mut wb = book();
        let effect = rename(&mut wb, &ObjectRef::Sheet { name: "Data".into() }, "Raw").unwrap();
        assert!(wb.has_sheet("Raw"));
        assert_eq!(effect.warnings[0].code, "WARN_FORMULA_REFERENCES");
    }

    #[test]
    fn rename_column_unsupported() {
        let mut wb = book();
        let err = rename(
            &mut wb,
            &ObjectRef::Column {
                table: "People".into(),
                name: "Id".into(),
            },
            "Key",
        )
        .unwrap_err();
        assert_eq!(err.code().as_str(), "ERR_UNSUPPORTED");
    }

    #[test]
    fn delete_sheet_with_table_warns_and_last_sheet_fails() {
        let mut wb = book();
        let effect = delete(&mut wb, &ObjectRef::Sheet { name: "Data".into() }).unwrap();
        assert_eq!(effect.warnings[0].code, "WARN_TABLES_ON_SHEET");
        assert!(wb.find_table("People").is_none());
        let err = delete(&mut wb, &ObjectRef::Sheet { name: "Summary".into() }).unwrap_err();
        assert!(matches!(err, OperationError::Invalid(_)));
    }

    #[test]
    fn delete_table_keeps_cells() {
        let mut wb = book();
        delete(&mut wb, &ObjectRef::Table { name: "people".into() }).unwrap();
        assert!(wb.find_table("People").is_none());
        assert!(wb.sheet("Data").unwrap().value("B2".parse().unwrap()).is_some());
    }

    #[test]
    fn delete_column_shifts_left() {
        let mut wb = book();
        delete(
            &mut wb,
            &ObjectRef::Column {
                table: "People".into(),
                name: "Name".into(),
            },
        )
        .unwrap();
        let s = wb.sheet("Data").unwrap();
        assert_eq!(s.value("B1".parse().unwrap()), Some(&CellValue::from("Score")));
        assert_eq!(s.value("B2".parse().unwrap()), Some(&CellValue::Number(10.0)));
        assert_eq!(s.value("C1".parse().unwrap()), None);
        let (_, t) = wb.find_table("People").unwrap();
        assert_eq!(t.columns(), &["Id".to_string(), "Score".to_string()]);
        assert_eq!(t.range().to_string(), "A1:B2");
    }

    #[test]
    fn create_table_writes_or_reads_headers() {
        let mut wb = book();
        let range: CellRange = "E1:F3".parse().unwrap();
        create(
            &mut wb,
            &NewObject::Table {
                name: "Fresh".into(),
                sheet: "Data".into(),
                range,
                columns: vec!["K".into(), "V".into()],
            },
        )
        .unwrap();
        assert_eq!(
            wb.sheet("Data").unwrap().value("F1".parse().unwrap()),
            Some(&CellValue::from("V"))
        );

        let err = create(
            &mut wb,
            &NewObject::Table {
                name: "Again".into(),
                sheet: "Data".into(),
                range: "H1:I2".parse().unwrap(),
                columns: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(err, OperationError::SchemaMismatch(_)));
    }

    #[test]
    fn create_table_rejects_overlap_and_duplicates() {
        let mut wb = book();
        let overlap = NewObject::Table {
            name: "Other".into(),
            sheet: "Data".into(),
            range: "C2:D4".parse().unwrap(),
            columns: vec!["a".into(), "b".into()],
        };
        assert!(matches!(create(&mut wb, &overlap), Err(OperationError::RangeInvalid(_))));

        let dup = NewObject::Table {
            name: "people".into(),
            sheet: "Summary".into(),
            range: "D1:D2".parse().unwrap(),
            columns: vec!["a".into()],
        };
        assert!(matches!(create(&mut wb, &dup), Err(OperationError::Invalid(_))));
    }

    #[test]
    fn create_sheet_duplicate_fails() {
        let mut wb = book();
        assert!(create(&mut wb, &NewObject::Sheet { name: "Notes".into() }).is_ok());
        assert!(create(&mut wb, &NewObject::Sheet { name: "notes".into() }).is_err());
    }
}
