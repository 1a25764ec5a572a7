//! Table column and row executors

use super::formula::shift_references;
use super::{overlapping_table, Effect, OperationError};
use crate::record::Impact;
use indexmap::IndexMap;
use serde_json::json;
use wbpatch_artifact::{qualified, CellAddr, CellRange, CellValue, Workbook, MAX_COLUMN, MAX_ROW};
use wbpatch_plan::SchemaMode;

/// Append a column to the right edge of a table
///
/// A formula is written for the first data row and filled down with its
/// relative references shifted; a default value is copied as-is.
pub(super) fn add_column(
    workbook: &mut Workbook,
    table: &str,
    name: &str,
    formula: Option<&str>,
    default_value: Option<&CellValue>,
) -> Result<Effect, OperationError> {
    let (sheet, t) = workbook
        .find_table(table)
        .ok_or_else(|| OperationError::TableNotFound(table.to_string()))?;
    if t.column_position(name).is_some() {
        return Err(OperationError::Invalid(format!(
            "column '{name}' already exists in table '{}'",
            t.name()
        )));
    }

    let range = t.range();
    let new_col = range.end().col() + 1;
    if new_col > MAX_COLUMN {
        return Err(OperationError::RangeInvalid(format!(
            "table '{}' cannot grow past the last column",
            t.name()
        )));
    }
    let column = CellRange::new(
        CellAddr::new(range.start().row(), new_col)?,
        CellAddr::new(range.end().row(), new_col)?,
    );
    if let Some((addr, _)) = sheet.occupied().find(|(a, _)| column.contains(*a)) {
        return Err(OperationError::Invalid(format!(
            "cannot add column '{name}': {} is not empty",
            qualified(sheet.name(), addr)
        )));
    }
    if let Some(other) = overlapping_table(sheet, &column, Some(t.name())) {
        return Err(OperationError::RangeInvalid(format!(
            "column '{name}' would overlap table '{}'",
            other.name()
        )));
    }

    let sheet_name = sheet.name().to_string();
    let canonical = t.name().to_string();
    let old_columns = t.columns().to_vec();
    let data_rows = t.data_rows();

    let sheet = workbook.require_sheet_mut(&sheet_name)?;
    sheet.set_value(column.start(), Some(CellValue::Text(name.to_string())));
    for (offset, addr) in column.cells().skip(1).enumerate() {
        let value = match (formula, default_value) {
            (Some(f), _) => Some(CellValue::formula(shift_references(
                f,
                i64::try_from(offset).unwrap_or(0),
                0,
            ))),
            (None, Some(v)) => Some(v.clone().normalized()),
            (None, None) => None,
        };
        sheet.set_value(addr, value);
    }
    let mut columns = old_columns.clone();
    columns.push(name.to_string());
    let new_range = range.with_end_col(new_col);
    if let Some(t) = sheet.table_mut(&canonical) {
        t.reshape(new_range, columns);
    }

    Ok(Effect::on(sheet_name)
        .before(json!({ "range": range.to_string(), "columns": old_columns }))
        .after(json!({
            "range": new_range.to_string(),
            "column": name,
            "formula": formula,
            "default_value": default_value.map(CellValue::to_json),
        }))
        .impact(Impact::rows_cells(u64::from(data_rows), u64::from(data_rows))))
}

/// Append rows below a table and extend its range
///
/// Columns whose first data row holds a formula are filled from that formula
/// (shifted to the new row) when the row does not provide a value.
pub(super) fn append_rows(
    workbook: &mut Workbook,
    table: &str,
    rows: &[IndexMap<String, Option<CellValue>>],
    mode: SchemaMode,
) -> Result<Effect, OperationError> {
    let (sheet, t) = workbook
        .find_table(table)
        .ok_or_else(|| OperationError::TableNotFound(table.to_string()))?;
    let range = t.range();
    let columns = t.columns().to_vec();
    let first_data = range.start().row() + 1;

    let templates: Vec<Option<String>> = (0..columns.len())
        .map(|pos| {
            if t.data_rows() == 0 {
                return None;
            }
            let addr = CellAddr::new(first_data, t.sheet_column(pos)).ok()?;
            sheet
                .value(addr)
                .and_then(CellValue::formula_text)
                .map(str::to_string)
        })
        .collect();

    let count = u32::try_from(rows.len())
        .ok()
        .filter(|n| range.end().row().saturating_add(*n) <= MAX_ROW)
        .ok_or_else(|| {
            OperationError::RangeInvalid(format!("appending {} rows exceeds the sheet", rows.len()))
        })?;
    let new_range = range.with_end_row(range.end().row() + count);

    let mut grid = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        check_schema(index, row, &columns, &templates, mode)?;
        let target_row = range.end().row() + 1 + u32::try_from(index).unwrap_or(0);
        let shift = i64::from(target_row) - i64::from(first_data);
        let values: Vec<Option<CellValue>> = columns
            .iter()
            .enumerate()
            .map(|(pos, col)| {
                let provided = match mode {
                    SchemaMode::MapByHeader => row
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(col))
                        .map(|(_, v)| v),
                    SchemaMode::Strict | SchemaMode::AllowMissingNull => row.get(col),
                };
                match provided {
                    Some(v) => v.clone().map(CellValue::normalized),
                    None => templates[pos]
                        .as_deref()
                        .map(|f| CellValue::formula(shift_references(f, shift, 0))),
                }
            })
            .collect();
        grid.push(values);
    }

    let appended = CellRange::new(
        CellAddr::new(range.end().row() + 1, range.start().col())?,
        new_range.end(),
    );
    if let Some((addr, _)) = sheet.occupied().find(|(a, _)| appended.contains(*a)) {
        return Err(OperationError::Invalid(format!(
            "cannot append to '{}': {} is not empty",
            t.name(),
            qualified(sheet.name(), addr)
        )));
    }
    if let Some(other) = overlapping_table(sheet, &appended, Some(t.name())) {
        return Err(OperationError::RangeInvalid(format!(
            "appended rows would overlap table '{}'",
            other.name()
        )));
    }

    let sheet_name = sheet.name().to_string();
    let canonical = t.name().to_string();
    let old_rows = t.data_rows();

    let sheet = workbook.require_sheet_mut(&sheet_name)?;
    for (r, values) in grid.into_iter().enumerate() {
        let row = appended.start().row() + u32::try_from(r).unwrap_or(0);
        for (pos, value) in values.into_iter().enumerate() {
            let col = appended.start().col() + u32::try_from(pos).unwrap_or(0);
            sheet.set_value(CellAddr::new(row, col)?, value);
        }
    }
    if let Some(t) = sheet.table_mut(&canonical) {
        t.reshape(new_range, columns.clone());
    }

    let cells = u64::from(count) * columns.len() as u64;
    Ok(Effect::on(sheet_name)
        .before(json!({ "range": range.to_string(), "rows": old_rows }))
        .after(json!({
            "range": new_range.to_string(),
            "rows": old_rows + count,
            "rows_added": count,
        }))
        .impact(Impact::rows_cells(u64::from(count), cells)))
}

fn check_schema(
    index: usize,
    row: &IndexMap<String, Option<CellValue>>,
    columns: &[String],
    templates: &[Option<String>],
    mode: SchemaMode,
) -> Result<(), OperationError> {
    if mode == SchemaMode::MapByHeader {
        return Ok(());
    }
    let extra: Vec<&str> = row
        .keys()
        .filter(|k| !columns.iter().any(|c| c == *k))
        .map(String::as_str)
        .collect();
    if !extra.is_empty() {
        return Err(OperationError::SchemaMismatch(format!(
            "row {index}: columns not in table: {}",
            extra.join(", ")
        )));
    }
    if mode == SchemaMode::Strict {
        let missing: Vec<&str> = columns
            .iter()
            .zip(templates)
            .filter(|(c, template)| template.is_none() && !row.contains_key(c.as_str()))
            .map(|(c, _)| c.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(OperationError::SchemaMismatch(format!(
                "row {index}: missing columns: {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}
