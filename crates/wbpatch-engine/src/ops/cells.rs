//! Range executors: values, formulas, formats, clearing

use super::formula::shift_references;
use super::{snapshot, Effect, OperationError};
use crate::record::{Impact, Warning};
use serde_json::json;
use wbpatch_artifact::{qualified, CellAddr, CellRange, CellValue, Locator, Workbook};
use wbpatch_plan::{FillMode, NumberStyle};

/// Blocked cells reported individually as warnings
const BLOCKED_WARNINGS: usize = 5;

/// Most cells a formula fill or format may write in one operation
pub const MAX_WRITE_CELLS: u64 = 1_000_000;

fn check_write_size(sheet: &str, range: CellRange) -> Result<(), OperationError> {
    if range.cell_count() > MAX_WRITE_CELLS {
        return Err(OperationError::RangeInvalid(format!(
            "{} covers {} cells; one operation writes at most {MAX_WRITE_CELLS}",
            qualified(sheet, range),
            range.cell_count()
        )));
    }
    Ok(())
}

pub(super) fn set_cell_range(
    workbook: &mut Workbook,
    sheet: &str,
    range: CellRange,
    values: &[Vec<Option<CellValue>>],
    force_overwrite_formulas: bool,
) -> Result<Effect, OperationError> {
    let s = workbook.require_sheet(sheet)?;
    if values.len() != range.height() as usize
        || values.iter().any(|r| r.len() != range.width() as usize)
    {
        return Err(OperationError::RangeInvalid(format!(
            "values do not match the shape of {range}"
        )));
    }

    let formulas: Vec<CellAddr> = s
        .occupied()
        .filter(|(a, v)| range.contains(*a) && v.is_formula())
        .map(|(a, _)| a)
        .collect();
    let mut effect = Effect::on(sheet);
    if let Some(first) = formulas.first() {
        if !force_overwrite_formulas {
            return Err(OperationError::FormulaOverwriteBlocked {
                target: qualified(sheet, range),
                count: formulas.len(),
                first: first.to_string(),
            });
        }
        effect = effect.warn(
            Warning::new(
                "WARN_FORMULAS_OVERWRITTEN",
                format!("{} formula cell(s) overwritten", formulas.len()),
            )
            .at(qualified(sheet, range)),
        );
    }
    let before = snapshot(s, range);

    let s = workbook.require_sheet_mut(sheet)?;
    let origin = range.start();
    for (r, row) in values.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let addr = origin.offset(r as i64, c as i64);
            s.set_value(addr, value.clone().map(CellValue::normalized));
        }
    }

    Ok(effect
        .before(before)
        .after(snapshot(s, range))
        .impact(Impact::rows_cells(u64::from(range.height()), range.cell_count())))
}

pub(super) fn set_formula(
    workbook: &mut Workbook,
    sheet: &str,
    range: CellRange,
    formula: &str,
    fill: FillMode,
    force_overwrite_values: bool,
    force_overwrite_formulas: bool,
) -> Result<Effect, OperationError> {
    let s = workbook.require_sheet(sheet)?;
    check_write_size(sheet, range)?;
    let origin = range.start();

    let mut writes = Vec::new();
    let mut blocked = Vec::new();
    for addr in range.cells() {
        match s.value(addr) {
            Some(v) if v.is_formula() && !force_overwrite_formulas => {
                blocked.push(format!("{addr} has formula '{v}'"));
            }
            Some(v) if !v.is_formula() && !force_overwrite_values => {
                blocked.push(format!("{addr} has value '{v}'"));
            }
            _ => {
                let text = match fill {
                    FillMode::Relative => shift_references(
                        formula,
                        i64::from(addr.row()) - i64::from(origin.row()),
                        i64::from(addr.col()) - i64::from(origin.col()),
                    ),
                    FillMode::Fixed => formula.to_string(),
                };
                writes.push((addr, text));
            }
        }
    }

    let target = qualified(sheet, range);
    if writes.is_empty() && !blocked.is_empty() {
        return Err(OperationError::FormulaOverwriteBlocked {
            target,
            count: blocked.len(),
            first: blocked[0].clone(),
        });
    }
    let before = snapshot(s, range);

    let s = workbook.require_sheet_mut(sheet)?;
    let touched = writes.len() as u64;
    for (addr, text) in writes {
        s.set_value(addr, Some(CellValue::formula(text)));
    }

    let mut effect = Effect::on(sheet)
        .before(before)
        .after(json!({
            "formula": formula,
            "fill": fill,
            "cells_touched": touched,
            "blocked": blocked.len(),
        }))
        .impact(Impact::cells(touched));
    for message in blocked.iter().take(BLOCKED_WARNINGS) {
        effect = effect.warn(Warning::new("WARN_CELLS_BLOCKED", message.clone()).at(target.clone()));
    }
    Ok(effect)
}

pub(super) fn format_range(
    workbook: &mut Workbook,
    target: &str,
    style: NumberStyle,
    decimals: u8,
) -> Result<Effect, OperationError> {
    let (sheet, range) = match Locator::parse(target)? {
        Locator::Cell { sheet, addr } => (sheet, CellRange::single(addr)),
        Locator::Range { sheet, range } => (sheet, range),
        Locator::TableColumn { table, column } => {
            let (s, t) = workbook
                .find_table(&table)
                .ok_or_else(|| OperationError::TableNotFound(table.clone()))?;
            if t.column_position(&column).is_none() {
                return Err(OperationError::ColumnNotFound { table, column });
            }
            let range = t.column_range(&column, false).ok_or_else(|| {
                OperationError::RangeInvalid(format!("table '{table}' has no data rows"))
            })?;
            (s.name().to_string(), range)
        }
        Locator::Name(name) => {
            return Err(OperationError::RangeInvalid(format!(
                "'{name}' is not a range or table column"
            )))
        }
    };

    let code = style.format_code(decimals);
    check_write_size(&sheet, range)?;
    let s = workbook.require_sheet_mut(&sheet)?;
    let previous: Vec<String> = {
        let mut seen: Vec<String> = s
            .cells()
            .filter(|(a, _)| range.contains(*a))
            .filter_map(|(_, c)| c.format.clone())
            .collect();
        seen.sort();
        seen.dedup();
        seen
    };
    for addr in range.cells() {
        s.set_format(addr, Some(code.clone()));
    }

    Ok(Effect::on(sheet)
        .before(json!({ "range": range.to_string(), "formats": previous }))
        .after(json!({ "range": range.to_string(), "style": style, "format": code }))
        .impact(Impact::rows_cells(u64::from(range.height()), range.cell_count())))
}

pub(super) fn clear_range(
    workbook: &mut Workbook,
    sheet: &str,
    range: CellRange,
    contents: bool,
    formats: bool,
) -> Result<Effect, OperationError> {
    let s = workbook.require_sheet(sheet)?;
    if contents {
        for t in s.tables() {
            let header = t.range().with_end_row(t.range().start().row());
            if header.intersects(&range) {
                return Err(OperationError::Unsupported(format!(
                    "clearing the header row of table '{}' is not supported; delete the table or column instead",
                    t.name()
                )));
            }
        }
    }
    let before = snapshot(s, range);
    let stored: Vec<CellAddr> = s
        .cells()
        .filter(|(a, _)| range.contains(*a))
        .map(|(a, _)| a)
        .collect();

    let s = workbook.require_sheet_mut(sheet)?;
    for addr in stored {
        if contents {
            s.set_value(addr, None);
        }
        if formats {
            s.set_format(addr, None);
        }
    }

    Ok(Effect::on(sheet)
        .before(before)
        .after(json!({
            "range": range.to_string(),
            "contents": contents,
            "formats": formats,
        }))
        .impact(Impact::rows_cells(u64::from(range.height()), range.cell_count())))
}
