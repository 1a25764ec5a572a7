//! Plan operations
//!
//! [`Operation`] is a closed set of mutation kinds. Every variant declares its
//! required fields in the type itself; optional fields carry serde defaults.
//! [`Operation::check_fields`] enforces what the type system cannot (non-empty
//! names, matching grid shapes) at plan-load time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use wbpatch_artifact::{qualified, split_table_column, CellRange, CellValue, Locator};

/// One mutation in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Append a column to a table
    AddColumn {
        table: String,
        name: String,
        /// Formula filled down every data row
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<String>,
        /// Constant filled down every data row when no formula is given
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<CellValue>,
    },

    /// Append data rows below a table
    AppendRows {
        table: String,
        rows: Vec<IndexMap<String, Option<CellValue>>>,
        #[serde(default)]
        schema_mode: SchemaMode,
    },

    /// Write literal values into a range
    SetCellRange {
        sheet: String,
        range: CellRange,
        /// Row-major grid matching the range shape; `null` clears a cell
        values: Vec<Vec<Option<CellValue>>>,
        #[serde(default)]
        force_overwrite_formulas: bool,
    },

    /// Write a formula into every cell of a range
    SetFormula {
        sheet: String,
        range: CellRange,
        formula: String,
        #[serde(default)]
        fill: FillMode,
        #[serde(default)]
        force_overwrite_values: bool,
        #[serde(default)]
        force_overwrite_formulas: bool,
    },

    /// Apply a number format to a range or table column
    FormatRange {
        /// `Sheet!A1:B2` or `Table[Column]`
        target: String,
        style: NumberStyle,
        #[serde(default = "default_decimals")]
        decimals: u8,
    },

    /// Rename a sheet or table
    RenameObject { object: ObjectRef, new_name: String },

    /// Delete a sheet, table definition or table column
    DeleteObject { object: ObjectRef },

    /// Create a sheet or table
    CreateObject { object: NewObject },

    /// Clear contents and/or formats of a range
    ClearRange {
        sheet: String,
        range: CellRange,
        #[serde(default = "default_true")]
        contents: bool,
        #[serde(default)]
        formats: bool,
    },
}

const fn default_decimals() -> u8 {
    2
}

const fn default_true() -> bool {
    true
}

/// Largest decimals count accepted by `format_range`
pub const MAX_DECIMALS: u8 = 10;

/// Operation discriminant, used for summaries and policy keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AddColumn,
    AppendRows,
    SetCellRange,
    SetFormula,
    FormatRange,
    RenameObject,
    DeleteObject,
    CreateObject,
    ClearRange,
}

impl OperationKind {
    /// Stable snake_case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddColumn => "add_column",
            Self::AppendRows => "append_rows",
            Self::SetCellRange => "set_cell_range",
            Self::SetFormula => "set_formula",
            Self::FormatRange => "format_range",
            Self::RenameObject => "rename_object",
            Self::DeleteObject => "delete_object",
            Self::CreateObject => "create_object",
            Self::ClearRange => "clear_range",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How appended rows are matched to table columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Every non-formula column required, no extras
    #[default]
    Strict,
    /// Missing columns become empty, no extras
    #[serde(alias = "allow-missing-null")]
    AllowMissingNull,
    /// Case-insensitive header match, extras ignored
    #[serde(alias = "map-by-header")]
    MapByHeader,
}

/// How a formula is written across a range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Relative references shift with each cell's offset from the top-left
    #[default]
    Relative,
    /// Identical text in every cell
    Fixed,
}

/// Number format presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    Number,
    Percent,
    Currency,
    Date,
    Text,
}

impl NumberStyle {
    /// Format code for this style
    #[must_use]
    pub fn format_code(&self, decimals: u8) -> String {
        let fraction = if decimals > 0 {
            format!(".{}", "0".repeat(usize::from(decimals)))
        } else {
            String::new()
        };
        match self {
            Self::Number => format!("#,##0{fraction}"),
            Self::Percent => format!("0{fraction}%"),
            Self::Currency => format!("$#,##0{fraction}"),
            Self::Date => "YYYY-MM-DD".to_string(),
            Self::Text => "@".to_string(),
        }
    }
}

/// Reference to an existing sheet, table or table column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectRef {
    Sheet { name: String },
    Table { name: String },
    Column { table: String, name: String },
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sheet { name } | Self::Table { name } => f.write_str(name),
            Self::Column { table, name } => write!(f, "{table}[{name}]"),
        }
    }
}

/// Object to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewObject {
    Sheet {
        name: String,
    },
    Table {
        name: String,
        sheet: String,
        range: CellRange,
        /// Header names; read from the header row when empty
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        columns: Vec<String>,
    },
}

impl Operation {
    /// Discriminant
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::AddColumn { .. } => OperationKind::AddColumn,
            Self::AppendRows { .. } => OperationKind::AppendRows,
            Self::SetCellRange { .. } => OperationKind::SetCellRange,
            Self::SetFormula { .. } => OperationKind::SetFormula,
            Self::FormatRange { .. } => OperationKind::FormatRange,
            Self::RenameObject { .. } => OperationKind::RenameObject,
            Self::DeleteObject { .. } => OperationKind::DeleteObject,
            Self::CreateObject { .. } => OperationKind::CreateObject,
            Self::ClearRange { .. } => OperationKind::ClearRange,
        }
    }

    /// Human-readable target locator
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::AddColumn { table, name, .. } => format!("{table}[{name}]"),
            Self::AppendRows { table, .. } => table.clone(),
            Self::SetCellRange { sheet, range, .. }
            | Self::SetFormula { sheet, range, .. }
            | Self::ClearRange { sheet, range, .. } => qualified(sheet, range),
            Self::FormatRange { target, .. } => target.clone(),
            Self::RenameObject { object, .. } | Self::DeleteObject { object } => object.to_string(),
            Self::CreateObject { object } => match object {
                NewObject::Sheet { name } => name.clone(),
                NewObject::Table { name, sheet, .. } => format!("{sheet}!{name}"),
            },
        }
    }

    /// Sheet named directly by the operation, if any
    #[must_use]
    pub fn sheet(&self) -> Option<&str> {
        match self {
            Self::SetCellRange { sheet, .. }
            | Self::SetFormula { sheet, .. }
            | Self::ClearRange { sheet, .. } => Some(sheet),
            Self::RenameObject {
                object: ObjectRef::Sheet { name },
                ..
            }
            | Self::DeleteObject {
                object: ObjectRef::Sheet { name },
            }
            | Self::CreateObject {
                object: NewObject::Sheet { name },
            }
            | Self::CreateObject {
                object: NewObject::Table { sheet: name, .. },
            } => Some(name),
            _ => None,
        }
    }

    /// Table named directly by the operation, if any
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::AddColumn { table, .. } | Self::AppendRows { table, .. } => Some(table),
            Self::RenameObject {
                object: ObjectRef::Table { name } | ObjectRef::Column { table: name, .. },
                ..
            }
            | Self::DeleteObject {
                object: ObjectRef::Table { name } | ObjectRef::Column { table: name, .. },
            } => Some(name),
            Self::FormatRange { target, .. } => split_table_column(target).map(|(t, _)| t),
            _ => None,
        }
    }

    /// Check field-level constraints that types alone do not express
    ///
    /// # Errors
    /// Returns a reason string for the first violated constraint
    pub fn check_fields(&self) -> Result<(), String> {
        match self {
            Self::AddColumn { table, name, formula, default_value } => {
                require("table", table)?;
                require("name", name)?;
                if formula.is_some() && default_value.is_some() {
                    return Err("formula and default_value are mutually exclusive".into());
                }
                if let Some(f) = formula {
                    require_formula(f)?;
                }
            }
            Self::AppendRows { table, rows, .. } => {
                require("table", table)?;
                if rows.is_empty() {
                    return Err("rows must not be empty".into());
                }
            }
            Self::SetCellRange { sheet, range, values, .. } => {
                require("sheet", sheet)?;
                let height = values.len();
                let width = values.first().map_or(0, Vec::len);
                if values.iter().any(|r| r.len() != width) {
                    return Err("values must be a rectangular grid".into());
                }
                if height != range.height() as usize || width != range.width() as usize {
                    return Err(format!(
                        "values are {height}x{width} but range {range} is {}x{}",
                        range.height(),
                        range.width()
                    ));
                }
            }
            Self::SetFormula { sheet, formula, .. } => {
                require("sheet", sheet)?;
                require_formula(formula)?;
            }
            Self::FormatRange { target, decimals, .. } => {
                require("target", target)?;
                match Locator::parse(target).map_err(|e| e.to_string())? {
                    Locator::Cell { .. } | Locator::Range { .. } | Locator::TableColumn { .. } => {}
                    Locator::Name(_) => {
                        return Err(format!(
                            "target '{target}' must be Sheet!Range or Table[Column]"
                        ))
                    }
                }
                if *decimals > MAX_DECIMALS {
                    return Err(format!("decimals must be at most {MAX_DECIMALS}"));
                }
            }
            Self::RenameObject { object, new_name } => {
                check_object(object)?;
                require("new_name", new_name)?;
            }
            Self::DeleteObject { object } => check_object(object)?,
            Self::CreateObject { object } => match object {
                NewObject::Sheet { name } => require("name", name)?,
                NewObject::Table { name, sheet, range, columns } => {
                    require("name", name)?;
                    require("sheet", sheet)?;
                    if !columns.is_empty() && columns.len() != range.width() as usize {
                        return Err(format!(
                            "{} columns given for a range {} wide",
                            columns.len(),
                            range.width()
                        ));
                    }
                }
            },
            Self::ClearRange { sheet, contents, formats, .. } => {
                require("sheet", sheet)?;
                if !contents && !formats {
                    return Err("at least one of contents or formats must be cleared".into());
                }
            }
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

fn require_formula(formula: &str) -> Result<(), String> {
    if !formula.starts_with('=') || formula.len() < 2 {
        return Err(format!("formula '{formula}' must start with '='"));
    }
    Ok(())
}

fn check_object(object: &ObjectRef) -> Result<(), String> {
    match object {
        ObjectRef::Sheet { name } | ObjectRef::Table { name } => require("name", name),
        ObjectRef::Column { table, name } => {
            require("table", table)?;
            require("name", name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(value: serde_json::Value) -> Operation {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let o = op(json!({"kind": "format_range", "target": "Sales[Margin]", "style": "percent"}));
        match o {
            Operation::FormatRange { decimals, .. } => assert_eq!(decimals, 2),
            other => panic!("unexpected {other:?}"),
        }
        let o = op(json!({"kind": "clear_range", "sheet": "S", "range": "A1:B2"}));
        assert!(matches!(o, Operation::ClearRange { contents: true, formats: false, .. }));
    }

    #[test]
    fn missing_required_field_fails_at_load() {
        let err = serde_json::from_value::<Operation>(json!({"kind": "add_column", "table": "T"}));
        assert!(err.is_err());
    }

    #[test]
    fn unknown_kind_fails_at_load() {
        let err = serde_json::from_value::<Operation>(json!({"kind": "explode", "table": "T"}));
        assert!(err.is_err());
    }

    #[test]
    fn schema_mode_accepts_kebab_alias() {
        let o = op(json!({"kind": "append_rows", "table": "T", "rows": [{"a": 1}], "schema_mode": "allow-missing-null"}));
        assert!(matches!(o, Operation::AppendRows { schema_mode: SchemaMode::AllowMissingNull, .. }));
    }

    #[test]
    fn format_codes() {
        assert_eq!(NumberStyle::Percent.format_code(2), "0.00%");
        assert_eq!(NumberStyle::Number.format_code(0), "#,##0");
        assert_eq!(NumberStyle::Currency.format_code(1), "$#,##0.0");
        assert_eq!(NumberStyle::Text.format_code(4), "@");
    }

    #[test]
    fn check_fields_grid_shape() {
        let o = op(json!({"kind": "set_cell_range", "sheet": "S", "range": "A1:B2", "values": [[1, 2], [3]]}));
        assert!(o.check_fields().unwrap_err().contains("rectangular"));
        let o = op(json!({"kind": "set_cell_range", "sheet": "S", "range": "A1:B2", "values": [[1, 2]]}));
        assert!(o.check_fields().unwrap_err().contains("1x2"));
        let o = op(json!({"kind": "set_cell_range", "sheet": "S", "range": "A1:B1", "values": [[1, null]]}));
        assert!(o.check_fields().is_ok());
    }

    #[test]
    fn check_fields_formula_prefix() {
        let o = op(json!({"kind": "set_formula", "sheet": "S", "range": "A1", "formula": "SUM(A1)"}));
        assert!(o.check_fields().is_err());
    }

    #[test]
    fn check_fields_format_target_shape() {
        let o = op(json!({"kind": "format_range", "target": "Sales", "style": "number"}));
        assert!(o.check_fields().is_err());
    }

    #[test]
    fn target_and_kind_descriptions() {
        let o = op(json!({"kind": "add_column", "table": "Sales", "name": "Margin"}));
        assert_eq!(o.kind().as_str(), "add_column");
        assert_eq!(o.target(), "Sales[Margin]");
        assert_eq!(o.table(), Some("Sales"));

        let o = op(json!({"kind": "delete_object", "object": {"type": "column", "table": "Sales", "name": "Cost"}}));
        assert_eq!(o.target(), "Sales[Cost]");

        let o = op(json!({"kind": "set_formula", "sheet": "Q1 Data", "range": "C2:C9", "formula": "=A2"}));
        assert_eq!(o.target(), "'Q1 Data'!C2:C9");
        assert_eq!(o.sheet(), Some("Q1 Data"));
    }
}
