//! In-memory workbook model
//!
//! A [`Workbook`] is an ordered list of [`Sheet`]s. Each sheet owns a sparse
//! grid of [`Cell`]s keyed by [`CellAddr`] and the [`Table`]s anchored on it.
//! Table names are unique across the workbook, compared case-insensitively.

use crate::locator::{CellAddr, CellRange, Locator};
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One grid cell: a stored value and/or a number format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Cell {
    fn is_blank(&self) -> bool {
        self.value.is_none() && self.format.is_none()
    }
}

/// Named table anchored on a sheet; the first row of `range` is the header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    range: CellRange,
    columns: Vec<String>,
}

impl Table {
    /// Create table definition
    #[must_use]
    pub fn new(name: impl Into<String>, range: CellRange, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            range,
            columns,
        }
    }

    /// Table name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full range including header
    #[inline]
    #[must_use]
    pub fn range(&self) -> CellRange {
        self.range
    }

    /// Column names in order
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Data rows (header excluded)
    #[inline]
    #[must_use]
    pub fn data_rows(&self) -> u32 {
        self.range.height() - 1
    }

    /// Position of a column, case-insensitive
    #[must_use]
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Sheet column number of the column at `position`
    #[must_use]
    pub fn sheet_column(&self, position: usize) -> u32 {
        let offset = u32::try_from(position).unwrap_or(u32::MAX);
        self.range.start().col().saturating_add(offset)
    }

    /// Cells of one column; `None` when the column is unknown or there are
    /// no rows left after excluding the header
    #[must_use]
    pub fn column_range(&self, name: &str, include_header: bool) -> Option<CellRange> {
        let pos = self.column_position(name)?;
        let col = self.sheet_column(pos);
        let top = if include_header {
            self.range.start().row()
        } else {
            self.range.start().row() + 1
        };
        let bottom = self.range.end().row();
        if top > bottom {
            return None;
        }
        let start = CellAddr::new(top, col).ok()?;
        let end = CellAddr::new(bottom, col).ok()?;
        Some(CellRange::new(start, end))
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Replace range and columns together
    pub fn reshape(&mut self, range: CellRange, columns: Vec<String>) {
        self.range = range;
        self.columns = columns;
    }
}

/// One worksheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    name: String,
    #[serde(default)]
    cells: BTreeMap<CellAddr, Cell>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tables: Vec<Table>,
}

impl Sheet {
    /// Empty sheet
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
            tables: Vec::new(),
        }
    }

    /// Sheet name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cell at coordinate
    #[inline]
    #[must_use]
    pub fn cell(&self, addr: CellAddr) -> Option<&Cell> {
        self.cells.get(&addr)
    }

    /// Stored value at coordinate
    #[inline]
    #[must_use]
    pub fn value(&self, addr: CellAddr) -> Option<&CellValue> {
        self.cells.get(&addr).and_then(|c| c.value.as_ref())
    }

    /// Number format at coordinate
    #[inline]
    #[must_use]
    pub fn format(&self, addr: CellAddr) -> Option<&str> {
        self.cells.get(&addr).and_then(|c| c.format.as_deref())
    }

    /// Set or clear a value, returning the previous one
    pub fn set_value(&mut self, addr: CellAddr, value: Option<CellValue>) -> Option<CellValue> {
        let cell = self.cells.entry(addr).or_default();
        let old = std::mem::replace(&mut cell.value, value);
        if cell.is_blank() {
            self.cells.remove(&addr);
        }
        old
    }

    /// Set or clear a number format, returning the previous one
    pub fn set_format(&mut self, addr: CellAddr, format: Option<String>) -> Option<String> {
        let cell = self.cells.entry(addr).or_default();
        let old = std::mem::replace(&mut cell.format, format);
        if cell.is_blank() {
            self.cells.remove(&addr);
        }
        old
    }

    /// All stored cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (CellAddr, &Cell)> {
        self.cells.iter().map(|(a, c)| (*a, c))
    }

    /// Cells holding a value, row-major
    pub fn occupied(&self) -> impl Iterator<Item = (CellAddr, &CellValue)> {
        self.cells
            .iter()
            .filter_map(|(a, c)| c.value.as_ref().map(|v| (*a, v)))
    }

    /// Count of cells holding a value
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.occupied().count()
    }

    /// Bounding range of occupied cells
    #[must_use]
    pub fn used_range(&self) -> Option<CellRange> {
        let mut iter = self.occupied().map(|(a, _)| a);
        let first = iter.next()?;
        let (mut min_r, mut min_c, mut max_r, mut max_c) =
            (first.row(), first.col(), first.row(), first.col());
        for a in iter {
            min_r = min_r.min(a.row());
            min_c = min_c.min(a.col());
            max_r = max_r.max(a.row());
            max_c = max_c.max(a.col());
        }
        Some(CellRange::new(
            CellAddr::new(min_r, min_c).ok()?,
            CellAddr::new(max_r, max_c).ok()?,
        ))
    }

    /// Tables anchored on this sheet
    #[inline]
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Table by name, case-insensitive
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Mutable table by name, case-insensitive
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Anchor a table on this sheet (uniqueness is the workbook's concern)
    pub fn push_table(&mut self, table: Table) {
        self.tables.push(table);
    }

    /// Detach a table definition; cell data is left in place
    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        let idx = self
            .tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))?;
        Some(self.tables.remove(idx))
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// Ordered collection of sheets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    /// Empty workbook (no sheets)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append an empty sheet
    #[must_use]
    pub fn with_sheet(mut self, name: impl Into<String>) -> Self {
        self.sheets.push(Sheet::new(name));
        self
    }

    /// Sheets in workbook order
    #[inline]
    #[must_use]
    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// Sheet names in workbook order
    #[must_use]
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(Sheet::name).collect()
    }

    /// Sheet by exact name
    #[must_use]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Mutable sheet by exact name
    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// Sheet by name or error
    ///
    /// # Errors
    /// Returns [`WorkbookError::SheetNotFound`] if absent
    pub fn require_sheet(&self, name: &str) -> Result<&Sheet, WorkbookError> {
        self.sheet(name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    /// Mutable sheet by name or error
    ///
    /// # Errors
    /// Returns [`WorkbookError::SheetNotFound`] if absent
    pub fn require_sheet_mut(&mut self, name: &str) -> Result<&mut Sheet, WorkbookError> {
        self.sheet_mut(name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    /// Whether a sheet exists
    #[inline]
    #[must_use]
    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheet(name).is_some()
    }

    /// Append a new empty sheet
    ///
    /// # Errors
    /// Returns error if the name is empty or already used
    pub fn add_sheet(&mut self, name: &str) -> Result<&mut Sheet, WorkbookError> {
        validate_sheet_name(name)?;
        if self.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
            return Err(WorkbookError::SheetExists(name.to_string()));
        }
        self.sheets.push(Sheet::new(name));
        let last = self.sheets.len() - 1;
        Ok(&mut self.sheets[last])
    }

    /// Remove a sheet and everything on it
    ///
    /// # Errors
    /// Returns error if the sheet is absent or is the last remaining one
    pub fn remove_sheet(&mut self, name: &str) -> Result<Sheet, WorkbookError> {
        let idx = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))?;
        if self.sheets.len() <= 1 {
            return Err(WorkbookError::LastSheet(name.to_string()));
        }
        Ok(self.sheets.remove(idx))
    }

    /// Rename a sheet
    ///
    /// # Errors
    /// Returns error if `from` is absent or `to` is invalid or taken
    pub fn rename_sheet(&mut self, from: &str, to: &str) -> Result<(), WorkbookError> {
        validate_sheet_name(to)?;
        if !self.has_sheet(from) {
            return Err(WorkbookError::SheetNotFound(from.to_string()));
        }
        if self
            .sheets
            .iter()
            .any(|s| s.name != from && s.name.eq_ignore_ascii_case(to))
        {
            return Err(WorkbookError::SheetExists(to.to_string()));
        }
        self.require_sheet_mut(from)?.set_name(to.to_string());
        Ok(())
    }

    /// Find a table anywhere in the workbook
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<(&Sheet, &Table)> {
        self.sheets
            .iter()
            .find_map(|s| s.table(name).map(|t| (s, t)))
    }

    /// Find a table and its sheet for mutation
    pub fn find_table_mut(&mut self, name: &str) -> Option<(&mut Sheet, String)> {
        let sheet = self.sheets.iter_mut().find(|s| s.table(name).is_some())?;
        let canonical = sheet.table(name)?.name().to_string();
        Some((sheet, canonical))
    }

    /// All tables with their sheet names, in workbook order
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.sheets
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (s.name(), t)))
    }

    /// Rename a table
    ///
    /// # Errors
    /// Returns error if absent, or the new name is invalid or taken
    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<(), WorkbookError> {
        validate_table_name(to)?;
        if self
            .find_table(to)
            .is_some_and(|(_, t)| !t.name().eq_ignore_ascii_case(from))
        {
            return Err(WorkbookError::TableExists(to.to_string()));
        }
        let (sheet, canonical) = self
            .find_table_mut(from)
            .ok_or_else(|| WorkbookError::TableNotFound(from.to_string()))?;
        if let Some(table) = sheet.table_mut(&canonical) {
            table.set_name(to.to_string());
        }
        Ok(())
    }

    /// Resolve `Table[Column]` to its sheet and cell range
    #[must_use]
    pub fn resolve_table_column(
        &self,
        table: &str,
        column: &str,
        include_header: bool,
    ) -> Option<(String, CellRange)> {
        let (sheet, t) = self.find_table(table)?;
        let range = t.column_range(column, include_header)?;
        Some((sheet.name().to_string(), range))
    }

    /// Resolve a locator to a read result
    ///
    /// # Errors
    /// Returns error if the named sheet, table or column does not exist
    pub fn read(&self, locator: &Locator) -> Result<ReadValue, WorkbookError> {
        match locator {
            Locator::Cell { sheet, addr } => {
                let s = self.require_sheet(sheet)?;
                Ok(ReadValue::Cell {
                    value: s.value(*addr).cloned(),
                    format: s.format(*addr).map(str::to_string),
                })
            }
            Locator::Range { sheet, range } => {
                let s = self.require_sheet(sheet)?;
                Ok(ReadValue::Grid(grid(s, *range)))
            }
            Locator::TableColumn { table, column } => {
                let (sheet, t) = self
                    .find_table(table)
                    .ok_or_else(|| WorkbookError::TableNotFound(table.clone()))?;
                if t.column_position(column).is_none() {
                    return Err(WorkbookError::ColumnNotFound {
                        table: table.clone(),
                        column: column.clone(),
                    });
                }
                let values = t
                    .column_range(column, false)
                    .map(|r| r.cells().map(|a| sheet.value(a).cloned()).collect())
                    .unwrap_or_default();
                Ok(ReadValue::Column(values))
            }
            Locator::Name(name) => {
                if let Some(s) = self.sheet(name) {
                    return Ok(ReadValue::Sheet(SheetSummary::of(s)));
                }
                if let Some((s, t)) = self.find_table(name) {
                    return Ok(ReadValue::Table(TableSummary::of(s.name(), t)));
                }
                Err(WorkbookError::ObjectNotFound(name.clone()))
            }
        }
    }

    /// Structural summary of every sheet
    #[must_use]
    pub fn summary(&self) -> Vec<SheetSummary> {
        self.sheets.iter().map(SheetSummary::of).collect()
    }

    /// Check structural invariants after decoding
    ///
    /// # Errors
    /// Returns the first violated invariant
    pub fn check_integrity(&self) -> Result<(), WorkbookError> {
        if self.sheets.is_empty() {
            return Err(WorkbookError::Corrupt("workbook has no sheets".into()));
        }
        let mut seen_sheets: Vec<String> = Vec::new();
        let mut seen_tables: Vec<String> = Vec::new();
        for sheet in &self.sheets {
            validate_sheet_name(&sheet.name)?;
            let key = sheet.name.to_lowercase();
            if seen_sheets.contains(&key) {
                return Err(WorkbookError::SheetExists(sheet.name.clone()));
            }
            seen_sheets.push(key);
            for table in &sheet.tables {
                let key = table.name.to_lowercase();
                if seen_tables.contains(&key) {
                    return Err(WorkbookError::TableExists(table.name.clone()));
                }
                seen_tables.push(key);
                if table.columns.len() != table.range.width() as usize {
                    return Err(WorkbookError::Corrupt(format!(
                        "table '{}' declares {} columns but spans {}",
                        table.name,
                        table.columns.len(),
                        table.range.width()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn grid(sheet: &Sheet, range: CellRange) -> Vec<Vec<Option<CellValue>>> {
    let start = range.start();
    (start.row()..=range.end().row())
        .map(|row| {
            (start.col()..=range.end().col())
                .map(|col| {
                    CellAddr::new(row, col)
                        .ok()
                        .and_then(|a| sheet.value(a).cloned())
                })
                .collect()
        })
        .collect()
}

/// Validate a sheet name
///
/// # Errors
/// Returns error if empty, too long, or containing reserved characters
pub fn validate_sheet_name(name: &str) -> Result<(), WorkbookError> {
    const RESERVED: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
    if name.trim().is_empty() || name.chars().count() > 31 || name.contains(RESERVED) {
        return Err(WorkbookError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validate a table name: a letter or underscore, then letters, digits,
/// underscores or dots
///
/// # Errors
/// Returns error if the name does not match
pub fn validate_table_name(name: &str) -> Result<(), WorkbookError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(WorkbookError::InvalidName(name.to_string()))
    }
}

/// Result of reading a locator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ReadValue {
    /// Single cell
    Cell {
        value: Option<CellValue>,
        format: Option<String>,
    },
    /// Rectangular range, row-major
    Grid(Vec<Vec<Option<CellValue>>>),
    /// Data cells of a table column
    Column(Vec<Option<CellValue>>),
    /// A whole sheet
    Sheet(SheetSummary),
    /// A whole table
    Table(TableSummary),
}

/// Structural description of a sheet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub used_range: Option<String>,
    pub cells: usize,
    pub tables: Vec<TableSummary>,
}

impl SheetSummary {
    fn of(sheet: &Sheet) -> Self {
        Self {
            name: sheet.name().to_string(),
            used_range: sheet.used_range().map(|r| r.to_string()),
            cells: sheet.occupied_count(),
            tables: sheet
                .tables()
                .iter()
                .map(|t| TableSummary::of(sheet.name(), t))
                .collect(),
        }
    }
}

/// Structural description of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub sheet: String,
    pub range: String,
    pub columns: Vec<String>,
    pub rows: u32,
}

impl TableSummary {
    fn of(sheet: &str, table: &Table) -> Self {
        Self {
            name: table.name().to_string(),
            sheet: sheet.to_string(),
            range: table.range().to_string(),
            columns: table.columns().to_vec(),
            rows: table.data_rows(),
        }
    }
}

/// Workbook model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkbookError {
    /// Sheet lookup failed
    #[error("sheet not found: '{0}'")]
    SheetNotFound(String),

    /// Sheet name already in use
    #[error("sheet already exists: '{0}'")]
    SheetExists(String),

    /// Removing the only sheet
    #[error("cannot delete sheet '{0}': workbook must retain at least one sheet")]
    LastSheet(String),

    /// Table lookup failed
    #[error("table not found: '{0}'")]
    TableNotFound(String),

    /// Table name already in use
    #[error("table already exists: '{0}'")]
    TableExists(String),

    /// Column lookup failed
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// Bare name matched neither a sheet nor a table
    #[error("no sheet or table named '{0}'")]
    ObjectNotFound(String),

    /// Name violates naming rules
    #[error("invalid name: '{0}'")]
    InvalidName(String),

    /// Decoded structure violates an invariant
    #[error("corrupt workbook: {0}")]
    Corrupt(String),
}
