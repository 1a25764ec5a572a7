//! Object locators for addressing within workbooks
//!
//! Provides [`CellAddr`], [`CellRange`] and [`Locator`] for the addressing
//! scheme shared by plans, assertions and read queries:
//!
//! - `Sheet!A1` → a single cell
//! - `Sheet!A1:C10` → a rectangular range
//! - `'My Sheet'!B2` → quoted sheet names
//! - `Table[Column]` → a table column
//! - `Name` → a sheet or table by name
//!
//! `$` absolute markers are accepted and ignored.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Largest column index supported (`XFD`)
pub const MAX_COLUMN: u32 = 16_384;

/// Largest row index supported
pub const MAX_ROW: u32 = 1_048_576;

/// One-based cell coordinate
///
/// Ordering is row-major (row, then column), which is the order diffs and
/// range iteration report cells in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellAddr {
    row: u32,
    col: u32,
}

impl CellAddr {
    /// Create a coordinate
    ///
    /// # Errors
    /// Returns error if row or column is zero or out of bounds
    pub fn new(row: u32, col: u32) -> Result<Self, LocatorError> {
        if row == 0 || row > MAX_ROW || col == 0 || col > MAX_COLUMN {
            return Err(LocatorError::OutOfBounds { row, col });
        }
        Ok(Self { row, col })
    }

    /// Row (1-based)
    #[inline]
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.row
    }

    /// Column (1-based)
    #[inline]
    #[must_use]
    pub const fn col(&self) -> u32 {
        self.col
    }

    /// Shift by row and column offsets, clamping at the first row/column
    #[must_use]
    pub fn offset(&self, rows: i64, cols: i64) -> Self {
        let clamp = |v: i64, max: u32| -> u32 {
            u32::try_from(v.clamp(1, i64::from(max))).unwrap_or(1)
        };
        Self {
            row: clamp(i64::from(self.row) + rows, MAX_ROW),
            col: clamp(i64::from(self.col) + cols, MAX_COLUMN),
        }
    }
}

impl Display for CellAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

impl FromStr for CellAddr {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '$').collect();
        let split = cleaned
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| LocatorError::InvalidCell(s.to_string()))?;
        let (letters, digits) = cleaned.split_at(split);
        if letters.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(LocatorError::InvalidCell(s.to_string()));
        }
        let col = column_index(letters).ok_or_else(|| LocatorError::InvalidCell(s.to_string()))?;
        let row: u32 = digits
            .parse()
            .map_err(|_| LocatorError::InvalidCell(s.to_string()))?;
        Self::new(row, col)
    }
}

impl serde::Serialize for CellAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for CellAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Rectangular, normalized cell range (start is top-left)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    start: CellAddr,
    end: CellAddr,
}

impl CellRange {
    /// Create range from two corners in any order
    #[must_use]
    pub fn new(a: CellAddr, b: CellAddr) -> Self {
        Self {
            start: CellAddr {
                row: a.row.min(b.row),
                col: a.col.min(b.col),
            },
            end: CellAddr {
                row: a.row.max(b.row),
                col: a.col.max(b.col),
            },
        }
    }

    /// Single-cell range
    #[inline]
    #[must_use]
    pub fn single(addr: CellAddr) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Top-left corner
    #[inline]
    #[must_use]
    pub const fn start(&self) -> CellAddr {
        self.start
    }

    /// Bottom-right corner
    #[inline]
    #[must_use]
    pub const fn end(&self) -> CellAddr {
        self.end
    }

    /// Number of rows spanned
    #[inline]
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Number of columns spanned
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Total cells in the range
    #[inline]
    #[must_use]
    pub fn cell_count(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    /// Whether the coordinate lies inside the range
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: CellAddr) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }

    /// Whether two ranges share at least one cell
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = CellAddr> + '_ {
        (self.start.row..=self.end.row).flat_map(move |row| {
            (self.start.col..=self.end.col).map(move |col| CellAddr { row, col })
        })
    }

    /// Same range with the bottom edge moved to `row`
    #[must_use]
    pub fn with_end_row(&self, row: u32) -> Self {
        Self::new(
            self.start,
            CellAddr {
                row: row.max(self.start.row),
                col: self.end.col,
            },
        )
    }

    /// Same range with the right edge moved to `col`
    #[must_use]
    pub fn with_end_col(&self, col: u32) -> Self {
        Self::new(
            self.start,
            CellAddr {
                row: self.end.row,
                col: col.max(self.start.col),
            },
        )
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for CellRange {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((a, b)) => {
                let a: CellAddr = a.parse().map_err(|_| LocatorError::InvalidRange(s.to_string()))?;
                let b: CellAddr = b.parse().map_err(|_| LocatorError::InvalidRange(s.to_string()))?;
                Ok(Self::new(a, b))
            }
            None => s
                .parse()
                .map(Self::single)
                .map_err(|_| LocatorError::InvalidRange(s.to_string())),
        }
    }
}

impl serde::Serialize for CellRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for CellRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parsed object locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `Sheet!A1`
    Cell { sheet: String, addr: CellAddr },
    /// `Sheet!A1:B2`
    Range { sheet: String, range: CellRange },
    /// `Table[Column]`
    TableColumn { table: String, column: String },
    /// Bare sheet or table name
    Name(String),
}

impl Locator {
    /// Parse a locator string
    ///
    /// # Errors
    /// Returns error if the string is empty or a cell/range part is malformed
    pub fn parse(s: &str) -> Result<Self, LocatorError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocatorError::Empty);
        }
        if let Some((table, column)) = split_table_column(s) {
            return Ok(Self::TableColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        match s.rsplit_once('!') {
            Some((sheet, reference)) => {
                let sheet = unquote_sheet(sheet);
                if sheet.is_empty() {
                    return Err(LocatorError::Empty);
                }
                if reference.contains(':') {
                    Ok(Self::Range {
                        sheet,
                        range: reference.parse()?,
                    })
                } else {
                    Ok(Self::Cell {
                        sheet,
                        addr: reference.parse()?,
                    })
                }
            }
            None => Ok(Self::Name(s.to_string())),
        }
    }

    /// Sheet named by a cell or range locator
    #[must_use]
    pub fn sheet(&self) -> Option<&str> {
        match self {
            Self::Cell { sheet, .. } | Self::Range { sheet, .. } => Some(sheet),
            Self::TableColumn { .. } | Self::Name(_) => None,
        }
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell { sheet, addr } => write!(f, "{}!{addr}", quote_sheet(sheet)),
            Self::Range { sheet, range } => write!(f, "{}!{range}", quote_sheet(sheet)),
            Self::TableColumn { table, column } => write!(f, "{table}[{column}]"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split `Table[Column]` into its parts
#[must_use]
pub fn split_table_column(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_suffix(']')?;
    let (table, column) = inner.split_once('[')?;
    if table.is_empty() || column.is_empty() || table.contains('!') || column.contains('[') {
        return None;
    }
    Some((table, column))
}

/// Format `sheet!ref` with quoting when the sheet name needs it
#[must_use]
pub fn qualified(sheet: &str, reference: impl Display) -> String {
    format!("{}!{reference}", quote_sheet(sheet))
}

fn quote_sheet(sheet: &str) -> String {
    if sheet.chars().all(|c| c.is_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

fn unquote_sheet(sheet: &str) -> String {
    match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => sheet.to_string(),
    }
}

/// Column number to letters (1 → `A`, 27 → `AA`)
#[must_use]
pub fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push(b'A' + u8::try_from(rem).unwrap_or(0));
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Letters to column number (`A` → 1); case-insensitive
#[must_use]
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (u32::from(c.to_ascii_uppercase()) - u32::from('A') + 1);
    }
    (col <= MAX_COLUMN).then_some(col)
}

/// Errors from locator parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    /// Empty locator string
    #[error("empty locator")]
    Empty,

    /// Malformed cell reference
    #[error("invalid cell reference: '{0}'")]
    InvalidCell(String),

    /// Malformed range reference
    #[error("invalid range reference: '{0}'")]
    InvalidRange(String),

    /// Coordinate outside the grid
    #[error("cell coordinate out of bounds: row {row}, column {col}")]
    OutOfBounds { row: u32, col: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> CellAddr {
        s.parse().unwrap()
    }

    #[test]
    fn column_letters_roundtrip_edges() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(MAX_COLUMN), "XFD");
        assert_eq!(column_index("xfd"), Some(MAX_COLUMN));
        assert_eq!(column_index("XFE"), None);
    }

    #[test]
    fn cell_addr_parse_absolute_markers() {
        let a = addr("$B$12");
        assert_eq!((a.row(), a.col()), (12, 2));
        assert_eq!(a.to_string(), "B12");
    }

    #[test]
    fn cell_addr_rejects_garbage() {
        assert!("12".parse::<CellAddr>().is_err());
        assert!("A".parse::<CellAddr>().is_err());
        assert!("A0".parse::<CellAddr>().is_err());
        assert!("A1B".parse::<CellAddr>().is_err());
    }

    #[test]
    fn cell_addr_ordering_row_major() {
        assert!(addr("Z1") < addr("A2"));
        assert!(addr("A2") < addr("B2"));
    }

    #[test]
    fn range_normalizes_corners() {
        let r: CellRange = "C5:A1".parse().unwrap();
        assert_eq!(r.to_string(), "A1:C5");
        assert_eq!(r.height(), 5);
        assert_eq!(r.width(), 3);
        assert_eq!(r.cell_count(), 15);
    }

    #[test]
    fn range_cells_row_major() {
        let r: CellRange = "A1:B2".parse().unwrap();
        let cells: Vec<String> = r.cells().map(|c| c.to_string()).collect();
        assert_eq!(cells, vec!["A1", "B1", "A2", "B2"]);
    }

    #[test]
    fn range_intersection() {
        let a: CellRange = "A1:C3".parse().unwrap();
        let b: CellRange = "C3:D4".parse().unwrap();
        let c: CellRange = "D1:E2".parse().unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn locator_parse_variants() {
        assert_eq!(
            Locator::parse("Sheet1!B2").unwrap(),
            Locator::Cell {
                sheet: "Sheet1".into(),
                addr: addr("B2")
            }
        );
        assert!(matches!(
            Locator::parse("'Q1 Data'!A1:B3").unwrap(),
            Locator::Range { ref sheet, .. } if sheet == "Q1 Data"
        ));
        assert_eq!(
            Locator::parse("Sales[Margin]").unwrap(),
            Locator::TableColumn {
                table: "Sales".into(),
                column: "Margin".into()
            }
        );
        assert_eq!(Locator::parse("Sales").unwrap(), Locator::Name("Sales".into()));
        assert_eq!(Locator::parse("  "), Err(LocatorError::Empty));
    }

    #[test]
    fn locator_display_quotes_when_needed() {
        let loc = Locator::parse("'Q1 Data'!A1").unwrap();
        assert_eq!(loc.to_string(), "'Q1 Data'!A1");
        assert_eq!(qualified("Sheet1", addr("C3")), "Sheet1!C3");
    }

    #[test]
    fn offset_clamps_at_origin() {
        assert_eq!(addr("B2").offset(-5, 1).to_string(), "C1");
    }
}
