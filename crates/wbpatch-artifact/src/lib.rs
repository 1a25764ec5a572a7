//! wbpatch Artifact Model
//!
//! Content-fingerprinted workbooks and the addressing scheme used to talk
//! about them.
//!
//! # Core Concepts
//!
//! - [`Fingerprint`]: SHA-256 of persisted bytes, the optimistic-concurrency token
//! - [`Workbook`]: in-memory model of sheets, cells and tables
//! - [`Locator`]: `Sheet!A1`, `Sheet!A1:B2`, `Table[Column]` or a bare name
//! - [`DocumentAdapter`]: codec between persisted bytes and the model
//!
//! # Example
//!
//! ```rust,ignore
//! use wbpatch_artifact::{DocumentAdapter, Fingerprint, JsonWorkbookAdapter};
//!
//! let bytes = std::fs::read("book.json")?;
//! let fingerprint = Fingerprint::compute(&bytes);
//! let workbook = JsonWorkbookAdapter.decode(&bytes)?;
//! println!("{fingerprint}: {} sheets", workbook.sheets().len());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod adapter;
mod fingerprint;
mod locator;
mod value;
mod workbook;

pub use adapter::{AdapterError, DocumentAdapter, JsonWorkbookAdapter, JSON_FORMAT_ID};
pub use fingerprint::{Fingerprint, FingerprintError, FINGERPRINT_PREFIX};
pub use locator::{
    column_index, column_letters, qualified, split_table_column, CellAddr, CellRange, Locator,
    LocatorError, MAX_COLUMN, MAX_ROW,
};
pub use value::{CellValue, ValueType};
pub use workbook::{
    validate_sheet_name, validate_table_name, Cell, ReadValue, Sheet, SheetSummary, Table,
    TableSummary, Workbook, WorkbookError,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_encoded_bytes() {
        let adapter = JsonWorkbookAdapter;
        let mut wb = Workbook::new().with_sheet("Data");
        let before = Fingerprint::compute(&adapter.encode(&wb).unwrap());

        wb.sheet_mut("Data")
            .unwrap()
            .set_value("A1".parse().unwrap(), Some(CellValue::Number(1.0)));
        let after = Fingerprint::compute(&adapter.encode(&wb).unwrap());

        assert_ne!(before, after);
        assert_eq!(after.to_string().len(), FINGERPRINT_PREFIX.len() + 64);
    }

    #[test]
    fn locator_reads_through_decoded_model() {
        let adapter = JsonWorkbookAdapter;
        let mut wb = Workbook::new().with_sheet("Data");
        wb.sheet_mut("Data")
            .unwrap()
            .set_value("C3".parse().unwrap(), Some(CellValue::from("hello")));
        let decoded = adapter.decode(&adapter.encode(&wb).unwrap()).unwrap();

        let read = decoded.read(&Locator::parse("Data!C3").unwrap()).unwrap();
        assert_eq!(
            read,
            ReadValue::Cell {
                value: Some(CellValue::Text("hello".into())),
                format: None
            }
        );
    }
}
