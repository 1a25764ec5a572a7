//! Document adapters
//!
//! The engine never looks at a persisted format directly. A
//! [`DocumentAdapter`] turns persisted bytes into a [`Workbook`] and back;
//! fingerprints are always taken over the bytes the adapter produces or
//! consumes, never over the decoded model.

use crate::workbook::{Workbook, WorkbookError};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Codec between persisted bytes and the workbook model
///
/// Implementations must be deterministic: encoding the same workbook twice
/// yields identical bytes, so fingerprints after apply are reproducible.
pub trait DocumentAdapter: Send + Sync + Debug {
    /// Stable identifier of the persisted format
    fn format_id(&self) -> &'static str;

    /// Decode persisted bytes
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid document of this format
    fn decode(&self, bytes: &[u8]) -> Result<Workbook, AdapterError>;

    /// Encode a workbook to bytes
    ///
    /// # Errors
    /// Returns error if the workbook cannot be represented in this format
    fn encode(&self, workbook: &Workbook) -> Result<Vec<u8>, AdapterError>;
}

/// Format tag written into JSON workbooks
pub const JSON_FORMAT_ID: &str = "wbpatch.workbook.v1";

/// Reference adapter storing workbooks as pretty-printed JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWorkbookAdapter;

#[derive(Serialize)]
struct JsonDocumentRef<'a> {
    format: &'static str,
    #[serde(flatten)]
    workbook: &'a Workbook,
}

#[derive(Deserialize)]
struct JsonDocument {
    format: String,
    #[serde(flatten)]
    workbook: Workbook,
}

impl DocumentAdapter for JsonWorkbookAdapter {
    fn format_id(&self) -> &'static str {
        JSON_FORMAT_ID
    }

    fn decode(&self, bytes: &[u8]) -> Result<Workbook, AdapterError> {
        let doc: JsonDocument = serde_json::from_slice(bytes)?;
        if doc.format != JSON_FORMAT_ID {
            return Err(AdapterError::UnsupportedFormat {
                expected: JSON_FORMAT_ID,
                actual: doc.format,
            });
        }
        doc.workbook.check_integrity()?;
        Ok(doc.workbook)
    }

    fn encode(&self, workbook: &Workbook) -> Result<Vec<u8>, AdapterError> {
        let doc = JsonDocumentRef {
            format: JSON_FORMAT_ID,
            workbook,
        };
        let mut bytes = serde_json::to_vec_pretty(&doc)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Errors from decoding or encoding documents
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Bytes are not well-formed
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Document declares a different format
    #[error("unsupported document format: expected '{expected}', got '{actual}'")]
    UnsupportedFormat {
        expected: &'static str,
        actual: String,
    },

    /// Decoded structure is inconsistent
    #[error(transparent)]
    Invalid(#[from] WorkbookError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CellValue;
    use pretty_assertions::assert_eq;

    fn sample() -> Workbook {
        let mut wb = Workbook::new().with_sheet("Sheet1");
        let sheet = wb.sheet_mut("Sheet1").unwrap();
        sheet.set_value("A1".parse().unwrap(), Some(CellValue::from("x")));
        sheet.set_value("A2".parse().unwrap(), Some(CellValue::formula("=LEN(A1)")));
        wb
    }

    #[test]
    fn encode_decode_preserves_model() {
        let adapter = JsonWorkbookAdapter;
        let wb = sample();
        let bytes = adapter.encode(&wb).unwrap();
        assert_eq!(adapter.decode(&bytes).unwrap(), wb);
    }

    #[test]
    fn encode_is_deterministic() {
        let adapter = JsonWorkbookAdapter;
        let wb = sample();
        assert_eq!(adapter.encode(&wb).unwrap(), adapter.encode(&wb.clone()).unwrap());
    }

    #[test]
    fn decode_rejects_foreign_format() {
        let err = JsonWorkbookAdapter
            .decode(br#"{"format": "other", "sheets": [{"name": "S"}]}"#)
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedFormat { .. }));
    }

    #[test]
    fn decode_rejects_garbage_and_empty_workbooks() {
        assert!(matches!(
            JsonWorkbookAdapter.decode(b"not json"),
            Err(AdapterError::Malformed(_))
        ));
        let empty = format!(r#"{{"format": "{JSON_FORMAT_ID}", "sheets": []}}"#);
        assert!(matches!(
            JsonWorkbookAdapter.decode(empty.as_bytes()),
            Err(AdapterError::Invalid(WorkbookError::Corrupt(_)))
        ));
    }
}
