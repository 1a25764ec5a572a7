//! Loaded documents

use crate::error::{EngineError, EngineResult};
use crate::fsio;
use std::path::{Path, PathBuf};
use wbpatch_artifact::{DocumentAdapter, Fingerprint, Workbook};

/// A decoded document, the fingerprint of the bytes it was decoded from and
/// where it came from
///
/// Read-only outside a transaction; apply and workflows take their own
/// handle under the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentHandle {
    pub path: PathBuf,
    pub workbook: Workbook,
    pub fingerprint: Fingerprint,
}

impl DocumentHandle {
    /// Read, fingerprint and decode `path`
    ///
    /// # Errors
    /// [`EngineError::NotFound`], [`EngineError::Io`] or
    /// [`EngineError::Document`] when the bytes do not decode
    pub fn load(adapter: &dyn DocumentAdapter, path: &Path) -> EngineResult<Self> {
        let bytes = fsio::read_bytes(path)?;
        Self::from_bytes(adapter, path, &bytes)
    }

    /// Fingerprint and decode bytes already read from `path`
    ///
    /// # Errors
    /// [`EngineError::Document`] when the bytes do not decode
    pub fn from_bytes(
        adapter: &dyn DocumentAdapter,
        path: &Path,
        bytes: &[u8],
    ) -> EngineResult<Self> {
        let fingerprint = Fingerprint::compute(bytes);
        let workbook = adapter
            .decode(bytes)
            .map_err(|source| EngineError::Document {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            workbook,
            fingerprint,
        })
    }
}

/// Encode with path context on failure
pub(crate) fn encode(
    adapter: &dyn DocumentAdapter,
    path: &Path,
    workbook: &Workbook,
) -> EngineResult<Vec<u8>> {
    adapter
        .encode(workbook)
        .map_err(|source| EngineError::Document {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbpatch_artifact::JsonWorkbookAdapter;

    #[test]
    fn load_fingerprints_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        let bytes = JsonWorkbookAdapter
            .encode(&Workbook::new().with_sheet("Data"))
            .unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let handle = DocumentHandle::load(&JsonWorkbookAdapter, &path).unwrap();
        assert_eq!(handle.fingerprint, Fingerprint::compute(&bytes));
        assert_eq!(handle.workbook.sheet_names(), vec!["Data"]);
    }

    #[test]
    fn corrupt_bytes_are_document_errors() {
        let err = DocumentHandle::from_bytes(&JsonWorkbookAdapter, Path::new("x.json"), b"{nope")
            .unwrap_err();
        assert_eq!(err.code().as_str(), "ERR_WORKBOOK_CORRUPT");
    }
}
