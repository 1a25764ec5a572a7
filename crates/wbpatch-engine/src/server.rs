//! Line-delimited JSON server
//!
//! Reads one request object per line and writes one response object per
//! line, in order:
//!
//! ```text
//! -> {"id": 1, "command": "cell.get", "args": {"file": "book.json", "ref": "Data!B2"}}
//! <- {"id": 1, "ok": true, "result": {"kind": "cell", "data": {"value": 4, "format": null}}}
//! ```
//!
//! Decoded documents are cached per path and reused while the file's
//! fingerprint is unchanged, so a long-lived session sees edits made by
//! other processes. Writes go through the engine's transactional path.

use crate::context::DocumentHandle;
use crate::engine::Engine;
use crate::envelope::ErrorEntry;
use crate::error::{EngineError, ErrorCode};
use crate::fsio;
use crate::inspect;
use crate::ops::OperationError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span};
use wbpatch_artifact::{CellRange, CellValue, Fingerprint, Locator};
use wbpatch_plan::Operation;

/// One request line
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    /// Echoed back unchanged
    #[serde(default)]
    pub id: Json,
    pub command: String,
    #[serde(default)]
    pub args: Json,
}

/// One response line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Json,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEntry>,
}

impl Response {
    fn success(id: Json, result: Json) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Json, error: ErrorEntry) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Session state for one connection
#[derive(Debug)]
pub struct StdioServer<'e> {
    engine: &'e Engine,
    documents: HashMap<PathBuf, DocumentHandle>,
}

impl<'e> StdioServer<'e> {
    #[must_use]
    pub fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            documents: HashMap::new(),
        }
    }

    /// Serve until `input` is exhausted; returns the number of requests
    /// answered
    ///
    /// # Errors
    /// Returns error only when reading input or writing output fails
    pub fn serve<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> std::io::Result<usize> {
        info!("server started");
        let mut answered = 0usize;
        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Request>(line) {
                Ok(request) => self.handle(request),
                Err(e) => Response::failure(
                    Json::Null,
                    ErrorEntry::new(ErrorCode::InvalidRequest, format!("invalid JSON request: {e}")),
                ),
            };
            serde_json::to_writer(&mut output, &response)?;
            output.write_all(b"\n")?;
            output.flush()?;
            answered += 1;
        }
        self.documents.clear();
        info!(answered, "server stopped");
        Ok(answered)
    }

    /// Answer one request
    pub fn handle(&mut self, request: Request) -> Response {
        let span = info_span!("request", command = %request.command);
        let _entered = span.enter();
        match self.dispatch(&request.command, &request.args) {
            Ok(result) => Response::success(request.id, result),
            Err(error) => {
                debug!(code = %error.code, message = %error.message, "request failed");
                Response::failure(request.id, error)
            }
        }
    }

    fn dispatch(&mut self, command: &str, args: &Json) -> Result<Json, ErrorEntry> {
        if command == "close" {
            self.documents.clear();
            return Ok(json!("closed"));
        }
        let file = PathBuf::from(string_arg(args, "file")?);
        match command {
            "fingerprint" => {
                let fingerprint = self.engine.fingerprint(&file).map_err(entry)?;
                Ok(json!({ "fingerprint": fingerprint.to_string() }))
            }
            "wb.inspect" => {
                let format = self.engine.adapter().format_id();
                to_json(&inspect::inspect(self.document(&file)?, format))
            }
            "sheet.ls" => to_json(&inspect::list_sheets(&self.document(&file)?.workbook)),
            "table.ls" => {
                let sheet = args.get("sheet").and_then(Json::as_str);
                let tables = inspect::list_tables(&self.document(&file)?.workbook, sheet)
                    .ok_or_else(|| {
                        ErrorEntry::new(
                            ErrorCode::SheetNotFound,
                            format!("sheet not found: '{}'", sheet.unwrap_or_default()),
                        )
                    })?;
                to_json(&tables)
            }
            "validate.workbook" => to_json(&inspect::hygiene(&self.document(&file)?.workbook)),
            "cell.get" => {
                let reference = string_arg(args, "ref")?;
                let locator = Locator::parse(reference)
                    .map_err(|e| ErrorEntry::new(ErrorCode::RangeInvalid, e.to_string()))?;
                let value = self
                    .document(&file)?
                    .workbook
                    .read(&locator)
                    .map_err(|e| {
                        let code = OperationError::from(e.clone()).code();
                        ErrorEntry::new(code, e.to_string())
                    })?;
                to_json(&value)
            }
            "cell.set" => {
                let operation = cell_set_operation(args)?;
                let dry_run = args.get("dry_run").and_then(Json::as_bool).unwrap_or(false);
                let outcome = self
                    .engine
                    .mutate(&file, operation, dry_run)
                    .map_err(|e| ErrorEntry::from(&e))?;
                if !dry_run {
                    self.documents.remove(&file);
                }
                to_json(&outcome)
            }
            other => Err(ErrorEntry::new(
                ErrorCode::Unsupported,
                format!("unknown command: '{other}'"),
            )),
        }
    }

    /// Cached handle for `path`, reloaded when the file's bytes changed
    fn document(&mut self, path: &Path) -> Result<&DocumentHandle, ErrorEntry> {
        let bytes = fsio::read_bytes(path).map_err(entry)?;
        let fresh = self
            .documents
            .get(path)
            .is_some_and(|h| h.fingerprint == Fingerprint::compute(&bytes));
        if !fresh {
            debug!(path = %path.display(), "loading document");
            let handle = DocumentHandle::from_bytes(self.engine.adapter(), path, &bytes)
                .map_err(entry)?;
            self.documents.insert(path.to_path_buf(), handle);
        }
        self.documents
            .get(path)
            .ok_or_else(|| ErrorEntry::new(ErrorCode::Internal, "document cache miss"))
    }
}

/// `cell.set` arguments as a single-cell write
fn cell_set_operation(args: &Json) -> Result<Operation, ErrorEntry> {
    let reference = string_arg(args, "ref")?;
    let Ok(Locator::Cell { sheet, addr }) = Locator::parse(reference) else {
        return Err(ErrorEntry::new(
            ErrorCode::RangeInvalid,
            format!("'{reference}' is not a Sheet!A1 cell reference"),
        ));
    };
    let value = args.get("value").map_or(Ok(None), |v| match v {
        Json::Null | Json::Bool(_) | Json::Number(_) | Json::String(_) => Ok(CellValue::from_json(v)),
        _ => serde_json::from_value::<CellValue>(v.clone())
            .map(Some)
            .map_err(|e| ErrorEntry::new(ErrorCode::InvalidRequest, format!("bad value: {e}"))),
    })?;
    Ok(Operation::SetCellRange {
        sheet,
        range: CellRange::single(addr),
        values: vec![vec![value]],
        force_overwrite_formulas: args
            .get("force_overwrite_formulas")
            .and_then(Json::as_bool)
            .unwrap_or(false),
    })
}

fn string_arg<'a>(args: &'a Json, name: &str) -> Result<&'a str, ErrorEntry> {
    args.get(name).and_then(Json::as_str).ok_or_else(|| {
        ErrorEntry::new(ErrorCode::InvalidRequest, format!("missing '{name}' in args"))
    })
}

fn entry(e: EngineError) -> ErrorEntry {
    ErrorEntry::from(&e)
}

fn to_json<T: Serialize>(value: &T) -> Result<Json, ErrorEntry> {
    serde_json::to_value(value).map_err(|e| ErrorEntry::new(ErrorCode::Internal, e.to_string()))
}
