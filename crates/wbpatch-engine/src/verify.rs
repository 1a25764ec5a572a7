//! Post-apply assertions
//!
//! Assertions are plain JSON objects tagged by `kind`. They are evaluated
//! independently; a malformed or unknown assertion yields a failed entry with
//! an error code rather than stopping the run or passing silently.

use crate::config::ConfigError;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use wbpatch_artifact::{CellValue, Locator, ValueType, Workbook};

/// Kinds understood by [`verify`]
pub const ASSERTION_KINDS: &[&str] = &[
    "object_exists",
    "column_exists",
    "row_count",
    "cell_value_equals",
    "cell_not_empty",
    "cell_value_type",
];

/// Typed assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    /// Sheet or table with this name exists
    ObjectExists { name: String },
    /// Table has the column
    ColumnExists { table: String, column: String },
    /// Data rows of a table, header excluded
    RowCount {
        table: String,
        #[serde(default, alias = "expected")]
        exact: Option<u64>,
        #[serde(default)]
        min: Option<u64>,
        #[serde(default)]
        max: Option<u64>,
    },
    /// Cell shows `expected`
    CellValueEquals {
        #[serde(rename = "ref")]
        reference: String,
        expected: Json,
    },
    /// Cell holds something
    CellNotEmpty {
        #[serde(rename = "ref")]
        reference: String,
    },
    /// Cell has the given coarse type
    CellValueType {
        #[serde(rename = "ref")]
        reference: String,
        expected_type: ValueType,
    },
}

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionResult {
    /// The assertion as given
    pub assertion: Json,
    pub passed: bool,
    pub expected: Json,
    pub actual: Json,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

/// All results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub all_passed: bool,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<AssertionResult>,
}

/// Evaluate every assertion against `workbook`
#[must_use]
pub fn verify(assertions: &[Json], workbook: &Workbook) -> VerifyReport {
    let results: Vec<AssertionResult> = assertions.iter().map(|a| check(a, workbook)).collect();
    let passed = results.iter().filter(|r| r.passed).count();
    VerifyReport {
        all_passed: passed == results.len(),
        passed,
        failed: results.len() - passed,
        results,
    }
}

/// Parse an assertions document: a list, or an object with an `assertions`
/// list. YAML or JSON.
///
/// # Errors
/// Returns error if the text is malformed or has neither shape
pub fn parse_assertions(text: &str) -> Result<Vec<Json>, ConfigError> {
    let doc: Json = serde_yaml::from_str(text)?;
    match doc {
        Json::Array(items) => Ok(items),
        Json::Object(mut map) => match map.remove("assertions") {
            Some(Json::Array(items)) => Ok(items),
            _ => Err(ConfigError::Invalid("expected an 'assertions' list".into())),
        },
        _ => Err(ConfigError::Invalid("expected a list of assertions".into())),
    }
}

fn check(raw: &Json, workbook: &Workbook) -> AssertionResult {
    let kind = raw.get("kind").and_then(Json::as_str).unwrap_or_default();
    if !ASSERTION_KINDS.contains(&kind) {
        return failed(
            raw,
            format!("unknown assertion kind '{kind}'"),
            ErrorCode::UnknownAssertion,
        );
    }
    match serde_json::from_value::<Assertion>(raw.clone()) {
        Ok(assertion) => {
            let (passed, expected, actual, message) = evaluate(&assertion, workbook);
            AssertionResult {
                assertion: raw.clone(),
                passed,
                expected,
                actual,
                message,
                error: None,
            }
        }
        Err(e) => failed(
            raw,
            format!("malformed {kind} assertion: {e}"),
            ErrorCode::ValidationFailed,
        ),
    }
}

fn failed(raw: &Json, message: String, code: ErrorCode) -> AssertionResult {
    AssertionResult {
        assertion: raw.clone(),
        passed: false,
        expected: Json::Null,
        actual: Json::Null,
        message,
        error: Some(code),
    }
}

type Evaluation = (bool, Json, Json, String);

fn evaluate(assertion: &Assertion, workbook: &Workbook) -> Evaluation {
    match assertion {
        Assertion::ObjectExists { name } => {
            let found = if workbook.has_sheet(name) {
                Some("sheet")
            } else if workbook.find_table(name).is_some() {
                Some("table")
            } else {
                None
            };
            let message = match found {
                Some(what) => format!("{what} '{name}' exists"),
                None => format!("no sheet or table named '{name}'"),
            };
            (found.is_some(), json!(name), json!(found), message)
        }
        Assertion::ColumnExists { table, column } => match workbook.find_table(table) {
            None => (false, json!(column), Json::Null, format!("table '{table}' not found")),
            Some((_, t)) => {
                let found = t.column_position(column).is_some();
                let message = format!(
                    "column '{column}' {} in table '{table}'",
                    if found { "exists" } else { "not found" }
                );
                (found, json!(column), json!(t.columns()), message)
            }
        },
        Assertion::RowCount {
            table,
            exact,
            min,
            max,
        } => {
            let Some((_, t)) = workbook.find_table(table) else {
                return (false, Json::Null, Json::Null, format!("table '{table}' not found"));
            };
            let actual = u64::from(t.data_rows());
            let passed = exact.map_or(true, |e| actual == e)
                && min.map_or(true, |m| actual >= m)
                && max.map_or(true, |m| actual <= m);
            let expected = json!({ "exact": exact, "min": min, "max": max });
            let message = format!("table '{table}' has {actual} data row(s)");
            (passed, expected, json!(actual), message)
        }
        Assertion::CellValueEquals {
            reference,
            expected,
        } => match cell(workbook, reference) {
            Err(message) => (false, expected.clone(), Json::Null, message),
            Ok(value) => {
                let shown = value.as_ref().and_then(CellValue::effective);
                let passed = matches(shown, expected);
                let actual = shown.map_or(Json::Null, CellValue::to_json);
                let message = if passed {
                    format!("{reference} matches")
                } else {
                    format!("{reference}: expected {expected}, got {actual}")
                };
                (passed, expected.clone(), actual, message)
            }
        },
        Assertion::CellNotEmpty { reference } => match cell(workbook, reference) {
            Err(message) => (false, json!("not empty"), Json::Null, message),
            Ok(value) => {
                let passed = value.is_some();
                let actual = value.as_ref().map_or(Json::Null, CellValue::to_json);
                let state = if passed { "not empty" } else { "empty" };
                (passed, json!("not empty"), actual, format!("{reference} is {state}"))
            }
        },
        Assertion::CellValueType {
            reference,
            expected_type,
        } => match cell(workbook, reference) {
            Err(message) => (false, json!(expected_type), Json::Null, message),
            Ok(value) => {
                let actual = ValueType::of(value.as_ref());
                let passed = actual == *expected_type;
                let message = format!("{reference} is {actual}");
                (passed, json!(expected_type), json!(actual), message)
            }
        },
    }
}

fn cell(workbook: &Workbook, reference: &str) -> Result<Option<CellValue>, String> {
    match Locator::parse(reference).map_err(|e| e.to_string())? {
        Locator::Cell { sheet, addr } => workbook
            .sheet(&sheet)
            .map(|s| s.value(addr).cloned())
            .ok_or_else(|| format!("sheet '{sheet}' not found")),
        _ => Err(format!("'{reference}' is not a single cell reference")),
    }
}

/// Numbers compare numerically, everything else by string form
fn matches(actual: Option<&CellValue>, expected: &Json) -> bool {
    match (actual, expected) {
        (None, Json::Null) => true,
        (None, _) | (Some(_), Json::Null) => false,
        (Some(value), Json::Number(n)) => match (value.as_number(), n.as_f64()) {
            (Some(a), Some(e)) => (a - e).abs() < f64::EPSILON * a.abs().max(1.0),
            _ => value.to_string() == n.to_string(),
        },
        (Some(CellValue::Bool(a)), Json::Bool(e)) => a == e,
        (Some(value), Json::String(s)) => value.to_string() == *s,
        (Some(value), other) => value.to_string() == other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbpatch_artifact::Table;

    fn book() -> Workbook {
        let mut wb = Workbook::new().with_sheet("Data");
        let s = wb.sheet_mut("Data").unwrap();
        s.set_value("A1".parse().unwrap(), Some(CellValue::from("Qty")));
        s.set_value("A2".parse().unwrap(), Some(CellValue::from(5)));
        s.set_value("A3".parse().unwrap(), Some(CellValue::from(7)));
        s.set_value(
            "B2".parse().unwrap(),
            Some(CellValue::Formula {
                formula: "=A2*2".into(),
                cached: Some(Box::new(CellValue::from(10))),
            }),
        );
        s.push_table(Table::new("T", "A1:A3".parse().unwrap(), vec!["Qty".into()]));
        wb
    }

    fn one(assertion: Json) -> AssertionResult {
        verify(&[assertion], &book()).results.remove(0)
    }

    #[test]
    fn structural_assertions() {
        assert!(one(json!({"kind": "object_exists", "name": "T"})).passed);
        assert!(!one(json!({"kind": "object_exists", "name": "Nope"})).passed);
        assert!(one(json!({"kind": "column_exists", "table": "T", "column": "Qty"})).passed);
        assert!(!one(json!({"kind": "column_exists", "table": "T", "column": "X"})).passed);
    }

    #[test]
    fn row_count_excludes_header() {
        let r = one(json!({"kind": "row_count", "table": "T", "exact": 2}));
        assert!(r.passed);
        assert_eq!(r.actual, json!(2));
        assert!(one(json!({"kind": "row_count", "table": "T", "min": 1, "max": 2})).passed);
        assert!(!one(json!({"kind": "row_count", "table": "T", "min": 3})).passed);
    }

    #[test]
    fn cell_assertions() {
        assert!(one(json!({"kind": "cell_value_equals", "ref": "Data!A2", "expected": 5})).passed);
        assert!(one(json!({"kind": "cell_value_equals", "ref": "Data!A1", "expected": "Qty"})).passed);
        assert!(one(json!({"kind": "cell_value_equals", "ref": "Data!B2", "expected": 10})).passed);
        assert!(one(json!({"kind": "cell_not_empty", "ref": "Data!A3"})).passed);
        assert!(!one(json!({"kind": "cell_not_empty", "ref": "Data!Z9"})).passed);
        assert!(one(json!({"kind": "cell_value_type", "ref": "Data!B2", "expected_type": "formula"})).passed);
        assert!(one(json!({"kind": "cell_value_type", "ref": "Data!C9", "expected_type": "empty"})).passed);
    }

    #[test]
    fn unknown_kind_is_never_a_pass() {
        let r = one(json!({"kind": "cell_is_pretty", "ref": "Data!A1"}));
        assert!(!r.passed);
        assert_eq!(r.error, Some(ErrorCode::UnknownAssertion));

        let r = one(json!({"kind": "row_count"}));
        assert_eq!(r.error, Some(ErrorCode::ValidationFailed));
    }

    #[test]
    fn report_is_conjunction() {
        let report = verify(
            &[
                json!({"kind": "object_exists", "name": "Data"}),
                json!({"kind": "object_exists", "name": "Gone"}),
            ],
            &book(),
        );
        assert!(!report.all_passed);
        assert_eq!((report.passed, report.failed), (1, 1));
        assert!(verify(&[], &book()).all_passed);
    }

    #[test]
    fn parses_list_or_wrapped_yaml() {
        let bare = parse_assertions("- kind: cell_not_empty\n  ref: Data!A1\n").unwrap();
        let wrapped = parse_assertions(r#"{"assertions": [{"kind": "object_exists", "name": "T"}]}"#).unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(wrapped.len(), 1);
        assert!(parse_assertions("42").is_err());
    }
}
