//! Structural condition evaluation

use serde::Serialize;
use wbpatch_artifact::{split_table_column, Locator, Workbook};
use wbpatch_plan::{Condition, ConditionKind};

/// Result of evaluating one [`Condition`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionResult {
    pub kind: ConditionKind,
    pub target: String,
    /// Raw outcome of the check
    pub holds: bool,
    /// Whether the outcome matches the condition's expectation
    pub passed: bool,
    pub message: String,
}

/// Evaluate `condition` against `workbook`
#[must_use]
pub fn evaluate(workbook: &Workbook, condition: &Condition) -> ConditionResult {
    let (holds, detail) = observe(workbook, condition.kind, &condition.target);
    let expected = condition.expected_outcome();
    let passed = holds == expected;
    let message = if passed {
        detail
    } else {
        format!("expected {} to be {expected}: {detail}", condition.kind)
    };
    ConditionResult {
        kind: condition.kind,
        target: condition.target.clone(),
        holds,
        passed,
        message,
    }
}

/// Evaluate several conditions, returning messages of those that failed
#[must_use]
pub fn failures(workbook: &Workbook, conditions: &[Condition]) -> Vec<String> {
    conditions
        .iter()
        .map(|c| evaluate(workbook, c))
        .filter(|r| !r.passed)
        .map(|r| format!("{} '{}': {}", r.kind, r.target, r.message))
        .collect()
}

fn observe(workbook: &Workbook, kind: ConditionKind, target: &str) -> (bool, String) {
    match kind {
        ConditionKind::SheetExists => {
            let exists = workbook.has_sheet(target);
            (exists, presence("sheet", target, exists))
        }
        ConditionKind::ObjectExists => match split_table_column(target) {
            Some((table, column)) => column_check(workbook, table, column, true),
            None => {
                if workbook.has_sheet(target) {
                    (true, format!("sheet '{target}' exists"))
                } else if workbook.find_table(target).is_some() {
                    (true, format!("table '{target}' exists"))
                } else {
                    (false, format!("no sheet or table named '{target}'"))
                }
            }
        },
        ConditionKind::ColumnExists | ConditionKind::ColumnAbsent => {
            let want_present = kind == ConditionKind::ColumnExists;
            match split_table_column(target) {
                Some((table, column)) => column_check(workbook, table, column, want_present),
                None => (false, format!("'{target}' is not a Table[Column] reference")),
            }
        }
        ConditionKind::RangeValid => match Locator::parse(target) {
            Ok(Locator::Range { sheet, .. } | Locator::Cell { sheet, .. }) => {
                let exists = workbook.has_sheet(&sheet);
                (exists, presence("sheet", &sheet, exists))
            }
            Ok(_) => (false, format!("'{target}' is not a Sheet!Range reference")),
            Err(e) => (false, e.to_string()),
        },
    }
}

fn column_check(workbook: &Workbook, table: &str, column: &str, want_present: bool) -> (bool, String) {
    let Some((_, t)) = workbook.find_table(table) else {
        return (false, format!("table '{table}' not found"));
    };
    let present = t.column_position(column).is_some();
    let message = format!(
        "column '{column}' {} in table '{}'",
        if present { "exists" } else { "is absent" },
        t.name()
    );
    (present == want_present, message)
}

fn presence(what: &str, name: &str, exists: bool) -> String {
    if exists {
        format!("{what} '{name}' exists")
    } else {
        format!("{what} '{name}' not found")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wbpatch_artifact::Table;

    fn book() -> Workbook {
        let mut wb = Workbook::new().with_sheet("Data");
        wb.sheet_mut("Data").unwrap().push_table(Table::new(
            "Sales",
            "A1:B2".parse().unwrap(),
            vec!["Region".into(), "Revenue".into()],
        ));
        wb
    }

    fn check(kind: ConditionKind, target: &str) -> ConditionResult {
        evaluate(&book(), &Condition::new(kind, target))
    }

    #[test]
    fn column_presence_and_absence() {
        assert!(check(ConditionKind::ColumnExists, "Sales[Revenue]").passed);
        assert!(!check(ConditionKind::ColumnExists, "Sales[Margin]").passed);
        assert!(check(ConditionKind::ColumnAbsent, "Sales[Margin]").passed);
        assert!(!check(ConditionKind::ColumnAbsent, "Missing[Margin]").passed);
    }

    #[test]
    fn object_and_sheet_exists() {
        assert!(check(ConditionKind::ObjectExists, "Sales").passed);
        assert!(check(ConditionKind::ObjectExists, "Data").passed);
        assert!(!check(ConditionKind::ObjectExists, "Nope").passed);
        assert!(check(ConditionKind::SheetExists, "Data").passed);
        assert!(!check(ConditionKind::SheetExists, "Sales").passed);
    }

    #[test]
    fn range_valid_requires_existing_sheet() {
        assert!(check(ConditionKind::RangeValid, "Data!A1:C9").passed);
        assert!(!check(ConditionKind::RangeValid, "Other!A1:C9").passed);
        assert!(!check(ConditionKind::RangeValid, "Data!A0:C9").passed);
    }

    #[test]
    fn expected_false_inverts() {
        let c = Condition::new(ConditionKind::SheetExists, "Archive").with_expected(json!(false));
        let r = evaluate(&book(), &c);
        assert!(!r.holds);
        assert!(r.passed);
    }

    #[test]
    fn failures_lists_only_failed() {
        let conditions = vec![
            Condition::new(ConditionKind::SheetExists, "Data"),
            Condition::new(ConditionKind::SheetExists, "Gone"),
        ];
        let failed = failures(&book(), &conditions);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("Gone"));
    }
}
