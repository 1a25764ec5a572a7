//! Declarative pre/postconditions

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Structural check evaluated before or after a plan's operations
///
/// `expected`, when present, must equal the boolean outcome of the check;
/// absent means "the check must pass".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,
}

impl Condition {
    /// Condition that must hold
    #[inline]
    #[must_use]
    pub fn new(kind: ConditionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            expected: None,
        }
    }

    /// Attach an explicit expectation
    #[inline]
    #[must_use]
    pub fn with_expected(mut self, expected: serde_json::Value) -> Self {
        self.expected = Some(expected);
        self
    }

    /// De-duplication key
    #[inline]
    #[must_use]
    pub fn key(&self) -> (ConditionKind, &str) {
        (self.kind, self.target.as_str())
    }

    /// Outcome the check must produce to count as passed
    ///
    /// Non-boolean expectations are treated as `true`.
    #[must_use]
    pub fn expected_outcome(&self) -> bool {
        self.expected
            .as_ref()
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

/// Closed set of condition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Target names an existing sheet or table
    ObjectExists,
    /// `Table[Column]` exists
    ColumnExists,
    /// Target names an existing sheet
    SheetExists,
    /// `Sheet!Range` parses and its sheet exists
    RangeValid,
    /// `Table[Column]`'s table exists and the column does not
    ColumnAbsent,
}

impl ConditionKind {
    /// Stable snake_case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectExists => "object_exists",
            Self::ColumnExists => "column_exists",
            Self::SheetExists => "sheet_exists",
            Self::RangeValid => "range_valid",
            Self::ColumnAbsent => "column_absent",
        }
    }
}

impl Display for ConditionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expected_defaults_to_pass() {
        let c = Condition::new(ConditionKind::ColumnExists, "Sales[Margin]");
        assert!(c.expected_outcome());
        assert!(!c.with_expected(json!(false)).expected_outcome());
    }

    #[test]
    fn serde_omits_absent_expected() {
        let c = Condition::new(ConditionKind::SheetExists, "Data");
        assert_eq!(
            serde_json::to_value(&c).unwrap(),
            json!({"kind": "sheet_exists", "target": "Data"})
        );
    }
}
