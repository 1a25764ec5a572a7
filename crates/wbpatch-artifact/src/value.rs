//! Cell values
//!
//! [`CellValue`] is the stored content of a cell. Formulas keep their text and
//! an optional cached result; the engine never evaluates formulas itself.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt::{self, Display, Formatter};

/// Stored content of a non-empty cell
///
/// Serialized untagged so workbook and plan documents stay readable:
/// `true`, `42.5`, `"text"`, `{"formula": "=A1*2", "cached": 84}`,
/// `{"date": "2024-01-31"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Boolean
    Bool(bool),
    /// Numeric (all numbers are f64)
    Number(f64),
    /// Plain text
    Text(String),
    /// Formula text with last computed value, if known
    Formula {
        /// Formula text including the leading `=`
        formula: String,
        /// Cached result from the last recalculation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cached: Option<Box<CellValue>>,
    },
    /// ISO-8601 date or datetime
    Date {
        /// `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`
        date: String,
    },
}

/// Coarse type of a cell, as reported by reads and type assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Empty,
    Number,
    Text,
    Bool,
    Date,
    Formula,
}

impl ValueType {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Number => "number",
            Self::Text => "text",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Formula => "formula",
        }
    }

    /// Type of an optional cell value
    #[must_use]
    pub fn of(value: Option<&CellValue>) -> Self {
        value.map_or(Self::Empty, CellValue::value_type)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(Self::Empty),
            "number" => Ok(Self::Number),
            "text" | "string" => Ok(Self::Text),
            "bool" | "boolean" => Ok(Self::Bool),
            "date" => Ok(Self::Date),
            "formula" => Ok(Self::Formula),
            other => Err(format!("unknown value type '{other}'")),
        }
    }
}

impl CellValue {
    /// Formula from text, adding the leading `=` if missing
    #[must_use]
    pub fn formula(text: impl Into<String>) -> Self {
        let text = text.into();
        let formula = if text.starts_with('=') {
            text
        } else {
            format!("={text}")
        };
        Self::Formula {
            formula,
            cached: None,
        }
    }

    /// Text values beginning with `=` become formulas
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Text(t) if t.starts_with('=') && t.len() > 1 => Self::Formula {
                formula: t,
                cached: None,
            },
            other => other,
        }
    }

    /// Coarse type
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Number(_) => ValueType::Number,
            Self::Text(_) => ValueType::Text,
            Self::Formula { .. } => ValueType::Formula,
            Self::Date { .. } => ValueType::Date,
        }
    }

    /// Whether this cell holds a formula
    #[inline]
    #[must_use]
    pub const fn is_formula(&self) -> bool {
        matches!(self, Self::Formula { .. })
    }

    /// Formula text, if a formula
    #[must_use]
    pub fn formula_text(&self) -> Option<&str> {
        match self {
            Self::Formula { formula, .. } => Some(formula),
            _ => None,
        }
    }

    /// Value a reader would see: the cached result for formulas
    #[must_use]
    pub fn effective(&self) -> Option<&Self> {
        match self {
            Self::Formula { cached, .. } => cached.as_deref(),
            other => Some(other),
        }
    }

    /// Numeric view, if numeric
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether two stored values are equal for diffing
    ///
    /// Formula cells compare by formula text only; cached results are derived
    /// state and are ignored.
    #[must_use]
    pub fn stored_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Formula { formula: a, .. }, Self::Formula { formula: b, .. }) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// JSON rendering used in change records and diffs
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Self::Text(t) => Json::String(t.clone()),
            Self::Formula { formula, .. } => Json::String(formula.clone()),
            Self::Date { date } => Json::String(date.clone()),
        }
    }

    /// Convert a JSON scalar into a cell value; `null` is empty
    #[must_use]
    pub fn from_json(value: &Json) -> Option<Self> {
        match value {
            Json::Null => None,
            Json::Bool(b) => Some(Self::Bool(*b)),
            Json::Number(n) => n.as_f64().map(Self::Number),
            Json::String(s) => Some(Self::Text(s.clone()).normalized()),
            other => serde_json::from_value(other.clone()).ok(),
        }
    }
}

impl CellValue {
    /// Parse command-line text as a value of type `ty`
    ///
    /// Without a type, text is kept as text and a leading `=` makes it a
    /// formula. `Empty` (or an empty string under any type but `Text`)
    /// clears the cell.
    ///
    /// # Errors
    /// Returns a message when the text does not fit the requested type
    pub fn parse_typed(text: &str, ty: Option<ValueType>) -> Result<Option<Self>, String> {
        let Some(ty) = ty else {
            return Ok((!text.is_empty()).then(|| Self::from(text)));
        };
        if text.is_empty() && ty != ValueType::Text {
            return Ok(None);
        }
        match ty {
            ValueType::Empty => Ok(None),
            ValueType::Text => Ok(Some(Self::Text(text.to_string()))),
            ValueType::Formula => Ok(Some(Self::formula(text))),
            ValueType::Number => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|n| Some(Self::Number(n)))
                .ok_or_else(|| format!("'{text}' is not a number")),
            ValueType::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(Self::Bool(true))),
                "false" | "0" | "no" => Ok(Some(Self::Bool(false))),
                _ => Err(format!("'{text}' is not a boolean")),
            },
            ValueType::Date => {
                if is_iso_date(text) {
                    Ok(Some(Self::Date {
                        date: text.to_string(),
                    }))
                } else {
                    Err(format!("'{text}' is not an ISO-8601 date"))
                }
            }
        }
    }
}

/// `YYYY-MM-DD`, optionally followed by `T` and a time
fn is_iso_date(text: &str) -> bool {
    let b = text.as_bytes();
    let digits = |r: std::ops::Range<usize>| b[r].iter().all(u8::is_ascii_digit);
    b.len() >= 10
        && digits(0..4)
        && b[4] == b'-'
        && digits(5..7)
        && b[7] == b'-'
        && digits(8..10)
        && (b.len() == 10 || b[10] == b'T')
}

impl Display for CellValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{n:.0}")
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Text(t) => f.write_str(t),
            Self::Formula { formula, .. } => f.write_str(formula),
            Self::Date { date } => f.write_str(date),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string()).normalized()
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s).normalized()
    }
}
