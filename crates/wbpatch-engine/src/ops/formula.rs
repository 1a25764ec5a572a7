//! A1 reference shifting for formula fill
//!
//! `=B2*C2` filled one row down becomes `=B3*C3`. References are matched as
//! `$?[A-Z]{1,3}$?[0-9]+` not preceded by a letter, digit or `_` and not
//! followed by a letter, digit, `_` or `(` (so `LOG10(` stays a function).
//! `$`-anchored axes are left alone. Text inside double-quoted literals and
//! single-quoted sheet names is copied verbatim.
//!
//! [`sheet_references`] lists the sheets a formula names with `Sheet!` or
//! `'Sheet name'!` prefixes.

use wbpatch_artifact::{column_index, column_letters, MAX_COLUMN, MAX_ROW};

/// Shift every relative reference in `formula` by `rows` and `cols`,
/// clamping at the first row and column
#[must_use]
pub fn shift_references(formula: &str, rows: i64, cols: i64) -> String {
    if rows == 0 && cols == 0 {
        return formula.to_string();
    }
    let chars: Vec<char> = formula.chars().collect();
    let mut out = String::with_capacity(formula.len() + 4);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            out.push(c);
            i += 1;
            continue;
        }
        let boundary = i == 0 || !is_word(chars[i - 1]);
        if boundary {
            if let Some((reference, len)) = match_reference(&chars[i..]) {
                out.push_str(&reference.shifted(rows, cols));
                i += len;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Sheet names referenced by `formula`, in order of appearance, without
/// duplicates
#[must_use]
pub fn sheet_references(formula: &str) -> Vec<String> {
    let chars: Vec<char> = formula.chars().collect();
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !names.contains(&name) {
            names.push(name);
        }
    };
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    i += 1;
                }
                i += 1;
            }
            '\'' => {
                let mut name = String::new();
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\'' {
                        if chars.get(i + 1) == Some(&'\'') {
                            name.push('\'');
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    name.push(chars[i]);
                    i += 1;
                }
                i += 1;
                if chars.get(i) == Some(&'!') {
                    push(name);
                }
            }
            c if is_word(c) && (i == 0 || !is_word(chars[i - 1])) => {
                let start = i;
                while i < chars.len() && (is_word(chars[i]) || chars[i] == '.') {
                    i += 1;
                }
                if chars.get(i) == Some(&'!') {
                    push(chars[start..i].iter().collect());
                }
            }
            _ => i += 1,
        }
    }
    names
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Reference {
    col_abs: bool,
    col: u32,
    row_abs: bool,
    row: i64,
}

impl Reference {
    fn shifted(&self, rows: i64, cols: i64) -> String {
        let col = if self.col_abs {
            self.col
        } else {
            let shifted = (i64::from(self.col) + cols).clamp(1, i64::from(MAX_COLUMN));
            u32::try_from(shifted).unwrap_or(1)
        };
        let row = if self.row_abs {
            self.row
        } else {
            (self.row + rows).clamp(1, i64::from(MAX_ROW))
        };
        format!(
            "{}{}{}{}",
            if self.col_abs { "$" } else { "" },
            column_letters(col),
            if self.row_abs { "$" } else { "" },
            row
        )
    }
}

/// Match a reference at the start of `chars`, returning it and its length
fn match_reference(chars: &[char]) -> Option<(Reference, usize)> {
    let mut i = 0;
    let col_abs = chars.first() == Some(&'$');
    if col_abs {
        i += 1;
    }
    let letters_start = i;
    while i < chars.len() && i - letters_start < 3 && chars[i].is_ascii_uppercase() {
        i += 1;
    }
    if i == letters_start {
        return None;
    }
    let letters: String = chars[letters_start..i].iter().collect();

    let row_abs = chars.get(i) == Some(&'$');
    if row_abs {
        i += 1;
    }
    let digits_start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    if chars.get(i).is_some_and(|c| is_word(*c) || *c == '(') {
        return None;
    }

    let digits: String = chars[digits_start..i].iter().collect();
    let col = column_index(&letters)?;
    let row = digits.parse::<i64>().ok()?;
    Some((
        Reference {
            col_abs,
            col,
            row_abs,
            row,
        },
        i,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts_relative_rows() {
        assert_eq!(shift_references("=B2-C2", 1, 0), "=B3-C3");
        assert_eq!(shift_references("=SUM(A1:A3)", 2, 0), "=SUM(A3:A5)");
    }

    #[test]
    fn shifts_columns() {
        assert_eq!(shift_references("=A1*2", 0, 2), "=C1*2");
        assert_eq!(shift_references("=Z1", 0, 1), "=AA1");
    }

    #[test]
    fn absolute_axes_are_fixed() {
        assert_eq!(shift_references("=$B$2+B2", 3, 1), "=$B$2+C5");
        assert_eq!(shift_references("=$A1+A$1", 1, 1), "=$A2+B$1");
    }

    #[test]
    fn literals_and_functions_untouched() {
        assert_eq!(shift_references("=\"A1\"&A1", 1, 0), "=\"A1\"&A2");
        assert_eq!(shift_references("=LOG10(A1)", 1, 0), "=LOG10(A2)");
        assert_eq!(shift_references("='Q1'!A1", 1, 0), "='Q1'!A2");
        assert_eq!(shift_references("=[@Revenue]-[@Cost]", 4, 0), "=[@Revenue]-[@Cost]");
    }

    #[test]
    fn cross_sheet_refs_shift() {
        assert_eq!(shift_references("=Data!B2", 1, 0), "=Data!B3");
    }

    #[test]
    fn clamps_at_origin() {
        assert_eq!(shift_references("=A2", -5, -5), "=A1");
    }

    #[test]
    fn zero_shift_is_identity() {
        assert_eq!(shift_references("=weird(A1", 0, 0), "=weird(A1");
    }

    #[test]
    fn lowercase_and_long_names_are_not_refs() {
        assert_eq!(shift_references("=abc1+ABCD1", 1, 0), "=abc1+ABCD1");
    }

    #[test]
    fn lists_referenced_sheets() {
        assert_eq!(
            sheet_references("=Data!B2+'Q1 Sales'!C3*Data!A1"),
            vec!["Data".to_string(), "Q1 Sales".to_string()]
        );
        assert_eq!(sheet_references("=\"Other!A1\"&B2"), Vec::<String>::new());
        assert_eq!(sheet_references("='It''s'!A1"), vec!["It's".to_string()]);
    }
}
