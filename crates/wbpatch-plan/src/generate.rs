//! Plan generators
//!
//! One step per common edit. Each step adds its operation together with the
//! structural conditions a reviewer would expect, so a generated plan fails
//! at validation rather than halfway through an apply.

use crate::builder::PlanBuilder;
use crate::condition::{Condition, ConditionKind};
use crate::operation::{NumberStyle, Operation};
use wbpatch_artifact::{split_table_column, CellAddr, CellRange, CellValue};

impl PlanBuilder {
    /// Add a column to `table`
    ///
    /// Requires the table to exist and the column to be absent; the column
    /// must exist afterwards.
    #[must_use]
    pub fn add_column_step(
        self,
        table: &str,
        name: &str,
        formula: Option<String>,
        default_value: Option<CellValue>,
    ) -> Self {
        let column = format!("{table}[{name}]");
        self.precondition_once(Condition::new(ConditionKind::ObjectExists, table))
            .precondition_once(Condition::new(ConditionKind::ColumnAbsent, column.as_str()))
            .operation(Operation::AddColumn {
                table: table.to_string(),
                name: name.to_string(),
                formula,
                default_value,
            })
            .postcondition_once(Condition::new(ConditionKind::ColumnExists, column))
    }

    /// Set one cell on `sheet`, which must exist
    #[must_use]
    pub fn set_cell_step(self, sheet: &str, addr: CellAddr, value: Option<CellValue>) -> Self {
        self.set_cells_step(sheet, CellRange::single(addr), vec![vec![value]])
    }

    /// Set a rectangular block on `sheet`, which must exist
    ///
    /// `values` is row-major and must match the shape of `range`; a mismatch
    /// is reported when the plan is built.
    #[must_use]
    pub fn set_cells_step(
        self,
        sheet: &str,
        range: CellRange,
        values: Vec<Vec<Option<CellValue>>>,
    ) -> Self {
        self.precondition_once(Condition::new(ConditionKind::SheetExists, sheet))
            .operation(Operation::SetCellRange {
                sheet: sheet.to_string(),
                range,
                values,
                force_overwrite_formulas: false,
            })
    }

    /// Apply a number format to `target` (`Sheet!A1:B9` or `Table[Column]`)
    ///
    /// Range targets must be valid before the plan runs. Column targets get
    /// no precondition: the column may be added by an earlier step.
    #[must_use]
    pub fn format_step(self, target: &str, style: NumberStyle, decimals: u8) -> Self {
        let builder = if split_table_column(target).is_some() {
            self
        } else {
            self.precondition_once(Condition::new(ConditionKind::RangeValid, target))
        };
        builder.operation(Operation::FormatRange {
            target: target.to_string(),
            style,
            decimals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::plan::PatchPlan;
    use wbpatch_artifact::Fingerprint;

    fn base() -> PlanBuilder {
        PlanBuilder::for_target("book.json", Fingerprint::compute(b"base"))
    }

    fn kinds(plan: &PatchPlan) -> Vec<OperationKind> {
        plan.operations().iter().map(|o| o.operation.kind()).collect()
    }

    #[test]
    fn add_column_step_guards_both_sides() {
        let plan = base()
            .add_column_step("Sales", "Margin", Some("=C2-D2".into()), None)
            .build()
            .unwrap();
        let pre: Vec<_> = plan.preconditions().iter().map(Condition::key).collect();
        assert_eq!(
            pre,
            vec![
                (ConditionKind::ObjectExists, "Sales"),
                (ConditionKind::ColumnAbsent, "Sales[Margin]"),
            ]
        );
        assert_eq!(plan.postconditions()[0].key(), (ConditionKind::ColumnExists, "Sales[Margin]"));
    }

    #[test]
    fn steps_share_conditions_without_repeating_them() {
        let plan = base()
            .add_column_step("Sales", "Margin", Some("=C2-D2".into()), None)
            .add_column_step("Sales", "Share", None, Some(CellValue::from(0)))
            .format_step("Sales[Margin]", NumberStyle::Currency, 2)
            .build()
            .unwrap();
        assert_eq!(
            kinds(&plan),
            vec![OperationKind::AddColumn, OperationKind::AddColumn, OperationKind::FormatRange]
        );
        let table_checks = plan
            .preconditions()
            .iter()
            .filter(|c| c.key() == (ConditionKind::ObjectExists, "Sales"))
            .count();
        assert_eq!(table_checks, 1);
        assert_eq!(plan.preconditions().len(), 3);
    }

    #[test]
    fn format_step_guards_ranges_only() {
        let plan = base()
            .format_step("Data!B2:B9", NumberStyle::Percent, 1)
            .format_step("Sales[Amount]", NumberStyle::Number, 0)
            .build()
            .unwrap();
        assert_eq!(plan.preconditions().len(), 1);
        assert_eq!(plan.preconditions()[0].kind, ConditionKind::RangeValid);
    }

    #[test]
    fn set_cell_step_targets_one_cell() {
        let plan = base()
            .set_cell_step("Data", "B2".parse().unwrap(), Some(CellValue::from(7)))
            .build()
            .unwrap();
        match &plan.operations()[0].operation {
            Operation::SetCellRange { range, values, .. } => {
                assert_eq!(range.to_string(), "B2");
                assert_eq!(values, &vec![vec![Some(CellValue::Number(7.0))]]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(plan.preconditions()[0].key(), (ConditionKind::SheetExists, "Data"));
    }

    #[test]
    fn mismatched_block_fails_at_build() {
        let result = base()
            .set_cells_step("Data", "A1:B2".parse().unwrap(), vec![vec![None]])
            .build();
        assert!(result.is_err());
    }
}
