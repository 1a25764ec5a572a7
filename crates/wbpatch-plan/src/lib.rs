//! wbpatch Plan Model
//!
//! Reviewable, single-use change sets against a fingerprinted workbook.
//!
//! # Core Concepts
//!
//! - [`PatchPlan`]: target + base fingerprint + ordered operations
//! - [`Operation`]: closed set of mutation kinds, fields validated at load
//! - [`Condition`]: structural pre/postconditions
//! - [`PlanBuilder`]: fluent construction with generated op ids, plus
//!   generator steps (`add_column_step`, `set_cell_step`, `format_step`)
//! - [`compose`]: merge plans into one transaction
//!
//! # Example
//!
//! ```rust,ignore
//! use wbpatch_plan::{Condition, ConditionKind, Operation, PlanBuilder};
//!
//! let plan = PlanBuilder::for_target("book.json", fingerprint)
//!     .precondition(Condition::new(ConditionKind::ColumnAbsent, "Sales[Margin]"))
//!     .operation(Operation::AddColumn {
//!         table: "Sales".into(),
//!         name: "Margin".into(),
//!         formula: Some("=C2-D2".into()),
//!         default_value: None,
//!     })
//!     .build()?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod builder;
mod compose;
mod condition;
mod generate;
mod operation;
mod plan;

pub use builder::PlanBuilder;
pub use compose::{compose, compose_strict, ComposeError};
pub use condition::{Condition, ConditionKind};
pub use operation::{
    FillMode, NewObject, NumberStyle, ObjectRef, Operation, OperationKind, SchemaMode,
    MAX_DECIMALS,
};
pub use plan::{
    new_op_id, new_plan_id, PatchPlan, PlanError, PlanOptions, PlanTarget, PlannedOperation,
    PLAN_SCHEMA_VERSION,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
