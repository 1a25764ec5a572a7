//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use wbpatch_artifact::ValueType;
use wbpatch_plan::{NumberStyle, SchemaMode};

/// Transactional patch plans for workbooks
#[derive(Debug, Parser)]
#[command(name = "wbpatch", version, about)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) global: GlobalArgs,

    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct GlobalArgs {
    /// Engine config file; defaults to wbpatch.toml beside the document
    #[arg(long, global = true, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Policy file; defaults to the configured one or wbpatch-policy.yaml
    #[arg(long, global = true, value_name = "FILE")]
    pub(crate) policy: Option<PathBuf>,

    /// Seconds to wait for a held lock
    #[arg(long, global = true, value_name = "SECS")]
    pub(crate) wait_lock: Option<u64>,

    /// Never write a backup
    #[arg(long, global = true)]
    pub(crate) no_backup: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub(crate) log_json: bool,

    /// Emit NDJSON lifecycle events on stderr
    #[arg(long, global = true)]
    pub(crate) events: bool,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print the fingerprint of a document
    Fingerprint { path: PathBuf },

    /// Describe a document: sheets, tables, counts and warnings
    Inspect { path: PathBuf },

    /// Check a plan or a document
    #[command(subcommand)]
    Validate(ValidateCommand),

    /// Preview the changes a plan would make
    Simulate {
        plan: PathBuf,
        #[arg(long)]
        target: Option<PathBuf>,
        /// Also print a one-line-per-change preview on stderr
        #[arg(long)]
        text: bool,
    },

    /// Commit a plan
    Apply {
        plan: PathBuf,
        #[arg(long)]
        target: Option<PathBuf>,
    },

    /// Compare two documents
    Diff {
        before: PathBuf,
        after: PathBuf,
        /// Restrict to one sheet
        #[arg(long)]
        sheet: Option<String>,
        /// Also write the diff result to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Evaluate assertions against a document
    Verify {
        path: PathBuf,
        /// YAML or JSON list of assertions
        #[arg(long, short)]
        assertions: PathBuf,
    },

    /// Run a workflow
    Run {
        workflow: PathBuf,
        /// Document to run against instead of the workflow's target
        #[arg(long)]
        target: Option<PathBuf>,
    },

    /// Sheet listings
    #[command(subcommand)]
    Sheet(SheetCommand),

    /// Table listings and direct table edits
    #[command(subcommand)]
    Table(TableCommand),

    /// Single-cell reads and writes
    #[command(subcommand)]
    Cell(CellCommand),

    /// Plan generators and utilities
    #[command(subcommand)]
    Plan(PlanCommand),

    /// Answer line-delimited JSON requests on stdin
    Serve,
}

#[derive(Debug, Subcommand)]
pub(crate) enum ValidateCommand {
    /// Check a plan against its document without executing it
    Plan {
        plan: PathBuf,
        /// Document to check against instead of the plan's target
        #[arg(long)]
        target: Option<PathBuf>,
    },

    /// Report hygiene findings for a document
    Workbook { path: PathBuf },
}

#[derive(Debug, Subcommand)]
pub(crate) enum SheetCommand {
    /// List sheets in workbook order
    Ls { path: PathBuf },
}

/// Flags shared by direct edits
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct EditArgs {
    /// Preview the change without writing
    #[arg(long)]
    pub(crate) dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub(crate) enum TableCommand {
    /// List tables
    Ls {
        path: PathBuf,
        /// Only tables on this sheet
        #[arg(long)]
        sheet: Option<String>,
    },

    /// Add a column to a table
    AddColumn {
        path: PathBuf,
        #[arg(long, short)]
        table: String,
        #[arg(long, short)]
        name: String,
        /// Formula for the first data row, filled down
        #[arg(long, conflicts_with = "default")]
        formula: Option<String>,
        /// Value written into every data row
        #[arg(long)]
        default: Option<String>,
        #[command(flatten)]
        edit: EditArgs,
    },

    /// Append rows to a table
    AppendRows {
        path: PathBuf,
        #[arg(long, short)]
        table: String,
        /// Inline JSON array of row objects
        #[arg(long, required_unless_present = "data_file", conflicts_with = "data_file")]
        data: Option<String>,
        /// File holding a JSON array of row objects
        #[arg(long)]
        data_file: Option<PathBuf>,
        /// strict, allow-missing-null or map-by-header
        #[arg(long, default_value = "strict", value_parser = serde_enum::<SchemaMode>)]
        schema_mode: SchemaMode,
        #[command(flatten)]
        edit: EditArgs,
    },
}

#[derive(Debug, Subcommand)]
pub(crate) enum CellCommand {
    /// Read a cell, range, table column, sheet or table
    Get {
        path: PathBuf,
        /// Locator such as Data!B2, Data!A1:C9 or Sales[Amount]
        #[arg(long = "ref")]
        reference: String,
    },

    /// Write one cell
    Set {
        path: PathBuf,
        /// Cell such as Data!B2
        #[arg(long = "ref")]
        reference: String,
        #[arg(long)]
        value: String,
        /// number, text, bool, date, formula or empty; text starting with
        /// `=` is a formula when omitted
        #[arg(long = "type")]
        value_type: Option<ValueType>,
        /// Allow replacing a formula with a constant
        #[arg(long)]
        force_overwrite_formulas: bool,
        #[command(flatten)]
        edit: EditArgs,
    },
}

/// Where a generated plan goes
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct PlanOutput {
    /// Extend this plan file in place when it exists
    #[arg(long, value_name = "PLAN")]
    pub(crate) append: Option<PathBuf>,
    /// Write the plan here (defaults to the --append file)
    #[arg(long, short)]
    pub(crate) output: Option<PathBuf>,
}

impl PlanOutput {
    /// File the generated plan is written to, if any
    pub(crate) fn destination(&self) -> Option<&Path> {
        self.output.as_deref().or(self.append.as_deref())
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum PlanCommand {
    /// Merge plans against one document into a single plan
    Compose {
        #[arg(required = true, num_args = 1..)]
        plans: Vec<PathBuf>,
        /// Reject plans generated against different fingerprints
        #[arg(long)]
        strict: bool,
        /// Write the merged plan here
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print a plan with an operation summary
    Show { plan: PathBuf },

    /// Plan a new table column
    AddColumn {
        path: PathBuf,
        #[arg(long, short)]
        table: String,
        #[arg(long, short)]
        name: String,
        #[arg(long, conflicts_with = "default")]
        formula: Option<String>,
        #[arg(long)]
        default: Option<String>,
        #[command(flatten)]
        out: PlanOutput,
    },

    /// Plan a single-cell write
    SetCells {
        path: PathBuf,
        #[arg(long = "ref")]
        reference: String,
        #[arg(long)]
        value: String,
        #[arg(long = "type")]
        value_type: Option<ValueType>,
        #[command(flatten)]
        out: PlanOutput,
    },

    /// Plan a number format for a range or table column
    Format {
        path: PathBuf,
        /// Data!B2:B9 or Sales[Amount]
        #[arg(long = "ref")]
        reference: String,
        /// number, percent, currency, date or text
        #[arg(long, default_value = "number", value_parser = serde_enum::<NumberStyle>)]
        style: NumberStyle,
        #[arg(long, default_value_t = 2)]
        decimals: u8,
        #[command(flatten)]
        out: PlanOutput,
    },
}

/// Parse a snake_case (or kebab alias) enum name the way plan files spell it
fn serde_enum<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown value '{s}'"))
}

impl Command {
    /// Name used in the response envelope
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Fingerprint { .. } => "fingerprint",
            Self::Inspect { .. } => "inspect",
            Self::Validate(ValidateCommand::Plan { .. }) => "validate plan",
            Self::Validate(ValidateCommand::Workbook { .. }) => "validate workbook",
            Self::Simulate { .. } => "simulate",
            Self::Apply { .. } => "apply",
            Self::Diff { .. } => "diff",
            Self::Verify { .. } => "verify",
            Self::Run { .. } => "run",
            Self::Sheet(SheetCommand::Ls { .. }) => "sheet ls",
            Self::Table(TableCommand::Ls { .. }) => "table ls",
            Self::Table(TableCommand::AddColumn { .. }) => "table add-column",
            Self::Table(TableCommand::AppendRows { .. }) => "table append-rows",
            Self::Cell(CellCommand::Get { .. }) => "cell get",
            Self::Cell(CellCommand::Set { .. }) => "cell set",
            Self::Plan(PlanCommand::Compose { .. }) => "plan compose",
            Self::Plan(PlanCommand::Show { .. }) => "plan show",
            Self::Plan(PlanCommand::AddColumn { .. }) => "plan add-column",
            Self::Plan(PlanCommand::SetCells { .. }) => "plan set-cells",
            Self::Plan(PlanCommand::Format { .. }) => "plan format",
            Self::Serve => "serve",
        }
    }

    /// Document the command is about, when the args name it
    pub(crate) fn target(&self) -> Option<&Path> {
        match self {
            Self::Fingerprint { path }
            | Self::Inspect { path }
            | Self::Verify { path, .. }
            | Self::Validate(ValidateCommand::Workbook { path })
            | Self::Sheet(SheetCommand::Ls { path })
            | Self::Table(
                TableCommand::Ls { path, .. }
                | TableCommand::AddColumn { path, .. }
                | TableCommand::AppendRows { path, .. },
            )
            | Self::Cell(CellCommand::Get { path, .. } | CellCommand::Set { path, .. })
            | Self::Plan(
                PlanCommand::AddColumn { path, .. }
                | PlanCommand::SetCells { path, .. }
                | PlanCommand::Format { path, .. },
            ) => Some(path.as_path()),
            Self::Validate(ValidateCommand::Plan { target, .. })
            | Self::Simulate { target, .. }
            | Self::Apply { target, .. }
            | Self::Run { target, .. } => target.as_deref(),
            Self::Diff { after, .. } => Some(after.as_path()),
            Self::Plan(PlanCommand::Show { plan }) => Some(plan.as_path()),
            Self::Plan(PlanCommand::Compose { .. }) | Self::Serve => None,
        }
    }
}
