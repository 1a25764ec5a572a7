//! Subcommand handlers
//!
//! Each handler returns a finished envelope. Failures that abort a command
//! travel as `anyhow::Error` wrapping an engine error; [`classify`] recovers
//! the stable code from the chain.

use crate::cli::{
    CellCommand, Command, EditArgs, GlobalArgs, PlanCommand, PlanOutput, SheetCommand,
    TableCommand, ValidateCommand,
};
use anyhow::Context;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use wbpatch_artifact::{CellAddr, CellRange, CellValue, Locator, ValueType};
use wbpatch_engine::envelope::ErrorEntry;
use wbpatch_engine::inspect::list_tables;
use wbpatch_engine::{
    fsio, simulate, verify, ApplyError, Engine, EngineConfig, EngineError, ErrorCode,
    EventEmitter, MutationOutcome, Policy, ResponseEnvelope, StdioServer, WorkflowSpec,
};
use wbpatch_plan::{compose, compose_strict, Operation, OperationKind, PatchPlan, PlanBuilder};

/// Run one subcommand
pub(crate) fn execute(global: &GlobalArgs, command: &Command) -> anyhow::Result<ResponseEnvelope> {
    let name = command.name();
    debug!(command = name, "dispatching");
    match command {
        Command::Fingerprint { path } => {
            let fingerprint = Engine::default().fingerprint(path)?;
            Ok(ResponseEnvelope::success(
                name,
                json!({ "path": path, "fingerprint": fingerprint.to_string() }),
            )
            .with_target(display(path)))
        }

        Command::Inspect { path } => {
            let info = engine_for(global, path)?.inspect(path)?;
            Ok(ResponseEnvelope::from_result(name, &info)
                .with_target(display(path))
                .with_warnings(info.warnings.clone()))
        }

        Command::Validate(ValidateCommand::Workbook { path }) => {
            let report = engine_for(global, path)?.hygiene(path)?;
            Ok(ResponseEnvelope::from_result(name, &report).with_target(display(path)))
        }

        Command::Validate(ValidateCommand::Plan { plan, target }) => {
            let plan = load_plan(plan)?;
            let document = target.as_deref().unwrap_or(plan.target_path());
            let report = engine_for(global, document)?.validate(&plan, Some(document))?;
            let mut envelope =
                ResponseEnvelope::from_result(name, &report).with_target(display(document));
            if !report.valid {
                let failed: Vec<_> = report.failures().map(|c| &c.subject).collect();
                envelope = envelope.with_error(ErrorEntry {
                    code: ErrorCode::ValidationFailed,
                    message: format!("{} check(s) failed", report.failed),
                    details: json!({ "failed": failed }),
                });
            }
            Ok(envelope)
        }

        Command::Simulate { plan, target, text } => {
            let plan = load_plan(plan)?;
            let document = target.as_deref().unwrap_or(plan.target_path());
            let report = engine_for(global, document)?.simulate(&plan, Some(document))?;
            if *text {
                eprint!("{}", simulate::render(&report));
            }
            let mut envelope = ResponseEnvelope::from_result(name, &report)
                .with_target(display(document))
                .with_changes(report.changes.clone());
            if report.aborted {
                let code = match &report.failed_op {
                    Some(failed) => failed.code,
                    None if !report.fingerprint_match => ErrorCode::FingerprintConflict,
                    None => ErrorCode::Internal,
                };
                let message = report.abort_reason.clone().unwrap_or_default();
                envelope = envelope.with_error(ErrorEntry {
                    code,
                    message,
                    details: report
                        .failed_op
                        .as_ref()
                        .map_or_else(|| json!({}), |f| f.details.clone()),
                });
            }
            Ok(envelope)
        }

        Command::Apply { plan, target } => {
            let plan = load_plan(plan)?;
            let document = target.as_deref().unwrap_or(plan.target_path());
            let outcome = engine_for(global, document)?.apply(&plan, Some(document))?;
            info!(plan_id = %outcome.plan_id, "plan applied");
            Ok(ResponseEnvelope::from_result(name, &outcome)
                .with_target(display(document))
                .with_changes(outcome.changes.clone())
                .with_warnings(outcome.warnings.clone()))
        }

        Command::Diff {
            before,
            after,
            sheet,
            output,
        } => {
            let result = Engine::default().diff(before, after, sheet.as_deref())?;
            if let Some(output) = output {
                write_json(output, &result.diff)?;
            }
            Ok(ResponseEnvelope::from_result(name, &result).with_target(display(after)))
        }

        Command::Verify { path, assertions } => {
            let text = std::fs::read_to_string(assertions)
                .map_err(|e| EngineError::io(assertions, e))?;
            let assertions = verify::parse_assertions(&text).map_err(EngineError::from)?;
            let report = Engine::default().verify(path, &assertions)?;
            let mut envelope =
                ResponseEnvelope::from_result(name, &report).with_target(display(path));
            if !report.all_passed {
                envelope = envelope.with_error(ErrorEntry::new(
                    ErrorCode::ValidationFailed,
                    format!("{} of {} assertion(s) failed", report.failed, report.results.len()),
                ));
            }
            Ok(envelope)
        }

        Command::Run { workflow, target } => {
            let spec = WorkflowSpec::load(workflow).map_err(EngineError::from)?;
            let document = spec
                .resolve_target(target.as_deref())
                .map_err(EngineError::from)?;
            let report = engine_for(global, &document)?.run_workflow(&spec, &document)?;
            let changes = report
                .results
                .iter()
                .flat_map(|r| r.changes.iter().cloned())
                .collect();
            let mut envelope = ResponseEnvelope::from_result(name, &report)
                .with_target(display(&document))
                .with_changes(changes);
            if let Some(failed) = report.results.iter().find(|r| !r.ok) {
                envelope = envelope.with_error(match &failed.error {
                    Some(e) => ErrorEntry {
                        code: e.code,
                        message: format!("step '{}': {}", failed.step_id, e.message),
                        details: e.details.clone(),
                    },
                    None => ErrorEntry::new(
                        ErrorCode::ValidationFailed,
                        format!("step '{}' did not pass", failed.step_id),
                    ),
                });
            }
            Ok(envelope)
        }

        Command::Sheet(SheetCommand::Ls { path }) => {
            let handle = engine_for(global, path)?.load(path)?;
            let sheets = wbpatch_engine::inspect::list_sheets(&handle.workbook);
            Ok(ResponseEnvelope::from_result(name, &sheets).with_target(display(path)))
        }

        Command::Table(TableCommand::Ls { path, sheet }) => {
            let handle = engine_for(global, path)?.load(path)?;
            let tables = list_tables(&handle.workbook, sheet.as_deref()).ok_or_else(|| {
                EngineError::invalid(
                    ErrorCode::SheetNotFound,
                    format!("sheet not found: '{}'", sheet.as_deref().unwrap_or_default()),
                )
            })?;
            Ok(ResponseEnvelope::from_result(name, &tables).with_target(display(path)))
        }

        Command::Table(TableCommand::AddColumn {
            path,
            table,
            name: column,
            formula,
            default,
            edit,
        }) => {
            let default_value = match default {
                Some(d) => typed_value(d, None)?,
                None => None,
            };
            let operation = Operation::AddColumn {
                table: table.clone(),
                name: column.clone(),
                formula: formula.clone(),
                default_value,
            };
            mutation(global, name, path, operation, edit)
        }

        Command::Table(TableCommand::AppendRows {
            path,
            table,
            data,
            data_file,
            schema_mode,
            edit,
        }) => {
            let text = match (data, data_file) {
                (Some(inline), _) => inline.clone(),
                (None, Some(file)) => {
                    std::fs::read_to_string(file).map_err(|e| EngineError::io(file, e))?
                }
                (None, None) => {
                    return Err(EngineError::invalid(
                        ErrorCode::InvalidRequest,
                        "provide --data or --data-file",
                    )
                    .into())
                }
            };
            let rows = serde_json::from_str(&text).map_err(|e| {
                EngineError::invalid(ErrorCode::InvalidRequest, format!("row data: {e}"))
            })?;
            let operation = Operation::AppendRows {
                table: table.clone(),
                rows,
                schema_mode: *schema_mode,
            };
            mutation(global, name, path, operation, edit)
        }

        Command::Cell(CellCommand::Get { path, reference }) => {
            let locator = Locator::parse(reference)
                .map_err(|e| EngineError::invalid(ErrorCode::RangeInvalid, e.to_string()))?;
            let handle = engine_for(global, path)?.load(path)?;
            let value = handle.workbook.read(&locator).map_err(|e| {
                let code = wbpatch_engine::OperationError::from(e.clone()).code();
                EngineError::invalid(code, e.to_string())
            })?;
            Ok(ResponseEnvelope::success(name, json!({ "ref": reference, "value": value }))
                .with_target(display(path)))
        }

        Command::Cell(CellCommand::Set {
            path,
            reference,
            value,
            value_type,
            force_overwrite_formulas,
            edit,
        }) => {
            let (sheet, addr) = single_cell(reference)?;
            let operation = Operation::SetCellRange {
                sheet,
                range: CellRange::single(addr),
                values: vec![vec![typed_value(value, *value_type)?]],
                force_overwrite_formulas: *force_overwrite_formulas,
            };
            mutation(global, name, path, operation, edit)
        }

        Command::Plan(PlanCommand::AddColumn {
            path,
            table,
            name: column,
            formula,
            default,
            out,
        }) => {
            let default_value = match default {
                Some(d) => typed_value(d, None)?,
                None => None,
            };
            let plan = generate(path, out, |b| {
                b.add_column_step(table, column, formula.clone(), default_value)
            })?;
            generated(name, &plan, out)
        }

        Command::Plan(PlanCommand::SetCells {
            path,
            reference,
            value,
            value_type,
            out,
        }) => {
            let (sheet, addr) = single_cell(reference)?;
            let value = typed_value(value, *value_type)?;
            let plan = generate(path, out, |b| b.set_cell_step(&sheet, addr, value))?;
            generated(name, &plan, out)
        }

        Command::Plan(PlanCommand::Format {
            path,
            reference,
            style,
            decimals,
            out,
        }) => {
            let plan = generate(path, out, |b| b.format_step(reference, *style, *decimals))?;
            generated(name, &plan, out)
        }

        Command::Serve => Err(EngineError::invalid(
            ErrorCode::Unsupported,
            "serve writes its own responses; dispatch it with serve()",
        )
        .into()),

        Command::Plan(PlanCommand::Compose {
            plans,
            strict,
            output,
        }) => {
            let plans = plans
                .iter()
                .map(|p| load_plan(p))
                .collect::<Result<Vec<_>, _>>()?;
            let merged = if *strict {
                compose_strict(&plans)
            } else {
                compose(&plans)
            }
            .map_err(EngineError::from)?;
            if let Some(output) = output {
                write_json(output, &merged)?;
            }
            Ok(ResponseEnvelope::from_result(name, &merged)
                .with_target(display(merged.target_path())))
        }

        Command::Plan(PlanCommand::Show { plan }) => {
            let plan = load_plan(plan)?;
            let mut kinds: BTreeMap<OperationKind, usize> = BTreeMap::new();
            for op in plan.operations() {
                *kinds.entry(op.operation.kind()).or_default() += 1;
            }
            let summary = json!({
                "operations": plan.operations().len(),
                "by_kind": kinds,
                "preconditions": plan.preconditions().len(),
                "postconditions": plan.postconditions().len(),
            });
            let plan_json = serde_json::to_value(&plan).context("serializing plan")?;
            Ok(ResponseEnvelope::success(name, json!({ "plan": plan_json, "summary": summary }))
                .with_target(display(plan.target_path())))
        }
    }
}

/// Answer requests from stdin on stdout until stdin closes
pub(crate) fn serve(global: &GlobalArgs) -> anyhow::Result<usize> {
    let config = match &global.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let policy = global.policy.as_deref().map(Policy::load).transpose()?;
    let engine = with_overrides(global, config)
        .with_policy(policy)
        .with_events(events(global));
    let answered = StdioServer::new(&engine)
        .serve(std::io::stdin().lock(), std::io::stdout().lock())
        .context("serving stdio requests")?;
    Ok(answered)
}

/// Run a direct edit and wrap its outcome
fn mutation(
    global: &GlobalArgs,
    name: &str,
    path: &Path,
    operation: Operation,
    edit: &EditArgs,
) -> anyhow::Result<ResponseEnvelope> {
    let outcome: MutationOutcome =
        engine_for(global, path)?.mutate(path, operation, edit.dry_run)?;
    info!(dry_run = outcome.dry_run, changes = outcome.changes.len(), "direct edit finished");
    Ok(ResponseEnvelope::from_result(name, &outcome)
        .with_target(display(path))
        .with_changes(outcome.changes.clone())
        .with_warnings(outcome.warnings.clone()))
}

/// Build a plan for `path`, continuing the `--append` plan when it exists
fn generate(
    path: &Path,
    out: &PlanOutput,
    step: impl FnOnce(PlanBuilder) -> PlanBuilder,
) -> anyhow::Result<PatchPlan> {
    let builder = match out.append.as_deref().filter(|p| p.exists()) {
        Some(existing) => {
            let plan = load_plan(existing)?;
            if plan.target_path() != path {
                return Err(EngineError::invalid(
                    ErrorCode::PlanInvalid,
                    format!(
                        "{} targets {}, not {}",
                        existing.display(),
                        plan.target_path().display(),
                        path.display()
                    ),
                )
                .into());
            }
            PlanBuilder::from_plan(plan)
        }
        None => PlanBuilder::for_target(path, Engine::default().fingerprint(path)?),
    };
    Ok(step(builder).build().map_err(EngineError::from)?)
}

/// Envelope for a generated plan, writing it out when asked
fn generated(name: &str, plan: &PatchPlan, out: &PlanOutput) -> anyhow::Result<ResponseEnvelope> {
    if let Some(destination) = out.destination() {
        write_json(destination, plan)?;
        debug!(plan = %destination.display(), "plan written");
    }
    Ok(ResponseEnvelope::from_result(name, plan).with_target(display(plan.target_path())))
}

/// Sheet and address of a `Sheet!A1` reference
fn single_cell(reference: &str) -> Result<(String, CellAddr), EngineError> {
    match Locator::parse(reference) {
        Ok(Locator::Cell { sheet, addr }) => Ok((sheet, addr)),
        _ => Err(EngineError::invalid(
            ErrorCode::RangeInvalid,
            format!("'{reference}' is not a Sheet!A1 cell reference"),
        )),
    }
}

fn typed_value(text: &str, ty: Option<ValueType>) -> Result<Option<CellValue>, EngineError> {
    CellValue::parse_typed(text, ty).map_err(|e| EngineError::invalid(ErrorCode::InvalidRequest, e))
}

fn events(global: &GlobalArgs) -> EventEmitter {
    if global.events {
        EventEmitter::stderr()
    } else {
        EventEmitter::disabled()
    }
}

/// Engine for `document` honoring `--config`, `--policy`, `--wait-lock` and
/// `--no-backup` over file values
fn engine_for(global: &GlobalArgs, document: &Path) -> Result<Engine, EngineError> {
    let config = match &global.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::discover(document)?,
    };
    let policy = match &global.policy {
        Some(path) => Some(Policy::load(path)?),
        None => config.load_policy(document)?,
    };
    Ok(with_overrides(global, config)
        .with_policy(policy)
        .with_events(events(global)))
}

/// Engine over `config` with `--wait-lock` and `--no-backup` applied
fn with_overrides(global: &GlobalArgs, mut config: EngineConfig) -> Engine {
    if let Some(secs) = global.wait_lock {
        config = config.with_wait_lock_secs(secs);
    }
    if global.no_backup {
        config = config.with_backup(false);
    }
    Engine::default().with_config(config)
}

fn load_plan(path: &Path) -> Result<PatchPlan, EngineError> {
    let bytes = fsio::read_bytes(path)?;
    Ok(PatchPlan::from_slice(&bytes)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("serializing output")?;
    bytes.push(b'\n');
    fsio::atomic_write(path, &bytes)?;
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Stable error entry for a failed command
pub(crate) fn classify(err: &anyhow::Error) -> ErrorEntry {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ApplyError>() {
            return ErrorEntry::from(e);
        }
        if let Some(e) = cause.downcast_ref::<EngineError>() {
            return ErrorEntry::from(e);
        }
    }
    ErrorEntry::new(ErrorCode::Internal, format!("{err:#}"))
}
