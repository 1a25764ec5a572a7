//! wbpatch command-line interface
//!
//! Every subcommand prints one JSON envelope on stdout and exits with the
//! category code of its first error (0 on success). `serve` is the
//! exception: stdout carries its response stream instead.

mod cli;
mod commands;
mod telemetry;

use clap::Parser;
use cli::{Cli, Command};
use serde_json::{json, Value as Json};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use wbpatch_engine::{EventEmitter, ResponseEnvelope};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = telemetry::init(cli.global.log_json) {
        eprintln!("wbpatch: {e:#}");
    }

    if matches!(cli.command, Command::Serve) {
        return match commands::serve(&cli.global) {
            Ok(answered) => {
                info!(answered, "stdin closed");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "server failed");
                ExitCode::from(exit_code(commands::classify(&err).code.kind().exit_code()))
            }
        };
    }

    let events = if cli.global.events {
        EventEmitter::stderr()
    } else {
        EventEmitter::disabled()
    };
    let started = Instant::now();
    let name = cli.command.name();
    events.emit("command.start", json!({ "command": name }));
    let envelope = match commands::execute(&cli.global, &cli.command) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(command = name, error = %format!("{err:#}"), "command failed");
            let mut envelope =
                ResponseEnvelope::success(name, Json::Null).with_error(commands::classify(&err));
            if let Some(target) = cli.command.target() {
                envelope = envelope.with_target(target.display().to_string());
            }
            envelope
        }
    }
    .timed(started);

    events.emit(
        "command.end",
        json!({
            "command": name,
            "ok": envelope.ok,
            "exit_code": envelope.exit_code(),
            "duration_ms": envelope.metrics.duration_ms,
        }),
    );

    match serde_json::to_string_pretty(&envelope) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("wbpatch: cannot serialize response: {e}");
            return ExitCode::from(90);
        }
    }
    ExitCode::from(exit_code(envelope.exit_code()))
}

fn exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::PlanCommand;

    #[test]
    fn parses_nested_plan_commands() {
        let cli =
            Cli::try_parse_from(["wbpatch", "plan", "compose", "a.json", "b.json", "--strict"])
                .unwrap();
        match cli.command {
            Command::Plan(PlanCommand::Compose { plans, strict, .. }) => {
                assert_eq!(plans.len(), 2);
                assert!(strict);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "wbpatch",
            "apply",
            "plan.json",
            "--no-backup",
            "--wait-lock",
            "3",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.global.no_backup);
        assert_eq!(cli.global.wait_lock, Some(3));
        assert!(cli.global.log_json);
        assert_eq!(cli.command.name(), "apply");
    }

    #[test]
    fn compose_needs_plans() {
        assert!(Cli::try_parse_from(["wbpatch", "plan", "compose"]).is_err());
    }

    #[test]
    fn validate_splits_plan_and_workbook() {
        let cli = Cli::try_parse_from(["wbpatch", "validate", "plan", "p.json", "--target", "b.json"])
            .unwrap();
        assert_eq!(cli.command.name(), "validate plan");
        assert_eq!(cli.command.target(), Some(std::path::Path::new("b.json")));

        let cli = Cli::try_parse_from(["wbpatch", "validate", "workbook", "b.json"]).unwrap();
        assert_eq!(cli.command.name(), "validate workbook");
    }

    #[test]
    fn generator_flags_parse_plan_spellings() {
        let cli = Cli::try_parse_from([
            "wbpatch",
            "plan",
            "format",
            "book.json",
            "--ref",
            "Sales[Amount]",
            "--style",
            "currency",
            "--append",
            "plan.json",
            "--events",
        ])
        .unwrap();
        assert!(cli.global.events);
        match cli.command {
            Command::Plan(PlanCommand::Format {
                style,
                decimals,
                out,
                ..
            }) => {
                assert_eq!(style, wbpatch_plan::NumberStyle::Currency);
                assert_eq!(decimals, 2);
                assert_eq!(out.destination(), Some(std::path::Path::new("plan.json")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from([
            "wbpatch", "table", "append-rows", "b.json", "-t", "T", "--data", "[]",
            "--schema-mode", "sideways",
        ])
        .is_err());
    }

    #[test]
    fn cell_set_parses_value_type() {
        let cli = Cli::try_parse_from([
            "wbpatch", "cell", "set", "b.json", "--ref", "Data!B2", "--value", "3", "--type",
            "number", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Cell(crate::cli::CellCommand::Set {
                value_type, edit, ..
            }) => {
                assert_eq!(value_type, Some(wbpatch_artifact::ValueType::Number));
                assert!(edit.dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
