//! Workflows over the Sales fixture.

use serde_json::json;
use wbpatch_engine::{Engine, EngineConfig, ErrorCode, WorkflowSpec};
use wbpatch_test_utils::{margin_plan, Fixture};

fn engine() -> Engine {
    Engine::default().with_config(EngineConfig::default().with_backup(false))
}

/// Read steps see earlier mutations; the document is written once at the end.
#[test]
fn mutate_then_verify_persists_once() {
    let fixture = Fixture::sales();
    let wf = fixture.write(
        "margin.yaml",
        r#"
schema_version: "1.0"
name: margin
target: book.json
steps:
  - id: revenue
    run: range_stat
    ref: Data!B2:B3
  - id: add
    run: mutate
    operation: { kind: add_column, table: Sales, name: Margin, formula: "=(B2-C2)/B2" }
  - id: peek
    run: cell_get
    ref: Data!D3
  - id: check
    run: verify
    assertions:
      - { kind: column_exists, table: Sales, column: Margin }
      - { kind: row_count, table: Sales, exact: 2 }
"#,
    );
    let spec = WorkflowSpec::load(&wf).unwrap();
    let target = spec.resolve_target(None).unwrap();
    let report = engine().run_workflow(&spec, &target).unwrap();

    assert!(report.ok, "{:?}", report.results);
    assert_eq!(report.steps_passed, 4);
    assert_eq!(report.results[0].result["sum"], json!(300.0));
    assert_eq!(report.results[0].result["mean"], json!(150.0));
    assert_eq!(
        report.results[2].result["value"]["data"]["value"]["formula"],
        json!("=(B3-C3)/B3")
    );
    assert!(report.persisted);
    assert_eq!(report.fingerprint_after, fixture.fingerprint());
}

/// An `apply` step after a mutation sees a changed state and conflicts; the
/// run fails and nothing is written. Validation only reports the mismatch.
#[test]
fn apply_after_mutation_conflicts() {
    let fixture = Fixture::sales();
    let original = fixture.bytes();
    let plan = margin_plan(&fixture);
    fixture.write("plan.json", &plan.to_json_pretty().unwrap());
    let wf = fixture.write(
        "wf.yaml",
        r#"
steps:
  - id: first
    run: mutate
    operation: { kind: create_object, object: { type: sheet, name: Notes } }
  - id: validate
    run: validate
    plan: plan.json
  - id: apply
    run: apply
    plan: plan.json
"#,
    );
    let spec = WorkflowSpec::load(&wf).unwrap();
    let report = engine().run_workflow(&spec, &fixture.path).unwrap();

    assert!(!report.ok);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[1].result["fingerprint_match"], json!(false));
    let error = report.results[2].error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::FingerprintConflict);
    assert!(!report.persisted);
    assert_eq!(fixture.bytes(), original);
}

/// With no mutation in between, a workflow `apply` step commits the plan.
#[test]
fn apply_step_commits() {
    let fixture = Fixture::sales();
    let plan = margin_plan(&fixture);
    fixture.write("plan.json", &plan.to_json_pretty().unwrap());
    let wf = fixture.write(
        "wf.yaml",
        r#"
steps:
  - id: apply
    run: apply
    plan: plan.json
  - id: check
    run: verify
    assertions:
      - { kind: cell_value_equals, ref: "Data!D1", expected: Margin }
"#,
    );
    let spec = WorkflowSpec::load(&wf).unwrap();
    let report = engine().run_workflow(&spec, &fixture.path).unwrap();
    assert!(report.ok, "{:?}", report.results);
    assert_eq!(report.results[0].changes.len(), 2);
    assert!(fixture.workbook().find_table("Sales").is_some());
}
