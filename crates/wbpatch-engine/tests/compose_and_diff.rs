//! Composition and diff properties against real documents.

use pretty_assertions::assert_eq;
use wbpatch_engine::{diff::diff, Engine, EngineConfig};
use wbpatch_plan::{compose, compose_strict, ComposeError, Condition, ConditionKind, PlanBuilder};
use wbpatch_test_utils::{add_margin, format_margin, Fixture};

fn margin_exists() -> Condition {
    Condition::new(ConditionKind::ColumnExists, "Sales[Margin]")
}

/// Two plans that both promise `Sales[Margin]` compose into one transaction
/// with that postcondition once, operations in input order.
#[test]
fn composed_plan_dedups_and_applies() {
    let fixture = Fixture::sales();
    let fp = fixture.fingerprint();
    let add = PlanBuilder::for_target(&fixture.path, fp)
        .operation_with_id("add", add_margin())
        .postcondition(margin_exists())
        .build()
        .unwrap();
    let format = PlanBuilder::for_target(&fixture.path, fp)
        .operation_with_id("fmt", format_margin())
        .postcondition(margin_exists())
        .build()
        .unwrap();

    let merged = compose(&[add, format]).unwrap();
    assert_eq!(merged.postconditions(), &[margin_exists()]);
    let ids: Vec<_> = merged.operations().iter().map(|o| o.op_id.as_str()).collect();
    assert_eq!(ids, vec!["add", "fmt"]);
    assert_eq!(*merged.target_fingerprint(), fp);

    let engine = Engine::default().with_config(EngineConfig::default().with_backup(false));
    assert!(engine.validate(&merged, None).unwrap().valid);
    let outcome = engine.apply(&merged, None).unwrap();
    assert_eq!(outcome.changes.len(), 2);
}

/// Plans generated independently by the builder compose without id
/// collisions and apply as one transaction.
#[test]
fn builder_plans_compose_without_explicit_ids() {
    let fixture = Fixture::sales();
    let fp = fixture.fingerprint();
    let add = PlanBuilder::for_target(&fixture.path, fp)
        .operation(add_margin())
        .build()
        .unwrap();
    let format = PlanBuilder::for_target(&fixture.path, fp)
        .operation(format_margin())
        .build()
        .unwrap();

    let merged = compose(&[add.clone(), format.clone()]).unwrap();
    let ids: Vec<_> = merged.operations().iter().map(|o| o.op_id.clone()).collect();
    assert_eq!(
        ids,
        vec![
            add.operations()[0].op_id.clone(),
            format.operations()[0].op_id.clone()
        ]
    );

    let engine = Engine::default().with_config(EngineConfig::default().with_backup(false));
    let outcome = engine.apply(&merged, None).unwrap();
    assert_eq!(outcome.changes.len(), 2);
}

/// Strict composition refuses plans built against different states.
#[test]
fn strict_compose_rejects_mixed_bases() {
    let fixture = Fixture::sales();
    let a = PlanBuilder::for_target(&fixture.path, fixture.fingerprint())
        .operation_with_id("a", add_margin())
        .build()
        .unwrap();
    let b = PlanBuilder::for_target(&fixture.path, wbpatch_artifact::Fingerprint::compute(b"x"))
        .operation_with_id("b", format_margin())
        .build()
        .unwrap();
    assert!(compose(&[a.clone(), b.clone()]).is_ok());
    assert!(matches!(
        compose_strict(&[a, b]),
        Err(ComposeError::FingerprintMismatch { .. })
    ));
}

/// Diffing a document against itself, or against a byte copy, is empty;
/// swapping sides mirrors every change.
#[test]
fn diff_idempotent_and_symmetric() {
    let fixture = Fixture::sales();
    let before = fixture.workbook();
    let engine = Engine::default().with_config(EngineConfig::default().with_backup(false));
    let plan = wbpatch_test_utils::margin_plan(&fixture);
    engine.apply(&plan, None).unwrap();
    let after = fixture.workbook();

    assert!(diff(&after, &after, None).unwrap().is_empty());
    let same = engine.diff(&fixture.path, &fixture.path, None).unwrap();
    assert!(same.identical && same.diff.is_empty());

    let forward = diff(&before, &after, None).unwrap();
    let backward = diff(&after, &before, None).unwrap();
    assert_eq!(forward.total_changes, backward.total_changes);
    for (f, b) in forward.cell_changes.iter().zip(&backward.cell_changes) {
        assert_eq!(f.reference, b.reference);
        assert_eq!(f.before, b.after);
    }
}
