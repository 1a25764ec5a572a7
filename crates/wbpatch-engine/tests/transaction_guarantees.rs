//! Transaction guarantees of apply.
//!
//! - conflict detection: a plan built against stale bytes never applies
//! - single use: a committed plan conflicts on its second apply
//! - atomicity: a failed apply leaves the bytes and no lock behind
//! - lock exclusivity: one writer at a time, retryable for the loser
//! - dry-run/apply shape equivalence

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use wbpatch_artifact::CellValue;
use wbpatch_engine::{
    lock_path_for, ApplyOptions, ApplyStage, ChangeRecord, Engine, EngineConfig, ErrorCode,
    LockManager,
};
use wbpatch_plan::{Condition, ConditionKind, Operation, PlanBuilder};
use wbpatch_test_utils::{add_margin, margin_plan, Fixture};

fn quiet_engine() -> Engine {
    Engine::default().with_config(EngineConfig::default().with_backup(false))
}

/// An edit between planning and apply is detected before anything is
/// written, and the caller may retry after re-planning.
#[test]
fn external_edit_conflicts() {
    let fixture = Fixture::sales();
    let engine = quiet_engine();
    let plan = margin_plan(&fixture);

    let mut edited = fixture.workbook();
    edited
        .sheet_mut("Data")
        .unwrap()
        .set_value("B2".parse().unwrap(), Some(CellValue::from(999)));
    std::fs::write(&fixture.path, wbpatch_test_utils::encode(&edited)).unwrap();
    let edited_bytes = fixture.bytes();

    let err = engine.apply(&plan, None).unwrap_err();
    assert_eq!(err.stage, ApplyStage::FingerprintCheck);
    assert_eq!(err.code(), ErrorCode::FingerprintConflict);
    assert_eq!(err.exit_code(), 40);
    assert!(err.is_retryable());
    assert_eq!(fixture.bytes(), edited_bytes);

    let replanned = margin_plan(&fixture);
    assert!(engine.apply(&replanned, None).is_ok());
}

/// Applying changes the fingerprint, so the same plan can never commit twice.
#[test]
fn plan_is_single_use() {
    let fixture = Fixture::sales();
    let engine = quiet_engine();
    let plan = margin_plan(&fixture);

    let first = engine.apply(&plan, None).unwrap();
    let after_first = fixture.bytes();
    assert_ne!(first.fingerprint_after, first.fingerprint_before);

    let err = engine.apply(&plan, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FingerprintConflict);
    assert_eq!(fixture.bytes(), after_first);
}

/// A failure after execution started leaves the original bytes and no lock
/// file behind.
#[test]
fn failed_apply_is_atomic() {
    let fixture = Fixture::sales();
    let original = fixture.bytes();
    let engine = quiet_engine();

    let plan = PlanBuilder::for_target(&fixture.path, fixture.fingerprint())
        .operation(add_margin())
        .operation(Operation::AddColumn {
            table: "Missing".into(),
            name: "X".into(),
            formula: None,
            default_value: None,
        })
        .build()
        .unwrap();
    let err = engine.apply(&plan, None).unwrap_err();
    assert_eq!(err.stage, ApplyStage::Execute);
    assert_eq!(err.code(), ErrorCode::TableNotFound);
    assert_eq!(err.details()["op_id"], plan.operations()[1].op_id.as_str());
    assert_eq!(fixture.bytes(), original);
    assert!(!lock_path_for(&fixture.path).exists());

    let plan = PlanBuilder::for_target(&fixture.path, fixture.fingerprint())
        .precondition(Condition::new(ConditionKind::ObjectExists, "Nope"))
        .operation(add_margin())
        .build()
        .unwrap();
    let err = engine.apply(&plan, None).unwrap_err();
    assert_eq!(err.stage, ApplyStage::Preconditions);
    assert_eq!(err.exit_code(), 10);
    assert_eq!(fixture.bytes(), original);
    assert!(!lock_path_for(&fixture.path).exists());
}

/// A lock already held by another writer stops apply at the lock stage
/// with a retryable error; once released the same plan applies.
#[test]
fn held_lock_blocks_apply() {
    let fixture = Fixture::sales();
    let engine = quiet_engine();
    let plan = margin_plan(&fixture);

    let holder = LockManager::new()
        .acquire(&fixture.path, Duration::ZERO)
        .unwrap();
    let options = ApplyOptions::default()
        .with_backup(false)
        .with_wait_lock(Duration::from_millis(50));
    let err = engine.apply_with(&plan, None, &options).unwrap_err();
    assert_eq!(err.stage, ApplyStage::Lock);
    assert_eq!(err.code(), ErrorCode::LockHeld);
    assert!(err.is_retryable());
    assert_eq!(err.exit_code(), 50);

    holder.release().unwrap();
    assert!(engine.apply_with(&plan, None, &options).is_ok());
    assert!(!lock_path_for(&fixture.path).exists());
}

/// Two writers racing on one document with no lock wait: exactly one
/// commits. The other is refused at the lock, or, if it arrives after the
/// commit, at the fingerprint check. Neither leaves a lock file behind.
#[test]
fn lock_is_exclusive() {
    for _ in 0..10 {
        let fixture = Fixture::sales();
        let plan = margin_plan(&fixture);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let plan = plan.clone();
                thread::spawn(move || {
                    let options = ApplyOptions::default()
                        .with_backup(false)
                        .with_wait_lock(Duration::ZERO);
                    barrier.wait();
                    quiet_engine().apply_with(&plan, None, &options)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.into_iter().find_map(Result::err).unwrap();
        assert!(
            matches!(
                loser.code(),
                ErrorCode::LockHeld | ErrorCode::FingerprintConflict
            ),
            "unexpected failure {loser}"
        );
        assert!(loser.is_retryable());
        assert!(!lock_path_for(&fixture.path).exists());
    }
}

/// The dry-run preview lists exactly the operations, targets and impact
/// that apply then reports.
#[test]
fn dry_run_matches_apply() {
    let fixture = Fixture::sales();
    let engine = quiet_engine();
    let plan = margin_plan(&fixture);

    let preview = engine.simulate(&plan, None).unwrap();
    let outcome = engine.apply(&plan, None).unwrap();

    let shape = |records: &[ChangeRecord]| {
        records
            .iter()
            .map(|r| {
                let (op_id, kind, target, impact) = r.shape();
                (op_id.to_string(), kind, target.to_string(), impact)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&preview.changes), shape(&outcome.changes));
    assert_eq!(preview.summary, outcome.summary);
}
