//! wbpatch Engine
//!
//! Transactional plan execution against fingerprinted workbooks.
//!
//! # Core Concepts
//!
//! - [`validate`](validate::validate): structural checks, failures are data
//! - [`simulate`](simulate::simulate): dry-run on a disposable copy
//! - [`apply`](apply::apply): lock, check, backup, execute, atomic persist
//! - [`diff`](diff::diff) and [`verify`](verify::verify): inspect the outcome
//! - [`workflow`]: sequenced steps over one shared state
//! - [`mutate`](mutate::mutate): one operation without a plan file, same
//!   transaction
//! - [`inspect`]: listings and workbook hygiene findings
//! - [`server`]: line-delimited JSON requests over any reader/writer pair
//! - [`events`]: opt-in NDJSON lifecycle events
//! - [`Engine`]: facade bundling adapter, configuration, locks, policy and
//!   events
//!
//! # Example
//!
//! ```rust,ignore
//! use wbpatch_engine::{Engine, ResponseEnvelope};
//!
//! let engine = Engine::for_document("book.json".as_ref())?;
//! let plan = wbpatch_plan::PatchPlan::from_json(&std::fs::read_to_string("plan.json")?)?;
//! let report = engine.validate(&plan, None)?;
//! if report.valid {
//!     let outcome = engine.apply(&plan, None)?;
//!     println!("{} -> {}", outcome.fingerprint_before, outcome.fingerprint_after);
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod apply;
pub mod checks;
pub mod config;
pub mod context;
pub mod diff;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
pub mod fsio;
pub mod inspect;
pub mod lock;
pub mod mutate;
pub mod ops;
pub mod policy;
pub mod record;
pub mod server;
pub mod simulate;
pub mod validate;
pub mod verify;
pub mod workflow;

pub use apply::{ApplyOptions, ApplyOutcome};
pub use config::{ConfigError, EngineConfig};
pub use context::DocumentHandle;
pub use diff::{CellChange, ChangeType, DiffResult, FileDiff, DIFF_SCHEMA_VERSION};
pub use engine::Engine;
pub use envelope::{ErrorEntry, Metrics, ResponseEnvelope};
pub use error::{ApplyError, ApplyStage, EngineError, EngineResult, ErrorCode, ErrorKind};
pub use events::{Event, EventEmitter};
pub use inspect::{HygieneFinding, HygieneReport, Severity, SheetListing, WorkbookInfo};
pub use lock::{lock_path_for, LockError, LockGuard, LockManager};
pub use mutate::MutationOutcome;
pub use ops::OperationError;
pub use policy::{MutationThresholds, Policy, PolicyViolation};
pub use record::{ChangeRecord, Impact, Summary, Warning};
pub use server::{Request, Response, StdioServer};
pub use simulate::{DryRunReport, FailedOperation};
pub use validate::{Check, CheckPhase, ValidationReport};
pub use verify::{Assertion, AssertionResult, VerifyReport};
pub use workflow::{
    StepAction, StepResult, WorkflowDefaults, WorkflowError, WorkflowReport, WorkflowSpec,
    WorkflowStep, WORKFLOW_SCHEMA_VERSION,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
