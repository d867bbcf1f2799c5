//! Environment and parameter replication between two catalogs.
//!
//! ```text
//! ┌──────────────┐   snapshot    ┌─────────┐   SyncPlan   ┌──────────┐
//! │ source reads │ ────────────▶ │ planner │ ───────────▶ │ executor │ ──▶ target
//! └──────────────┘  target facts └─────────┘              └──────────┘
//!                                                  decrypt ▲
//!                                                          └── source
//! ```
//!
//! The [`SyncEngine`] drives a run: it reads the source folder, inspects the
//! target folder, builds a [`SyncPlan`] with the pure [`planner`], and applies
//! each environment plan through the [`Executor`]. Every operation of one
//! environment runs in dependency order: environment, variables, references,
//! parameter bindings. Sensitive values are decrypted on the source only at
//! the moment the target create call consumes them.

pub mod codec;
pub mod engine;
pub mod error;
pub mod executor;
pub mod export;
pub mod plan;
pub mod planner;
pub mod render;
pub mod report;

pub use codec::{Literal, decode, encode, quote};
pub use engine::{
    CheckReport, DEFAULT_PARALLELISM, OverrideOptions, OverridesReport, SyncEngine, SyncOptions,
};
pub use error::{CodecError, Result, SyncError};
pub use executor::{
    EnvironmentOutcome, EnvironmentState, ExecuteOptions, Executor, ItemResult, Outcome,
};
pub use export::{ExportedProject, export_projects};
pub use plan::{
    EnvironmentPlan, Operation, ParameterOperation, ParameterValue, SensitiveHandle, Skip, Stage,
    SyncPlan, VariableValue, Warning,
};
pub use planner::{PlanOptions, SourceEnvironment, SourceSnapshot, TargetFacts};
pub use render::Renderer;
pub use report::{EnvironmentReport, Summary, SyncReport};
