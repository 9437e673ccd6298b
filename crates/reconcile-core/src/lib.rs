//! Retinal-imaging record reconciliation.
//!
//! The clinical database accumulated duplicate patient identities,
//! dangling selected-image references, and images filed under the wrong
//! patient. This crate detects all three and repairs them through a
//! plan/execute pipeline with an append-only audit trail:
//!
//! - [`engine::NameNormalizer`] / [`engine::IdentityMatcher`] - canonical
//!   name keys and duplicate-identity grouping
//! - [`engine::MergePlanner`] - pure merge/repair planning over a snapshot
//! - [`engine::RepairExecutor`] - dry-run by default, execute on opt-in
//! - [`db::Database`] - SQLite persistence behind the
//!   [`storage::StorageGateway`] seam
//!
//! ```no_run
//! use retina_reconcile_core::db::Database;
//! use retina_reconcile_core::engine::ReconcileEngine;
//! use retina_reconcile_core::models::RunMode;
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::open("clinic.db")?;
//! let engine = ReconcileEngine::new(&db);
//! let report = engine.run(RunMode::DryRun)?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod engine;
pub mod models;
pub mod storage;

pub use db::{Database, DbError, DbResult};
pub use engine::{EngineError, ReconcileEngine};
pub use models::{ExecutionReport, ReconciliationPlan, RunMode};
pub use storage::StorageGateway;
