//! Reconciliation engine.
//!
//! Pipeline: snapshot -> identity matching -> merge planning -> execution.
//!
//! ```text
//!   StorageGateway ──► RecordSet ──► IdentityMatcher ──► MergePlanner
//!                                                             │
//!                         ExecutionReport ◄── RepairExecutor ◄┘
//! ```
//!
//! Matching and planning are pure functions over the snapshot; only the
//! executor mutates storage, and only in execute mode.

mod executor;
mod matcher;
mod normalizer;
mod planner;
mod provenance;
mod resolver;

pub use executor::{RepairExecutor, ENGINE_ACTOR, IMAGE_BATCH_SIZE};
pub use matcher::{IdentityMatcher, MatchReport};
pub use normalizer::NameNormalizer;
pub use planner::{MergePlanner, RecordSet};
pub use provenance::provenance_name;
pub use resolver::{resolve, Resolution, SiblingImages};

use thiserror::Error;
use tracing::info;

use crate::db::DbError;
use crate::models::{ExecutionReport, ReconciliationPlan, RunMode};
use crate::storage::StorageGateway;

/// Engine-level errors. Planning never fails; only snapshot loading can.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Coordinates one reconciliation run end to end.
pub struct ReconcileEngine<'a, S: StorageGateway> {
    storage: &'a S,
    matcher: IdentityMatcher,
    planner: MergePlanner,
}

impl<'a, S: StorageGateway> ReconcileEngine<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            matcher: IdentityMatcher::new(),
            planner: MergePlanner::new(),
        }
    }

    /// Load a consistent snapshot of everything the planner needs.
    pub fn load_records(&self) -> Result<RecordSet, EngineError> {
        let mut records = RecordSet {
            patients: self.storage.find_patients()?,
            exams: self.storage.find_exams()?,
            ..Default::default()
        };
        for exam in &records.exams {
            let images = self.storage.find_images(&exam.id)?;
            if !images.is_empty() {
                records.images.insert(exam.id.clone(), images);
            }
            if let Some(report) = self.storage.find_report(&exam.id)? {
                records.reports.insert(exam.id.clone(), report);
            }
        }
        info!(
            patients = records.patients.len(),
            exams = records.exams.len(),
            reports = records.reports.len(),
            "snapshot loaded"
        );
        Ok(records)
    }

    /// Match identities and build the merge plan. Pure; safe to call for
    /// review without ever executing.
    pub fn build_plan(&self, records: &RecordSet) -> ReconciliationPlan {
        let match_report = self
            .matcher
            .find_duplicate_groups(&records.patients, &records.exam_counts());
        let mut plan = self.planner.plan(records, &match_report.groups);

        // Ambiguity findings lead the list; they gate what was *not* planned.
        let mut findings = match_report.ambiguous;
        findings.append(&mut plan.findings);
        plan.findings = findings;
        plan
    }

    /// Full run: snapshot, plan, apply in the given mode.
    pub fn run(&self, mode: RunMode) -> Result<ExecutionReport, EngineError> {
        let records = self.load_records()?;
        let plan = self.build_plan(&records);
        let executor = RepairExecutor::new(self.storage);
        Ok(executor.apply(&plan, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Exam, ExamImage, ImageType, PatientIdentity};

    fn seed_duplicate_pair(db: &Database) -> (String, String) {
        let mut older = PatientIdentity::new("JOSÉ DA SILVA".into());
        older.created_at = "2024-01-01T00:00:00Z".into();
        let mut newer = PatientIdentity::new("JOSE DA SILVA".into());
        newer.created_at = "2024-06-01T00:00:00Z".into();
        db.insert_patient(&older).unwrap();
        db.insert_patient(&newer).unwrap();

        let exam = Exam::new(newer.id.clone(), "2025-01-10".into());
        db.insert_exam(&exam).unwrap();
        db.insert_image(&ExamImage::new(
            exam.id.clone(),
            "https://store/acct/patients/JOSE_DA_SILVA_ab12cd34/1.jpg".into(),
            ImageType::Color,
        ))
        .unwrap();

        (older.id, newer.id)
    }

    #[test]
    fn test_dry_run_leaves_database_untouched() {
        let db = Database::open_in_memory().unwrap();
        let (older_id, newer_id) = seed_duplicate_pair(&db);

        let engine = ReconcileEngine::new(&db);
        let report = engine.run(RunMode::DryRun).unwrap();

        assert_eq!(report.groups_found, 1);
        assert_eq!(report.patients_deleted, 1);
        assert!(db.get_patient(&older_id).unwrap().is_some());
        assert!(db.get_patient(&newer_id).unwrap().is_some());
    }

    #[test]
    fn test_execute_consolidates_duplicate_identities() {
        let db = Database::open_in_memory().unwrap();
        let (older_id, newer_id) = seed_duplicate_pair(&db);

        let engine = ReconcileEngine::new(&db);
        let report = engine.run(RunMode::Execute).unwrap();

        assert_eq!(report.patients_deleted, 1);
        assert!(report.failure.is_none());

        // The exam-holding identity wins; the empty one is gone
        assert!(db.get_patient(&newer_id).unwrap().is_some());
        assert!(db.get_patient(&older_id).unwrap().is_none());
        assert_eq!(db.list_patients().unwrap().len(), 1);
    }

    #[test]
    fn test_rerun_converges_to_noop() {
        let db = Database::open_in_memory().unwrap();
        seed_duplicate_pair(&db);

        let engine = ReconcileEngine::new(&db);
        engine.run(RunMode::Execute).unwrap();

        let records = engine.load_records().unwrap();
        let plan = engine.build_plan(&records);
        assert!(plan.is_noop());
    }
}
