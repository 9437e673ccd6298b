//! Repair executor: applies a reconciliation plan to storage.
//!
//! Dry-run (the default) touches nothing and reports what would happen.
//! Execute applies mutations in dependency order and stops at the first
//! storage error; already-applied work stays applied and the report says
//! how far the run got.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::db::DbResult;
use crate::models::{
    ExecutionReport, ExecutionStep, Finding, HistoryEntry, ImageAction, ImageDisposition,
    PartialFailure, ReconciliationPlan, RefOutcome, RunMode,
};
use crate::storage::StorageGateway;

/// Image mutations are applied in batches of this size, with one retry
/// per batch before the run stops.
pub const IMAGE_BATCH_SIZE: usize = 500;

/// Actor tag recorded on every history entry the engine writes.
pub const ENGINE_ACTOR: &str = "engine:reconcile";

/// Applies plans against a [`StorageGateway`].
pub struct RepairExecutor<'a, S: StorageGateway> {
    storage: &'a S,
}

impl<'a, S: StorageGateway> RepairExecutor<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Apply `plan` in the given mode. Never returns `Err`: storage
    /// failures surface as [`PartialFailure`] on the report.
    pub fn apply(&self, plan: &ReconciliationPlan, mode: RunMode) -> ExecutionReport {
        let mut report = ExecutionReport {
            mode,
            groups_found: plan.duplicate_groups.len(),
            findings: plan.findings.clone(),
            ..Default::default()
        };

        info!(
            execute = mode.is_execute(),
            groups = plan.duplicate_groups.len(),
            "applying reconciliation plan"
        );

        let steps: [(ExecutionStep, StepFn<'a, S>); 7] = [
            (ExecutionStep::ReportMoves, Self::step_report_moves),
            (ExecutionStep::SelectedImagesFixes, Self::step_selected_images),
            (ExecutionStep::ImageActions, Self::step_image_actions),
            (ExecutionStep::ExamDeletions, Self::step_exam_deletions),
            (ExecutionStep::ExamReassignments, Self::step_exam_reassignments),
            (ExecutionStep::PatientUpdates, Self::step_patient_updates),
            (ExecutionStep::PatientDeletions, Self::step_patient_deletions),
        ];

        for (step, run) in steps {
            if let Err(err) = run(self, plan, mode, &mut report) {
                warn!(step = step.as_str(), error = %err, "run stopped on storage error");
                report.failure = Some(PartialFailure {
                    step,
                    detail: err.to_string(),
                });
                return report;
            }
        }

        info!(
            reports_moved = report.reports_moved,
            references_rewritten = report.references_rewritten,
            references_nulled = report.references_nulled,
            images_moved = report.images_moved,
            images_deleted = report.images_deleted,
            exams_deleted = report.exams_deleted,
            patients_deleted = report.patients_deleted,
            "plan applied"
        );
        report
    }

    fn step_report_moves(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        for mv in &plan.report_moves {
            if mode.is_execute() {
                self.storage.move_report(&mv.report_id, &mv.to_exam_id)?;
            }
            debug!(report_id = %mv.report_id, to_exam = %mv.to_exam_id, "report moved");
            report.reports_moved += 1;
        }
        Ok(())
    }

    /// Each report write pairs with exactly one history append, in the
    /// same pass, so the audit trail can never lag the data.
    fn step_selected_images(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        for fix in &plan.selected_images_fixes {
            if mode.is_execute() {
                let found = self
                    .storage
                    .update_selected_images(&fix.report_id, &fix.new)?;
                if !found {
                    warn!(report_id = %fix.report_id, "report vanished before repair, skipping");
                    continue;
                }
                let entry = HistoryEntry::new(
                    fix.report_id.clone(),
                    fix.previous.clone(),
                    fix.new.clone(),
                    ENGINE_ACTOR.to_string(),
                    fix_reason(fix),
                );
                self.storage.append_history(&entry)?;
            }
            for slot in &fix.fixes {
                match slot.outcome {
                    RefOutcome::Rewritten { .. } => report.references_rewritten += 1,
                    RefOutcome::Nulled { .. } => report.references_nulled += 1,
                }
            }
            report.history_entries += 1;
        }
        Ok(())
    }

    fn step_image_actions(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        let mut applied: HashSet<&str> = HashSet::new();
        for batch in plan.image_actions.chunks(IMAGE_BATCH_SIZE) {
            if let Err(first) = self.apply_image_batch(batch, mode, report, &mut applied) {
                warn!(error = %first, batch_len = batch.len(), "image batch failed, retrying once");
                self.apply_image_batch(batch, mode, report, &mut applied)?;
            }
        }
        Ok(())
    }

    fn apply_image_batch<'p>(
        &self,
        batch: &'p [ImageAction],
        mode: RunMode,
        report: &mut ExecutionReport,
        applied: &mut HashSet<&'p str>,
    ) -> DbResult<()> {
        for action in batch {
            if applied.contains(action.image_id.as_str()) {
                continue;
            }
            match &action.disposition {
                ImageDisposition::Move { to_exam_id } => {
                    if mode.is_execute() {
                        self.storage.move_image(&action.image_id, to_exam_id)?;
                    }
                    report.images_moved += 1;
                }
                ImageDisposition::DeleteAsDuplicate | ImageDisposition::DeleteAsForeign => {
                    if mode.is_execute() {
                        self.storage.delete_image(&action.image_id)?;
                    }
                    report.images_deleted += 1;
                }
            }
            applied.insert(&action.image_id);
        }
        Ok(())
    }

    /// Deletion re-checks for a report at execution time: plans go stale,
    /// and an exam that picked up a report since planning is left alone.
    fn step_exam_deletions(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        for exam_id in &plan.exam_deletions {
            if mode.is_execute() {
                if self.storage.find_report(exam_id)?.is_some() {
                    warn!(exam_id = %exam_id, "exam acquired a report since planning, not deleted");
                    report.findings.push(Finding::ProtectedExam {
                        exam_id: exam_id.clone(),
                        reason: "held a medical report at execution time".to_string(),
                    });
                    continue;
                }
                self.storage.delete_exam(exam_id)?;
            }
            report.exams_deleted += 1;
        }
        Ok(())
    }

    fn step_exam_reassignments(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        for reassignment in &plan.exam_reassignments {
            if mode.is_execute() {
                self.storage
                    .update_exam_owner(&reassignment.exam_id, &reassignment.to_patient_id)?;
            }
            report.exams_reassigned += 1;
        }
        Ok(())
    }

    fn step_patient_updates(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        for update in &plan.patient_updates {
            if mode.is_execute() {
                self.storage.absorb_patient_fields(update)?;
            }
            report.patients_updated += 1;
        }
        Ok(())
    }

    fn step_patient_deletions(
        &self,
        plan: &ReconciliationPlan,
        mode: RunMode,
        report: &mut ExecutionReport,
    ) -> DbResult<()> {
        for patient_id in &plan.patient_deletions {
            if mode.is_execute() {
                self.storage.delete_patient(patient_id)?;
            }
            report.patients_deleted += 1;
        }
        Ok(())
    }
}

type StepFn<'a, S> = fn(
    &RepairExecutor<'a, S>,
    &ReconciliationPlan,
    RunMode,
    &mut ExecutionReport,
) -> DbResult<()>;

/// Human-readable reason recorded on the history entry for one report.
fn fix_reason(fix: &crate::models::SelectedImagesFix) -> String {
    let parts: Vec<String> = fix
        .fixes
        .iter()
        .map(|slot| match &slot.outcome {
            RefOutcome::Rewritten { image_id, .. } => {
                format!("{}: \"{}\" -> {}", slot.eye.as_str(), slot.old_raw, image_id)
            }
            RefOutcome::Nulled { reason } => {
                format!("{}: \"{}\" nulled ({})", slot.eye.as_str(), slot.old_raw, reason)
            }
        })
        .collect();
    format!("automated reference repair: {}", parts.join("; "))
}
