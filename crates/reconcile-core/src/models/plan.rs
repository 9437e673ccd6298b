//! Reconciliation plan and execution report types.
//!
//! A plan is pure data: everything the planner decided, reviewable before
//! anything touches storage. The executor consumes it in either mode and
//! always returns an itemized [`ExecutionReport`].

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Eye, ImageType, SelectedImages};

/// How strongly an identity group was matched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchConfidence {
    /// Strict normalized-name equality.
    Strict,
    /// Run-together / spacing variant accepted by the loose pass.
    Loose,
}

/// A set of patient identities believed to denote one person.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    /// The normalized key the group was bucketed under.
    pub normalized_key: String,
    /// All member identity ids, canonical included.
    pub member_ids: Vec<String>,
    /// The member chosen to survive the merge.
    pub canonical_id: String,
    pub confidence: MatchConfidence,
}

impl DuplicateGroup {
    /// Member ids excluding the canonical one.
    pub fn loser_ids(&self) -> impl Iterator<Item = &String> {
        self.member_ids.iter().filter(move |id| **id != self.canonical_id)
    }
}

/// How confidently a stored reference was mapped to a live image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolutionConfidence {
    /// Direct id match against the exam's current image set.
    Exact,
    /// Index lookup into the ordered image list; ordering is not
    /// guaranteed stable across re-imports, so lower than exact.
    Positional,
    /// Id found on a sibling exam the plan folds into this one.
    CrossExam,
}

/// Why a reference could not be mapped to a live image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum UnresolvableReason {
    /// No resolution rule recognized the id.
    UnknownId,
    /// Positional index past the end of the image list.
    IndexOutOfRange { index: usize, image_count: usize },
    /// Resolved to an image whose type cannot fill a fundus slot.
    TypeMismatch { image_id: String, image_type: ImageType },
    /// Id belongs to a sibling exam the plan does not fold in.
    ForeignExamNotMerged { exam_id: String },
}

impl fmt::Display for UnresolvableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvableReason::UnknownId => write!(f, "id matches no resolution rule"),
            UnresolvableReason::IndexOutOfRange { index, image_count } => {
                write!(f, "index {} out of range (exam has {} images)", index, image_count)
            }
            UnresolvableReason::TypeMismatch { image_id, image_type } => {
                write!(f, "image {} has type {}, not valid for a fundus slot", image_id, image_type.as_str())
            }
            UnresolvableReason::ForeignExamNotMerged { exam_id } => {
                write!(f, "points into sibling exam {} which is not being merged", exam_id)
            }
        }
    }
}

/// Outcome of repairing one eye slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RefOutcome {
    Rewritten {
        image_id: String,
        confidence: ResolutionConfidence,
    },
    Nulled {
        reason: UnresolvableReason,
    },
}

/// One repaired eye slot within a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceFix {
    pub eye: Eye,
    pub old_raw: String,
    pub outcome: RefOutcome,
}

/// All slot repairs for one report, applied as a single write paired with
/// a single history append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedImagesFix {
    pub report_id: String,
    pub previous: SelectedImages,
    pub new: SelectedImages,
    pub fixes: Vec<ReferenceFix>,
}

/// Relocation of a report from a losing exam to its merge target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMove {
    pub report_id: String,
    pub from_exam_id: String,
    pub to_exam_id: String,
}

/// What to do with one image during a merge or foreign-image repair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ImageDisposition {
    /// Reassign to the merge target exam.
    Move { to_exam_id: String },
    /// URL already present on the target; drop the redundant row.
    DeleteAsDuplicate,
    /// Provenance path names a different patient; drop the association.
    DeleteAsForeign,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAction {
    pub image_id: String,
    pub from_exam_id: String,
    pub disposition: ImageDisposition,
}

/// Exam moved to a different owning patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamReassignment {
    pub exam_id: String,
    pub from_patient_id: String,
    pub to_patient_id: String,
}

/// Fields a canonical identity absorbs from its duplicates. `None` means
/// leave the stored value alone; canonical values are never overwritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientUpdate {
    pub patient_id: String,
    pub national_id: Option<String>,
    pub birth_date: Option<String>,
    pub source_system_id: Option<String>,
}

impl PatientUpdate {
    pub fn is_noop(&self) -> bool {
        self.national_id.is_none() && self.birth_date.is_none() && self.source_system_id.is_none()
    }
}

/// A surfaced condition the engine refuses to decide on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Finding {
    /// Same normalized name, conflicting well-formed national ids.
    /// Never auto-merged.
    AmbiguousIdentity {
        normalized_key: String,
        patient_ids: Vec<String>,
        national_ids: Vec<String>,
    },
    /// An exam a merge would delete but which holds a report.
    ProtectedExam { exam_id: String, reason: String },
    /// A reference the plan nulls; listed for manual reselection.
    UnresolvableReference {
        report_id: String,
        eye: Eye,
        old_raw: String,
        reason: UnresolvableReason,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::AmbiguousIdentity { normalized_key, patient_ids, national_ids } => {
                write!(
                    f,
                    "AMBIGUOUS: \"{}\" - {} identities with distinct national ids [{}]; manual review required",
                    normalized_key,
                    patient_ids.len(),
                    national_ids.join(", ")
                )
            }
            Finding::ProtectedExam { exam_id, reason } => {
                write!(f, "PROTECTED: exam {} not deleted - {}", exam_id, reason)
            }
            Finding::UnresolvableReference { report_id, eye, old_raw, reason } => {
                write!(
                    f,
                    "UNRESOLVABLE: report {} {}: \"{}\" ({})",
                    report_id,
                    eye.as_str(),
                    old_raw,
                    reason
                )
            }
        }
    }
}

/// Everything the planner decided for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationPlan {
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub report_moves: Vec<ReportMove>,
    pub selected_images_fixes: Vec<SelectedImagesFix>,
    pub image_actions: Vec<ImageAction>,
    pub exam_deletions: Vec<String>,
    pub exam_reassignments: Vec<ExamReassignment>,
    pub patient_updates: Vec<PatientUpdate>,
    pub patient_deletions: Vec<String>,
    pub findings: Vec<Finding>,
}

impl ReconciliationPlan {
    /// Whether the plan contains any mutation at all.
    pub fn is_noop(&self) -> bool {
        self.report_moves.is_empty()
            && self.selected_images_fixes.is_empty()
            && self.image_actions.is_empty()
            && self.exam_deletions.is_empty()
            && self.exam_reassignments.is_empty()
            && self.patient_updates.is_empty()
            && self.patient_deletions.is_empty()
    }
}

/// Execution mode. Dry-run is the default everywhere; execute is an
/// explicit opt-in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    DryRun,
    Execute,
}

impl RunMode {
    pub fn is_execute(&self) -> bool {
        matches!(self, RunMode::Execute)
    }
}

/// Step names for failure reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStep {
    ReportMoves,
    SelectedImagesFixes,
    ImageActions,
    ExamDeletions,
    ExamReassignments,
    PatientUpdates,
    PatientDeletions,
}

impl ExecutionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStep::ReportMoves => "report moves",
            ExecutionStep::SelectedImagesFixes => "selected-images fixes",
            ExecutionStep::ImageActions => "image moves/deletes",
            ExecutionStep::ExamDeletions => "exam deletions",
            ExecutionStep::ExamReassignments => "exam reassignments",
            ExecutionStep::PatientUpdates => "patient updates",
            ExecutionStep::PatientDeletions => "patient deletions",
        }
    }
}

/// Where a run stopped when a storage step failed. Already-applied work
/// stays applied; the counts on the report say how far it got.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartialFailure {
    pub step: ExecutionStep,
    pub detail: String,
}

/// Itemized result of a run, dry or executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub mode: RunMode,
    pub groups_found: usize,
    pub reports_moved: usize,
    pub references_rewritten: usize,
    pub references_nulled: usize,
    pub history_entries: usize,
    pub images_moved: usize,
    pub images_deleted: usize,
    pub exams_deleted: usize,
    pub exams_reassigned: usize,
    pub patients_updated: usize,
    pub patients_deleted: usize,
    pub findings: Vec<Finding>,
    pub failure: Option<PartialFailure>,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== RECONCILIATION SUMMARY ===")?;
        writeln!(
            f,
            "Mode: {}",
            if self.mode.is_execute() { "EXECUTE" } else { "DRY RUN" }
        )?;
        writeln!(f, "Duplicate groups found:   {}", self.groups_found)?;
        writeln!(f, "Reports moved:            {}", self.reports_moved)?;
        writeln!(f, "References rewritten:     {}", self.references_rewritten)?;
        writeln!(f, "References nulled:        {}", self.references_nulled)?;
        writeln!(f, "History entries appended: {}", self.history_entries)?;
        writeln!(f, "Images moved:             {}", self.images_moved)?;
        writeln!(f, "Images deleted:           {}", self.images_deleted)?;
        writeln!(f, "Exams deleted:            {}", self.exams_deleted)?;
        writeln!(f, "Exams reassigned:         {}", self.exams_reassigned)?;
        writeln!(f, "Patients updated:         {}", self.patients_updated)?;
        writeln!(f, "Patients deleted:         {}", self.patients_deleted)?;
        if !self.findings.is_empty() {
            writeln!(f, "--- findings ({}) ---", self.findings.len())?;
            for finding in &self.findings {
                writeln!(f, "  {}", finding)?;
            }
        }
        if let Some(failure) = &self.failure {
            writeln!(
                f,
                "!! STOPPED during {}: {}",
                failure.step.as_str(),
                failure.detail
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loser_ids_excludes_canonical() {
        let group = DuplicateGroup {
            normalized_key: "MARIA SILVA".into(),
            member_ids: vec!["a".into(), "b".into(), "c".into()],
            canonical_id: "b".into(),
            confidence: MatchConfidence::Strict,
        };
        let losers: Vec<_> = group.loser_ids().cloned().collect();
        assert_eq!(losers, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_plan_is_noop() {
        let mut plan = ReconciliationPlan::default();
        assert!(plan.is_noop());
        plan.exam_deletions.push("x".into());
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_default_mode_is_dry_run() {
        assert_eq!(RunMode::default(), RunMode::DryRun);
        assert!(!RunMode::default().is_execute());
    }

    #[test]
    fn test_report_display_mentions_failure() {
        let report = ExecutionReport {
            failure: Some(PartialFailure {
                step: ExecutionStep::ImageActions,
                detail: "constraint violation".into(),
            }),
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("STOPPED during image moves/deletes"));
    }
}
