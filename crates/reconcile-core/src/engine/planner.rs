//! Merge planner: turns duplicate groups and broken references into an
//! executable reconciliation plan.
//!
//! Planning is pure - it reads an in-memory [`RecordSet`] snapshot and
//! produces data. Nothing here touches storage.

use std::collections::{HashMap, HashSet};

use crate::models::{
    DuplicateGroup, Exam, ExamImage, ExamReassignment, ExamStatus, Eye, Finding, ImageAction,
    ImageDisposition, MedicalReport, PatientIdentity, PatientUpdate, ReconciliationPlan, RefOutcome,
    ReferenceFix, ReportMove, SelectedImagesFix, ImageRef,
};

use super::provenance::provenance_name;
use super::resolver::{self, Resolution, SiblingImages};
use super::NameNormalizer;

/// In-memory snapshot of the records under reconciliation.
#[derive(Debug, Default)]
pub struct RecordSet {
    pub patients: Vec<PatientIdentity>,
    pub exams: Vec<Exam>,
    /// Images keyed by exam id, in stable id order.
    pub images: HashMap<String, Vec<ExamImage>>,
    /// Reports keyed by exam id.
    pub reports: HashMap<String, MedicalReport>,
}

impl RecordSet {
    pub fn patient(&self, id: &str) -> Option<&PatientIdentity> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn exam(&self, id: &str) -> Option<&Exam> {
        self.exams.iter().find(|e| e.id == id)
    }

    pub fn exams_for_patient(&self, patient_id: &str) -> Vec<&Exam> {
        self.exams
            .iter()
            .filter(|e| e.patient_id == patient_id)
            .collect()
    }

    pub fn images_for(&self, exam_id: &str) -> &[ExamImage] {
        self.images.get(exam_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn report_for(&self, exam_id: &str) -> Option<&MedicalReport> {
        self.reports.get(exam_id)
    }

    pub fn image_by_id(&self, image_id: &str) -> Option<&ExamImage> {
        self.images
            .values()
            .flat_map(|images| images.iter())
            .find(|i| i.id == image_id)
    }

    /// Attached-exam count per patient, for the canonical tie-break.
    pub fn exam_counts(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for exam in &self.exams {
            *counts.entry(exam.patient_id.clone()).or_default() += 1;
        }
        counts
    }
}

/// Merge planner.
pub struct MergePlanner {
    normalizer: NameNormalizer,
}

impl Default for MergePlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MergePlanner {
    pub fn new() -> Self {
        Self {
            normalizer: NameNormalizer::new(),
        }
    }

    /// Build a full plan for the snapshot: foreign-image removal,
    /// duplicate-exam merges, patient-group consolidation, and
    /// selected-images repair - in that order, so reference resolution
    /// sees the post-merge image sets.
    pub fn plan(&self, records: &RecordSet, groups: &[DuplicateGroup]) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan {
            duplicate_groups: groups.to_vec(),
            ..Default::default()
        };
        let mut ctx = PlanContext::default();

        self.plan_foreign_images(records, &mut plan, &mut ctx);
        self.plan_duplicate_exams(records, &mut plan, &mut ctx);
        self.plan_patient_groups(records, groups, &mut plan, &mut ctx);
        self.plan_reference_fixes(records, groups, &mut plan, &ctx);

        plan
    }

    /// Flag images whose storage path names a different patient than the
    /// owning exam's. The object store path is authoritative provenance;
    /// removal only drops the database association.
    fn plan_foreign_images(
        &self,
        records: &RecordSet,
        plan: &mut ReconciliationPlan,
        ctx: &mut PlanContext,
    ) {
        for exam in &records.exams {
            let Some(patient) = records.patient(&exam.patient_id) else {
                continue;
            };
            let patient_key = self.normalizer.strict_key(&patient.display_name);
            for image in records.images_for(&exam.id) {
                let Some(encoded_name) = provenance_name(&image.url) else {
                    continue;
                };
                if self.normalizer.strict_key(&encoded_name) != patient_key {
                    plan.image_actions.push(ImageAction {
                        image_id: image.id.clone(),
                        from_exam_id: exam.id.clone(),
                        disposition: ImageDisposition::DeleteAsForeign,
                    });
                    ctx.foreign_ids.insert(image.id.clone());
                }
            }
        }
    }

    /// Merge exams that share a source-system id under one patient.
    fn plan_duplicate_exams(
        &self,
        records: &RecordSet,
        plan: &mut ReconciliationPlan,
        ctx: &mut PlanContext,
    ) {
        for patient in &records.patients {
            let mut by_source: HashMap<&str, Vec<&Exam>> = HashMap::new();
            for exam in records.exams_for_patient(&patient.id) {
                if let Some(source_id) = exam.source_system_id.as_deref() {
                    by_source.entry(source_id).or_default().push(exam);
                }
            }

            let mut source_ids: Vec<&&str> = by_source.keys().collect();
            source_ids.sort();
            for source_id in source_ids {
                let group = &by_source[*source_id];
                if group.len() < 2 {
                    continue;
                }
                let mut ordered = group.clone();
                ordered.sort_by(|a, b| exam_richness(records, a, b));
                let target = ordered[0];
                for loser in &ordered[1..] {
                    self.merge_exams(records, target, loser, plan, ctx);
                }
            }
        }
    }

    /// Consolidate each duplicate-identity group onto its canonical
    /// member.
    fn plan_patient_groups(
        &self,
        records: &RecordSet,
        groups: &[DuplicateGroup],
        plan: &mut ReconciliationPlan,
        ctx: &mut PlanContext,
    ) {
        for group in groups {
            let Some(canonical) = records.patient(&group.canonical_id) else {
                continue;
            };

            // Canonical absorbs fields it lacks from its duplicates;
            // canonical values are never overwritten.
            let mut update = PatientUpdate {
                patient_id: canonical.id.clone(),
                ..Default::default()
            };
            for loser_id in group.loser_ids() {
                let Some(loser) = records.patient(loser_id) else {
                    continue;
                };
                if canonical.national_id.is_none() && update.national_id.is_none() {
                    update.national_id = loser.national_id.clone();
                }
                if canonical.birth_date.is_none() && update.birth_date.is_none() {
                    update.birth_date = loser.birth_date.clone();
                }
                if canonical.source_system_id.is_none() && update.source_system_id.is_none() {
                    update.source_system_id = loser.source_system_id.clone();
                }
            }
            if !update.is_noop() {
                plan.patient_updates.push(update);
            }

            for loser_id in group.loser_ids() {
                for exam in records.exams_for_patient(loser_id) {
                    if ctx.disposed_exams.contains(&exam.id) {
                        continue;
                    }
                    self.dispose_loser_exam(records, canonical, exam, plan, ctx);
                }
                plan.patient_deletions.push(loser_id.clone());
            }
        }
    }

    /// Move one exam off a losing identity: merge it with a canonical
    /// exam sharing its source-system id, or reassign ownership.
    fn dispose_loser_exam(
        &self,
        records: &RecordSet,
        canonical: &PatientIdentity,
        exam: &Exam,
        plan: &mut ReconciliationPlan,
        ctx: &mut PlanContext,
    ) {
        let counterpart = exam.source_system_id.as_deref().and_then(|source_id| {
            records
                .exams_for_patient(&canonical.id)
                .into_iter()
                .find(|e| {
                    e.source_system_id.as_deref() == Some(source_id)
                        && !ctx.disposed_exams.contains(&e.id)
                })
        });

        let Some(counterpart) = counterpart else {
            plan.exam_reassignments.push(ExamReassignment {
                exam_id: exam.id.clone(),
                from_patient_id: exam.patient_id.clone(),
                to_patient_id: canonical.id.clone(),
            });
            return;
        };

        // Richer exam survives, regardless of which patient holds it now.
        let (target, source) = if exam_richness(records, exam, counterpart).is_lt() {
            (exam, counterpart)
        } else {
            (counterpart, exam)
        };

        if target.patient_id != canonical.id {
            plan.exam_reassignments.push(ExamReassignment {
                exam_id: target.id.clone(),
                from_patient_id: target.patient_id.clone(),
                to_patient_id: canonical.id.clone(),
            });
        }

        let merged = self.merge_exams(records, target, source, plan, ctx);
        if !merged && source.patient_id != canonical.id {
            // Protected duplicate: the source exam survives, but it still
            // has to leave the identity being deleted.
            plan.exam_reassignments.push(ExamReassignment {
                exam_id: source.id.clone(),
                from_patient_id: source.patient_id.clone(),
                to_patient_id: canonical.id.clone(),
            });
        }
    }

    /// Fold `loser` into `target`: dispose of its images, relocate its
    /// report if the target has none, then delete it.
    ///
    /// Returns false without planning anything when both exams hold
    /// reports - an exam with a report is never deleted automatically.
    fn merge_exams(
        &self,
        records: &RecordSet,
        target: &Exam,
        loser: &Exam,
        plan: &mut ReconciliationPlan,
        ctx: &mut PlanContext,
    ) -> bool {
        let loser_report = records.report_for(&loser.id);
        let target_report = records.report_for(&target.id);

        if loser_report.is_some() && target_report.is_some() {
            plan.findings.push(Finding::ProtectedExam {
                exam_id: loser.id.clone(),
                reason: format!(
                    "holds a medical report and merge target {} already has one",
                    target.id
                ),
            });
            return false;
        }

        // URL -> surviving image id on the target
        let mut urls_on_target: HashMap<&str, &str> = records
            .images_for(&target.id)
            .iter()
            .filter(|i| !ctx.foreign_ids.contains(&i.id))
            .map(|i| (i.url.as_str(), i.id.as_str()))
            .collect();

        for image in records.images_for(&loser.id) {
            if ctx.foreign_ids.contains(&image.id) {
                continue; // already planned for removal
            }
            if let Some(survivor) = urls_on_target.get(image.url.as_str()) {
                plan.image_actions.push(ImageAction {
                    image_id: image.id.clone(),
                    from_exam_id: loser.id.clone(),
                    disposition: ImageDisposition::DeleteAsDuplicate,
                });
                ctx.duplicate_survivors
                    .insert(image.id.clone(), (*survivor).to_string());
            } else {
                plan.image_actions.push(ImageAction {
                    image_id: image.id.clone(),
                    from_exam_id: loser.id.clone(),
                    disposition: ImageDisposition::Move {
                        to_exam_id: target.id.clone(),
                    },
                });
                urls_on_target.insert(image.url.as_str(), image.id.as_str());
            }
        }

        if let (Some(report), None) = (loser_report, target_report) {
            plan.report_moves.push(ReportMove {
                report_id: report.id.clone(),
                from_exam_id: loser.id.clone(),
                to_exam_id: target.id.clone(),
            });
        }

        plan.exam_deletions.push(loser.id.clone());
        ctx.folded.insert(loser.id.clone(), target.id.clone());
        ctx.disposed_exams.insert(loser.id.clone());
        true
    }

    /// Repair every report's selected-images map against the post-merge
    /// image sets. Unresolvable references are nulled; each rewritten
    /// report gets exactly one history entry at execution time.
    fn plan_reference_fixes(
        &self,
        records: &RecordSet,
        groups: &[DuplicateGroup],
        plan: &mut ReconciliationPlan,
        ctx: &PlanContext,
    ) {
        // patient id -> ids of all identities in the same group
        let mut group_peers: HashMap<&str, Vec<&str>> = HashMap::new();
        for group in groups {
            for member in &group.member_ids {
                group_peers.insert(
                    member.as_str(),
                    group.member_ids.iter().map(String::as_str).collect(),
                );
            }
        }

        let dispositions = image_dispositions(plan);

        let mut exam_ids: Vec<&String> = records.reports.keys().collect();
        exam_ids.sort();
        for exam_id in exam_ids {
            let report = &records.reports[exam_id];
            let effective_exam_id = ctx.resolve_fold(exam_id);
            let Some(effective_exam) = records.exam(effective_exam_id) else {
                continue;
            };

            let post_images = post_merge_images(records, effective_exam_id, &dispositions);

            // Sibling exams: every other exam of this person, across all
            // identities in the same duplicate group.
            let owner_ids: Vec<&str> = group_peers
                .get(effective_exam.patient_id.as_str())
                .cloned()
                .unwrap_or_else(|| vec![effective_exam.patient_id.as_str()]);
            let sibling_exams: Vec<&Exam> = owner_ids
                .iter()
                .flat_map(|pid| records.exams_for_patient(pid))
                .filter(|e| e.id != *effective_exam_id)
                .collect();
            let siblings: Vec<SiblingImages<'_>> = sibling_exams
                .iter()
                .map(|e| SiblingImages {
                    exam_id: &e.id,
                    images: records.images_for(&e.id),
                })
                .collect();
            let folded_into_effective: HashSet<String> = ctx
                .folded
                .keys()
                .filter(|loser| ctx.resolve_fold(loser) == effective_exam_id)
                .cloned()
                .collect();

            let mut new_images = report.selected_images.clone();
            let mut fixes = Vec::new();

            for eye in [Eye::Od, Eye::Oe] {
                let Some(raw) = report.selected_images.get(eye) else {
                    continue;
                };
                let reference = ImageRef::parse(raw);
                let resolution =
                    resolver::resolve(&reference, &post_images, &siblings, &folded_into_effective);

                let outcome = match resolution {
                    Resolution::Resolved { image_id, confidence } => {
                        // A hit on an image planned for duplicate-deletion
                        // maps to the surviving copy on the target.
                        let final_id = ctx
                            .duplicate_survivors
                            .get(&image_id)
                            .cloned()
                            .unwrap_or(image_id);
                        RefOutcome::Rewritten {
                            image_id: final_id,
                            confidence,
                        }
                    }
                    Resolution::Unresolvable { reason } => {
                        plan.findings.push(Finding::UnresolvableReference {
                            report_id: report.id.clone(),
                            eye,
                            old_raw: raw.to_string(),
                            reason: reason.clone(),
                        });
                        RefOutcome::Nulled { reason }
                    }
                };

                let new_value = match &outcome {
                    RefOutcome::Rewritten { image_id, .. } => Some(image_id.clone()),
                    RefOutcome::Nulled { .. } => None,
                };
                if new_value.as_deref() != Some(raw) {
                    new_images.set(eye, new_value);
                    fixes.push(ReferenceFix {
                        eye,
                        old_raw: raw.to_string(),
                        outcome,
                    });
                }
            }

            if !fixes.is_empty() {
                plan.selected_images_fixes.push(SelectedImagesFix {
                    report_id: report.id.clone(),
                    previous: report.selected_images.clone(),
                    new: new_images,
                    fixes,
                });
            }
        }
    }
}

/// Mutable bookkeeping shared across planning phases.
#[derive(Debug, Default)]
struct PlanContext {
    /// Images flagged foreign by the provenance scan.
    foreign_ids: HashSet<String>,
    /// Losing exam id -> merge target id.
    folded: HashMap<String, String>,
    /// Exams already planned for deletion.
    disposed_exams: HashSet<String>,
    /// Duplicate-deleted image id -> surviving image id on the target.
    duplicate_survivors: HashMap<String, String>,
}

impl PlanContext {
    /// Follow fold chains to the surviving exam.
    fn resolve_fold<'a>(&'a self, exam_id: &'a str) -> &'a str {
        let mut current = exam_id;
        let mut hops = 0;
        while let Some(next) = self.folded.get(current) {
            current = next;
            hops += 1;
            if hops > self.folded.len() {
                break; // cycle guard; folds never cycle by construction
            }
        }
        current
    }
}

/// Ordering that sorts the preferred merge target first: report presence,
/// image count, completed status, then earliest creation.
fn exam_richness(records: &RecordSet, a: &Exam, b: &Exam) -> std::cmp::Ordering {
    let a_report = records.report_for(&a.id).is_some();
    let b_report = records.report_for(&b.id).is_some();
    b_report
        .cmp(&a_report)
        .then_with(|| {
            records
                .images_for(&b.id)
                .len()
                .cmp(&records.images_for(&a.id).len())
        })
        .then_with(|| {
            let a_done = a.status == ExamStatus::Completed;
            let b_done = b.status == ExamStatus::Completed;
            b_done.cmp(&a_done)
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Owned snapshot of the plan's image dispositions, keyed by image id.
/// Owned so the planning loop stays free to append findings and fixes.
fn image_dispositions(plan: &ReconciliationPlan) -> HashMap<String, ImageDisposition> {
    plan.image_actions
        .iter()
        .map(|action| (action.image_id.clone(), action.disposition.clone()))
        .collect()
}

/// The image list an exam will hold after the plan applies, in stable id
/// order - the list positional references index into.
fn post_merge_images(
    records: &RecordSet,
    exam_id: &str,
    dispositions: &HashMap<String, ImageDisposition>,
) -> Vec<ExamImage> {
    let mut images: Vec<ExamImage> = records
        .images_for(exam_id)
        .iter()
        .filter(|image| match dispositions.get(image.id.as_str()) {
            None => true,
            Some(ImageDisposition::Move { to_exam_id }) => to_exam_id == exam_id,
            Some(_) => false,
        })
        .cloned()
        .collect();

    for (action_id, disposition) in dispositions {
        if let ImageDisposition::Move { to_exam_id } = disposition {
            if to_exam_id == exam_id {
                if let Some(image) = records.image_by_id(action_id) {
                    if image.exam_id != exam_id {
                        images.push(image.clone());
                    }
                }
            }
        }
    }

    images.sort_by(|a, b| a.id.cmp(&b.id));
    images
}
