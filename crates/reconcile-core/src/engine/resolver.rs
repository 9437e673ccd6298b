//! Reference resolver: maps stored image references to live images.
//!
//! Resolution order: exact id match, positional index, cross-exam id on a
//! sibling being folded in. Anything else is unresolvable and will be
//! nulled (with an audit entry) rather than left dangling.

use std::collections::HashSet;

use crate::models::{
    ExamImage, ImageRef, ImageType, ResolutionConfidence, UnresolvableReason,
};

/// Result of resolving one reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        image_id: String,
        confidence: ResolutionConfidence,
    },
    Unresolvable {
        reason: UnresolvableReason,
    },
}

/// Images of one sibling exam, keyed by the sibling's exam id.
pub struct SiblingImages<'a> {
    pub exam_id: &'a str,
    pub images: &'a [ExamImage],
}

/// Resolve a reference against an exam's current image set.
///
/// `siblings` are other exams of the same patient; `folded_exam_ids` is
/// the subset the merge plan folds into this exam. A cross-exam hit on a
/// sibling outside that set stays unresolvable - the image would remain
/// on another exam and the pointer would dangle again.
///
/// Fundus slots never accept an anterior-segment image: a type-mismatched
/// hit is downgraded to unresolvable even when positionally valid, so a
/// human reselects instead of the engine guessing.
pub fn resolve(
    reference: &ImageRef,
    exam_images: &[ExamImage],
    siblings: &[SiblingImages<'_>],
    folded_exam_ids: &HashSet<String>,
) -> Resolution {
    match reference {
        ImageRef::Id(id) => {
            if let Some(image) = exam_images.iter().find(|i| i.id == *id) {
                return guarded(image, ResolutionConfidence::Exact);
            }
            resolve_cross_exam(id, siblings, folded_exam_ids)
        }
        ImageRef::Positional { index, .. } => match exam_images.get(*index) {
            Some(image) => guarded(image, ResolutionConfidence::Positional),
            None => Resolution::Unresolvable {
                reason: UnresolvableReason::IndexOutOfRange {
                    index: *index,
                    image_count: exam_images.len(),
                },
            },
        },
    }
}

fn resolve_cross_exam(
    id: &str,
    siblings: &[SiblingImages<'_>],
    folded_exam_ids: &HashSet<String>,
) -> Resolution {
    for sibling in siblings {
        if let Some(image) = sibling.images.iter().find(|i| i.id == id) {
            if folded_exam_ids.contains(sibling.exam_id) {
                return guarded(image, ResolutionConfidence::CrossExam);
            }
            return Resolution::Unresolvable {
                reason: UnresolvableReason::ForeignExamNotMerged {
                    exam_id: sibling.exam_id.to_string(),
                },
            };
        }
    }
    Resolution::Unresolvable {
        reason: UnresolvableReason::UnknownId,
    }
}

/// Apply the slot-type guard before accepting a hit.
fn guarded(image: &ExamImage, confidence: ResolutionConfidence) -> Resolution {
    if image.image_type == ImageType::Anterior {
        return Resolution::Unresolvable {
            reason: UnresolvableReason::TypeMismatch {
                image_id: image.id.clone(),
                image_type: image.image_type,
            },
        };
    }
    Resolution::Resolved {
        image_id: image.id.clone(),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, exam_id: &str, image_type: ImageType) -> ExamImage {
        ExamImage {
            id: id.into(),
            exam_id: exam_id.into(),
            url: format!("https://store/patients/MARIA_ab12cd34/{}.jpg", id),
            image_type,
            uploaded_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn no_siblings() -> Vec<SiblingImages<'static>> {
        Vec::new()
    }

    #[test]
    fn test_exact_id_resolves() {
        let images = vec![image("img-a", "e1", ImageType::Color)];
        let result = resolve(
            &ImageRef::parse("img-a"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert_eq!(
            result,
            Resolution::Resolved {
                image_id: "img-a".into(),
                confidence: ResolutionConfidence::Exact,
            }
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let images = vec![
            image("img-a", "e1", ImageType::Color),
            image("img-b", "e1", ImageType::Color),
        ];
        let reference = ImageRef::parse("img-b");
        let first = resolve(&reference, &images, &no_siblings(), &HashSet::new());
        let second = resolve(&reference, &images, &no_siblings(), &HashSet::new());
        assert_eq!(first, second);
    }

    #[test]
    fn test_positional_in_range() {
        let images = vec![
            image("img-a", "e1", ImageType::Color),
            image("img-b", "e1", ImageType::Color),
        ];
        let result = resolve(
            &ImageRef::parse("697001ce4e429636ed944c10-1"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert_eq!(
            result,
            Resolution::Resolved {
                image_id: "img-b".into(),
                confidence: ResolutionConfidence::Positional,
            }
        );
    }

    #[test]
    fn test_positional_out_of_range() {
        let images = vec![
            image("img-a", "e1", ImageType::Color),
            image("img-b", "e1", ImageType::Color),
            image("img-c", "e1", ImageType::Color),
            image("img-d", "e1", ImageType::Color),
        ];
        // Index 6 on a 4-image exam
        let result = resolve(
            &ImageRef::parse("697001ce4e429636ed944c10-6"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert_eq!(
            result,
            Resolution::Unresolvable {
                reason: UnresolvableReason::IndexOutOfRange {
                    index: 6,
                    image_count: 4
                }
            }
        );
    }

    #[test]
    fn test_type_mismatch_downgrades_positional_hit() {
        let images = vec![
            image("img-a", "e1", ImageType::Color),
            image("img-ant", "e1", ImageType::Anterior),
        ];
        let result = resolve(
            &ImageRef::parse("697001ce4e429636ed944c10-1"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert_eq!(
            result,
            Resolution::Unresolvable {
                reason: UnresolvableReason::TypeMismatch {
                    image_id: "img-ant".into(),
                    image_type: ImageType::Anterior,
                }
            }
        );
    }

    #[test]
    fn test_type_mismatch_downgrades_exact_hit() {
        let images = vec![image("img-ant", "e1", ImageType::Anterior)];
        let result = resolve(
            &ImageRef::parse("img-ant"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert!(matches!(
            result,
            Resolution::Unresolvable {
                reason: UnresolvableReason::TypeMismatch { .. }
            }
        ));
    }

    #[test]
    fn test_cross_exam_resolves_only_when_folded() {
        let images = vec![image("img-a", "e1", ImageType::Color)];
        let sibling_images = vec![image("img-sib", "e2", ImageType::Color)];
        let siblings = vec![SiblingImages {
            exam_id: "e2",
            images: &sibling_images,
        }];
        let reference = ImageRef::parse("img-sib");

        // Sibling not folded: unresolvable
        let result = resolve(&reference, &images, &siblings, &HashSet::new());
        assert_eq!(
            result,
            Resolution::Unresolvable {
                reason: UnresolvableReason::ForeignExamNotMerged {
                    exam_id: "e2".into()
                }
            }
        );

        // Sibling folded by the plan: resolves cross-exam
        let folded: HashSet<String> = ["e2".to_string()].into();
        let result = resolve(&reference, &images, &siblings, &folded);
        assert_eq!(
            result,
            Resolution::Resolved {
                image_id: "img-sib".into(),
                confidence: ResolutionConfidence::CrossExam,
            }
        );
    }

    #[test]
    fn test_unknown_id_unresolvable() {
        let images = vec![image("img-a", "e1", ImageType::Color)];
        let result = resolve(
            &ImageRef::parse("cmlb6xk2p0001"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert_eq!(
            result,
            Resolution::Unresolvable {
                reason: UnresolvableReason::UnknownId
            }
        );
    }

    #[test]
    fn test_unknown_type_allowed_in_slot() {
        let images = vec![image("img-u", "e1", ImageType::Unknown)];
        let result = resolve(
            &ImageRef::parse("img-u"),
            &images,
            &no_siblings(),
            &HashSet::new(),
        );
        assert!(matches!(result, Resolution::Resolved { .. }));
    }
}
