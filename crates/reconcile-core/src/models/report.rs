//! Medical report, image-selection references, and the audit history model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Eye slot in a report's image selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    /// Right eye (oculus dexter).
    Od,
    /// Left eye (oculus sinister, "oe" in the stored JSON).
    Oe,
}

impl Eye {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eye::Od => "od",
            Eye::Oe => "oe",
        }
    }
}

/// The raw `{od, oe}` image-selection map stored on a report.
///
/// Values are uninterpreted strings until decoded into [`ImageRef`]s; the
/// database enforces nothing about them, which is exactly why the
/// reconciliation engine exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectedImages {
    pub od: Option<String>,
    pub oe: Option<String>,
}

impl SelectedImages {
    pub fn get(&self, eye: Eye) -> Option<&str> {
        match eye {
            Eye::Od => self.od.as_deref(),
            Eye::Oe => self.oe.as_deref(),
        }
    }

    pub fn set(&mut self, eye: Eye, value: Option<String>) {
        match eye {
            Eye::Od => self.od = value,
            Eye::Oe => self.oe = value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.od.is_none() && self.oe.is_none()
    }
}

/// A stored image reference, decoded once at the boundary.
///
/// The selection format evolved without migration: current records hold
/// opaque image ids, legacy records hold `<prefix>-<index>` positional
/// pointers into the exam's ordered image list, and some point at images
/// of a sibling duplicate exam. Cross-exam classification happens at
/// resolution time since it depends on the merge plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ImageRef {
    /// Opaque id expected to match an `ExamImage.id`.
    Id(String),
    /// Legacy positional encoding `<prefix>-<index>`.
    Positional { prefix: String, index: usize },
}

impl ImageRef {
    /// Decode a raw stored value. A trailing `-<digits>` suffix marks a
    /// positional reference; everything else is an opaque id.
    pub fn parse(raw: &str) -> ImageRef {
        if let Some(pos) = raw.rfind('-') {
            let (prefix, suffix) = (&raw[..pos], &raw[pos + 1..]);
            if !prefix.is_empty() && !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(index) = suffix.parse::<usize>() {
                    return ImageRef::Positional {
                        prefix: prefix.to_string(),
                        index,
                    };
                }
            }
        }
        ImageRef::Id(raw.to_string())
    }

    /// The raw form as originally stored.
    pub fn as_raw(&self) -> String {
        match self {
            ImageRef::Id(id) => id.clone(),
            ImageRef::Positional { prefix, index } => format!("{}-{}", prefix, index),
        }
    }
}

/// A medical report, 1:1 with its exam.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalReport {
    pub id: String,
    pub exam_id: String,
    pub selected_images: SelectedImages,
    pub findings: Option<String>,
    pub diagnosis: Option<String>,
    pub completed_at: Option<String>,
}

impl MedicalReport {
    pub fn new(exam_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            exam_id,
            selected_images: SelectedImages::default(),
            findings: None,
            diagnosis: None,
            completed_at: None,
        }
    }
}

/// Append-only audit entry for a `selected_images` mutation.
///
/// Every automated write to a report's selection pairs with exactly one
/// of these; the content hash makes after-the-fact tampering detectable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub report_id: String,
    pub previous_images: SelectedImages,
    pub new_images: SelectedImages,
    /// Actor tag, e.g. `engine:reconcile`.
    pub changed_by: String,
    pub reason: String,
    /// SHA-256 over (report_id, previous, new), hex encoded.
    pub content_hash: String,
    pub created_at: String,
}

impl HistoryEntry {
    pub fn new(
        report_id: String,
        previous_images: SelectedImages,
        new_images: SelectedImages,
        changed_by: String,
        reason: String,
    ) -> Self {
        let content_hash = Self::hash_content(&report_id, &previous_images, &new_images);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            report_id,
            previous_images,
            new_images,
            changed_by,
            reason,
            content_hash,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn hash_content(report_id: &str, previous: &SelectedImages, new: &SelectedImages) -> String {
        let mut hasher = Sha256::new();
        hasher.update(report_id.as_bytes());
        hasher.update(b"|");
        hasher.update(serde_json::to_string(previous).unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(serde_json::to_string(new).unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute the hash and compare against the stored one.
    pub fn verify_hash(&self) -> bool {
        Self::hash_content(&self.report_id, &self.previous_images, &self.new_images)
            == self.content_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opaque_id() {
        // Current-format id: trailing segment is not all digits
        let r = ImageRef::parse("img-fa3f5498-ad73-4bd8-a530-b758e9f50580.jpg");
        assert_eq!(
            r,
            ImageRef::Id("img-fa3f5498-ad73-4bd8-a530-b758e9f50580.jpg".into())
        );
    }

    #[test]
    fn test_parse_positional() {
        let r = ImageRef::parse("697001ce4e429636ed944c10-5");
        assert_eq!(
            r,
            ImageRef::Positional {
                prefix: "697001ce4e429636ed944c10".into(),
                index: 5
            }
        );
    }

    #[test]
    fn test_parse_sibling_style_id() {
        // Ids from deleted sibling exams have no index suffix
        let r = ImageRef::parse("cmlb6xk2p0001");
        assert_eq!(r, ImageRef::Id("cmlb6xk2p0001".into()));
    }

    #[test]
    fn test_parse_raw_roundtrip() {
        for raw in ["abc-12", "img-uuid.jpg", "plain"] {
            assert_eq!(ImageRef::parse(raw).as_raw(), raw);
        }
    }

    #[test]
    fn test_selected_images_accessors() {
        let mut si = SelectedImages::default();
        assert!(si.is_empty());
        si.set(Eye::Od, Some("a".into()));
        assert_eq!(si.get(Eye::Od), Some("a"));
        assert_eq!(si.get(Eye::Oe), None);
        assert!(!si.is_empty());
    }

    #[test]
    fn test_history_hash_verifies() {
        let entry = HistoryEntry::new(
            "report-1".into(),
            SelectedImages {
                od: Some("old-od".into()),
                oe: None,
            },
            SelectedImages::default(),
            "engine:reconcile".into(),
            "nulled unresolvable reference".into(),
        );
        assert!(entry.verify_hash());

        let mut tampered = entry.clone();
        tampered.new_images.od = Some("sneaky".into());
        assert!(!tampered.verify_hash());
    }
}
