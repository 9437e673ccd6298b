//! Exam and exam-image models.

use serde::{Deserialize, Serialize};

/// Workflow status of an exam.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    Pending,
    InAnalysis,
    Completed,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamStatus::Pending => "pending",
            ExamStatus::InAnalysis => "in_analysis",
            ExamStatus::Completed => "completed",
        }
    }

    /// Parse from the stored string; unknown values fall back to pending.
    pub fn parse(s: &str) -> Self {
        match s {
            "in_analysis" => ExamStatus::InAnalysis,
            "completed" => ExamStatus::Completed,
            _ => ExamStatus::Pending,
        }
    }
}

/// Capture type of an exam image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageType {
    /// Color fundus photograph - the type report selections point at.
    Color,
    /// Anterior segment capture - never valid for a fundus slot.
    Anterior,
    Unknown,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Color => "COLOR",
            ImageType::Anterior => "ANTERIOR",
            ImageType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "COLOR" => ImageType::Color,
            "ANTERIOR" => ImageType::Anterior,
            _ => ImageType::Unknown,
        }
    }
}

/// An imaging exam session.
///
/// `source_system_id` should be unique per patient; duplicates arise from
/// double-imports and are merged by the planner, never left coexisting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exam {
    pub id: String,
    pub patient_id: String,
    /// Id in the upstream source system, when imported.
    pub source_system_id: Option<String>,
    /// Date the exam was captured (RFC 3339).
    pub exam_date: String,
    pub status: ExamStatus,
    /// Clinic/unit where the exam was captured.
    pub location: Option<String>,
    pub created_at: String,
}

impl Exam {
    pub fn new(patient_id: String, exam_date: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            source_system_id: None,
            exam_date,
            status: ExamStatus::Pending,
            location: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// An image owned exclusively by one exam.
///
/// The URL points into an immutable external object store whose path
/// encodes provenance; reconciliation only ever touches the database
/// association, never the stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamImage {
    pub id: String,
    pub exam_id: String,
    pub url: String,
    pub image_type: ImageType,
    pub uploaded_at: String,
}

impl ExamImage {
    pub fn new(exam_id: String, url: String, image_type: ImageType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            exam_id,
            url,
            image_type,
            uploaded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
