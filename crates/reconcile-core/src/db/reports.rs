//! Medical report database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{MedicalReport, SelectedImages};

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<(MedicalReport, String)> {
    let selected_json: String = row.get(2)?;
    Ok((
        MedicalReport {
            id: row.get(0)?,
            exam_id: row.get(1)?,
            selected_images: SelectedImages::default(), // filled by caller from JSON
            findings: row.get(3)?,
            diagnosis: row.get(4)?,
            completed_at: row.get(5)?,
        },
        selected_json,
    ))
}

fn parse_selected(json: &str) -> SelectedImages {
    // Legacy rows hold free-form JSON; anything undecodable reads as an
    // empty selection rather than failing the whole scan.
    serde_json::from_str(json).unwrap_or_default()
}

const REPORT_COLUMNS: &str = "id, exam_id, selected_images, findings, diagnosis, completed_at";

impl Database {
    /// Insert a new report.
    pub fn insert_report(&self, report: &MedicalReport) -> DbResult<()> {
        let selected_json = serde_json::to_string(&report.selected_images)?;
        self.conn.execute(
            r#"
            INSERT INTO medical_reports (
                id, exam_id, selected_images, findings, diagnosis, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                report.id,
                report.exam_id,
                selected_json,
                report.findings,
                report.diagnosis,
                report.completed_at,
            ],
        )?;
        Ok(())
    }

    /// Get the report attached to an exam, if any.
    pub fn get_report_for_exam(&self, exam_id: &str) -> DbResult<Option<MedicalReport>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM medical_reports WHERE exam_id = ?", REPORT_COLUMNS),
                [exam_id],
                row_to_report,
            )
            .optional()?;
        Ok(row.map(|(mut report, json)| {
            report.selected_images = parse_selected(&json);
            report
        }))
    }

    /// Get a report by id.
    pub fn get_report(&self, report_id: &str) -> DbResult<Option<MedicalReport>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM medical_reports WHERE id = ?", REPORT_COLUMNS),
                [report_id],
                row_to_report,
            )
            .optional()?;
        Ok(row.map(|(mut report, json)| {
            report.selected_images = parse_selected(&json);
            report
        }))
    }

    /// Overwrite a report's image selection.
    pub fn update_selected_images(
        &self,
        report_id: &str,
        new_images: &SelectedImages,
    ) -> DbResult<bool> {
        let selected_json = serde_json::to_string(new_images)?;
        let rows_affected = self.conn.execute(
            "UPDATE medical_reports SET selected_images = ?2 WHERE id = ?1",
            params![report_id, selected_json],
        )?;
        Ok(rows_affected > 0)
    }

    /// Relocate a report to a different exam.
    pub fn move_report(&self, report_id: &str, to_exam_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE medical_reports SET exam_id = ?2 WHERE id = ?1",
            params![report_id, to_exam_id],
        )?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exam, PatientIdentity};

    fn setup_with_exam() -> (Database, Exam) {
        let db = Database::open_in_memory().unwrap();
        let patient = PatientIdentity::new("MARIA".into());
        db.insert_patient(&patient).unwrap();
        let exam = Exam::new(patient.id.clone(), "2025-03-10".into());
        db.insert_exam(&exam).unwrap();
        (db, exam)
    }

    #[test]
    fn test_insert_and_get_report() {
        let (db, exam) = setup_with_exam();

        let mut report = MedicalReport::new(exam.id.clone());
        report.selected_images.od = Some("img-1".into());
        db.insert_report(&report).unwrap();

        let retrieved = db.get_report_for_exam(&exam.id).unwrap().unwrap();
        assert_eq!(retrieved.id, report.id);
        assert_eq!(retrieved.selected_images.od, Some("img-1".into()));
        assert_eq!(retrieved.selected_images.oe, None);
    }

    #[test]
    fn test_update_selected_images() {
        let (db, exam) = setup_with_exam();

        let report = MedicalReport::new(exam.id.clone());
        db.insert_report(&report).unwrap();

        let new = SelectedImages {
            od: Some("img-od".into()),
            oe: None,
        };
        assert!(db.update_selected_images(&report.id, &new).unwrap());

        let retrieved = db.get_report(&report.id).unwrap().unwrap();
        assert_eq!(retrieved.selected_images, new);
    }

    #[test]
    fn test_move_report() {
        let (db, exam_a) = setup_with_exam();
        let patient = db.list_patients().unwrap().remove(0);
        let exam_b = Exam::new(patient.id, "2025-03-11".into());
        db.insert_exam(&exam_b).unwrap();

        let report = MedicalReport::new(exam_a.id.clone());
        db.insert_report(&report).unwrap();

        assert!(db.move_report(&report.id, &exam_b.id).unwrap());
        assert!(db.get_report_for_exam(&exam_a.id).unwrap().is_none());
        assert!(db.get_report_for_exam(&exam_b.id).unwrap().is_some());
    }

    #[test]
    fn test_undecodable_selection_reads_empty() {
        let (db, exam) = setup_with_exam();

        db.conn()
            .execute(
                "INSERT INTO medical_reports (id, exam_id, selected_images) VALUES ('r1', ?1, 'not-json')",
                [&exam.id],
            )
            .unwrap();

        let report = db.get_report_for_exam(&exam.id).unwrap().unwrap();
        assert!(report.selected_images.is_empty());
    }
}
