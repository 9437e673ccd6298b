//! Exam and exam-image database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Exam, ExamImage, ExamStatus, ImageType};

fn row_to_exam(row: &Row<'_>) -> rusqlite::Result<Exam> {
    let status: String = row.get(4)?;
    Ok(Exam {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        source_system_id: row.get(2)?,
        exam_date: row.get(3)?,
        status: ExamStatus::parse(&status),
        location: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<ExamImage> {
    let image_type: String = row.get(3)?;
    Ok(ExamImage {
        id: row.get(0)?,
        exam_id: row.get(1)?,
        url: row.get(2)?,
        image_type: ImageType::parse(&image_type),
        uploaded_at: row.get(4)?,
    })
}

const EXAM_COLUMNS: &str = "id, patient_id, source_system_id, exam_date, status, location, created_at";
const IMAGE_COLUMNS: &str = "id, exam_id, url, image_type, uploaded_at";

impl Database {
    /// Insert a new exam.
    pub fn insert_exam(&self, exam: &Exam) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO exams (
                id, patient_id, source_system_id, exam_date, status, location, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                exam.id,
                exam.patient_id,
                exam.source_system_id,
                exam.exam_date,
                exam.status.as_str(),
                exam.location,
                exam.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get an exam by id.
    pub fn get_exam(&self, id: &str) -> DbResult<Option<Exam>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM exams WHERE id = ?", EXAM_COLUMNS),
                [id],
                row_to_exam,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all exams.
    pub fn list_exams(&self) -> DbResult<Vec<Exam>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM exams ORDER BY created_at", EXAM_COLUMNS))?;
        let rows = stmt.query_map([], row_to_exam)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// List exams belonging to one patient.
    pub fn list_exams_for_patient(&self, patient_id: &str) -> DbResult<Vec<Exam>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM exams WHERE patient_id = ? ORDER BY created_at",
            EXAM_COLUMNS
        ))?;
        let rows = stmt.query_map([patient_id], row_to_exam)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Reassign an exam to a different patient.
    pub fn update_exam_owner(&self, exam_id: &str, patient_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE exams SET patient_id = ?2 WHERE id = ?1",
            params![exam_id, patient_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Delete an exam.
    pub fn delete_exam(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute("DELETE FROM exams WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Insert a new exam image.
    pub fn insert_image(&self, image: &ExamImage) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO exam_images (id, exam_id, url, image_type, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                image.id,
                image.exam_id,
                image.url,
                image.image_type.as_str(),
                image.uploaded_at,
            ],
        )?;
        Ok(())
    }

    /// List images for one exam in stable id order. The positional legacy
    /// encoding indexes into exactly this ordering.
    pub fn list_images_for_exam(&self, exam_id: &str) -> DbResult<Vec<ExamImage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM exam_images WHERE exam_id = ? ORDER BY id",
            IMAGE_COLUMNS
        ))?;
        let rows = stmt.query_map([exam_id], row_to_image)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Reassign an image to a different exam.
    pub fn move_image(&self, image_id: &str, to_exam_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE exam_images SET exam_id = ?2 WHERE id = ?1",
            params![image_id, to_exam_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Delete an image association. The stored object itself is never
    /// touched.
    pub fn delete_image(&self, image_id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM exam_images WHERE id = ?", [image_id])?;
        Ok(rows_affected > 0)
    }
}
