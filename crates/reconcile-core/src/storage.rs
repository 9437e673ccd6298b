//! Storage gateway: the narrow repository interface the engine consumes.
//!
//! Every reconciliation read and mutation goes through this trait. The
//! SQLite [`Database`](crate::db::Database) implements it for production
//! and tests; test doubles implement it to inject failures.

use crate::db::{Database, DbResult};
use crate::models::{
    Exam, ExamImage, HistoryEntry, MedicalReport, PatientIdentity, PatientUpdate, SelectedImages,
};

pub trait StorageGateway {
    fn find_patients(&self) -> DbResult<Vec<PatientIdentity>>;
    fn find_exams(&self) -> DbResult<Vec<Exam>>;
    fn find_images(&self, exam_id: &str) -> DbResult<Vec<ExamImage>>;
    fn find_report(&self, exam_id: &str) -> DbResult<Option<MedicalReport>>;

    fn update_exam_owner(&self, exam_id: &str, patient_id: &str) -> DbResult<bool>;
    fn move_image(&self, image_id: &str, to_exam_id: &str) -> DbResult<bool>;
    fn delete_image(&self, image_id: &str) -> DbResult<bool>;
    fn delete_exam(&self, exam_id: &str) -> DbResult<bool>;
    fn move_report(&self, report_id: &str, to_exam_id: &str) -> DbResult<bool>;
    fn update_selected_images(&self, report_id: &str, new_images: &SelectedImages)
        -> DbResult<bool>;
    fn append_history(&self, entry: &HistoryEntry) -> DbResult<()>;
    fn absorb_patient_fields(&self, update: &PatientUpdate) -> DbResult<bool>;
    fn delete_patient(&self, patient_id: &str) -> DbResult<bool>;
}

impl StorageGateway for Database {
    fn find_patients(&self) -> DbResult<Vec<PatientIdentity>> {
        self.list_patients()
    }

    fn find_exams(&self) -> DbResult<Vec<Exam>> {
        self.list_exams()
    }

    fn find_images(&self, exam_id: &str) -> DbResult<Vec<ExamImage>> {
        self.list_images_for_exam(exam_id)
    }

    fn find_report(&self, exam_id: &str) -> DbResult<Option<MedicalReport>> {
        self.get_report_for_exam(exam_id)
    }

    fn update_exam_owner(&self, exam_id: &str, patient_id: &str) -> DbResult<bool> {
        Database::update_exam_owner(self, exam_id, patient_id)
    }

    fn move_image(&self, image_id: &str, to_exam_id: &str) -> DbResult<bool> {
        Database::move_image(self, image_id, to_exam_id)
    }

    fn delete_image(&self, image_id: &str) -> DbResult<bool> {
        Database::delete_image(self, image_id)
    }

    fn delete_exam(&self, exam_id: &str) -> DbResult<bool> {
        Database::delete_exam(self, exam_id)
    }

    fn move_report(&self, report_id: &str, to_exam_id: &str) -> DbResult<bool> {
        Database::move_report(self, report_id, to_exam_id)
    }

    fn update_selected_images(
        &self,
        report_id: &str,
        new_images: &SelectedImages,
    ) -> DbResult<bool> {
        Database::update_selected_images(self, report_id, new_images)
    }

    fn append_history(&self, entry: &HistoryEntry) -> DbResult<()> {
        Database::append_history(self, entry)
    }

    fn absorb_patient_fields(&self, update: &PatientUpdate) -> DbResult<bool> {
        Database::absorb_patient_fields(self, update)
    }

    fn delete_patient(&self, patient_id: &str) -> DbResult<bool> {
        Database::delete_patient(self, patient_id)
    }
}
