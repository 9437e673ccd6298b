//! Patient database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{PatientIdentity, PatientUpdate};

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<PatientIdentity> {
    Ok(PatientIdentity {
        id: row.get(0)?,
        display_name: row.get(1)?,
        national_id: row.get(2)?,
        birth_date: row.get(3)?,
        source_system_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const PATIENT_COLUMNS: &str = "id, display_name, national_id, birth_date, source_system_id, created_at";

impl Database {
    /// Insert a new patient identity.
    pub fn insert_patient(&self, patient: &PatientIdentity) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO patients (
                id, display_name, national_id, birth_date, source_system_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                patient.id,
                patient.display_name,
                patient.national_id,
                patient.birth_date,
                patient.source_system_id,
                patient.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a patient by id.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<PatientIdentity>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
                [id],
                row_to_patient,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all patient identities.
    pub fn list_patients(&self) -> DbResult<Vec<PatientIdentity>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients ORDER BY display_name",
            PATIENT_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_patient)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Fill null fields on a patient from an absorption update. Stored
    /// non-null values are left alone.
    pub fn absorb_patient_fields(&self, update: &PatientUpdate) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE patients SET
                national_id = COALESCE(national_id, ?2),
                birth_date = COALESCE(birth_date, ?3),
                source_system_id = COALESCE(source_system_id, ?4)
            WHERE id = ?1
            "#,
            params![
                update.patient_id,
                update.national_id,
                update.birth_date,
                update.source_system_id,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Delete a patient identity.
    pub fn delete_patient(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM patients WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();

        let mut patient = PatientIdentity::new("MARIA DA SILVA".into());
        patient.national_id = Some("52998224725".into());

        db.insert_patient(&patient).unwrap();

        let retrieved = db.get_patient(&patient.id).unwrap().unwrap();
        assert_eq!(retrieved.display_name, "MARIA DA SILVA");
        assert_eq!(retrieved.national_id, Some("52998224725".into()));
        assert!(retrieved.source_system_id.is_none());
    }

    #[test]
    fn test_absorb_fields_keeps_existing() {
        let db = setup_db();

        let mut patient = PatientIdentity::new("JOAO".into());
        patient.birth_date = Some("1969-04-02".into());
        db.insert_patient(&patient).unwrap();

        db.absorb_patient_fields(&PatientUpdate {
            patient_id: patient.id.clone(),
            national_id: Some("52998224725".into()),
            birth_date: Some("1970-01-01".into()),
            source_system_id: None,
        })
        .unwrap();

        let retrieved = db.get_patient(&patient.id).unwrap().unwrap();
        // Null field filled, existing field untouched
        assert_eq!(retrieved.national_id, Some("52998224725".into()));
        assert_eq!(retrieved.birth_date, Some("1969-04-02".into()));
    }

    #[test]
    fn test_delete_patient() {
        let db = setup_db();

        let patient = PatientIdentity::new("JOAO".into());
        db.insert_patient(&patient).unwrap();

        assert!(db.delete_patient(&patient.id).unwrap());
        assert!(db.get_patient(&patient.id).unwrap().is_none());
        assert!(!db.delete_patient(&patient.id).unwrap());
    }
}
