//! SQLite schema definition.

/// Complete database schema.
///
/// Referential integrity for `selected_images` is deliberately absent at
/// the schema level - those references live inside a JSON column and are
/// validated exclusively through the reference resolver. Likewise there
/// is no UNIQUE constraint on `(patient_id, source_system_id)` or
/// `(exam_id, url)`: the duplicate states the engine repairs must be
/// representable.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    national_id TEXT,
    birth_date TEXT,
    source_system_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(display_name);
CREATE INDEX IF NOT EXISTS idx_patients_source_id ON patients(source_system_id);

-- ============================================================================
-- Exams
-- ============================================================================

CREATE TABLE IF NOT EXISTS exams (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    source_system_id TEXT,
    exam_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_analysis', 'completed')),
    location TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_exams_patient ON exams(patient_id);
CREATE INDEX IF NOT EXISTS idx_exams_source_id ON exams(source_system_id);

-- ============================================================================
-- Exam Images
-- ============================================================================

CREATE TABLE IF NOT EXISTS exam_images (
    id TEXT PRIMARY KEY,
    exam_id TEXT NOT NULL REFERENCES exams(id),
    url TEXT NOT NULL,
    image_type TEXT NOT NULL DEFAULT 'UNKNOWN'
        CHECK (image_type IN ('COLOR', 'ANTERIOR', 'UNKNOWN')),
    uploaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_images_exam ON exam_images(exam_id);
CREATE INDEX IF NOT EXISTS idx_images_url ON exam_images(url);

-- ============================================================================
-- Medical Reports (1:1 with exams)
-- ============================================================================

CREATE TABLE IF NOT EXISTS medical_reports (
    id TEXT PRIMARY KEY,
    exam_id TEXT NOT NULL UNIQUE REFERENCES exams(id),
    selected_images TEXT NOT NULL DEFAULT '{}',   -- JSON object {od, oe}
    findings TEXT,
    diagnosis TEXT,
    completed_at TEXT
);

-- ============================================================================
-- Selected Images History (Append-Only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS selected_images_history (
    id TEXT PRIMARY KEY,
    report_id TEXT NOT NULL REFERENCES medical_reports(id),
    previous_images TEXT NOT NULL,                -- JSON object {od, oe}
    new_images TEXT NOT NULL,                     -- JSON object {od, oe}
    changed_by TEXT NOT NULL,
    reason TEXT NOT NULL,
    content_hash TEXT NOT NULL,                   -- SHA-256 of (report_id, previous, new)
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_history_report ON selected_images_history(report_id);

-- History rows are never updated or deleted
CREATE TRIGGER IF NOT EXISTS history_no_update BEFORE UPDATE ON selected_images_history
BEGIN
    SELECT RAISE(ABORT, 'selected_images_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS history_no_delete BEFORE DELETE ON selected_images_history
BEGIN
    SELECT RAISE(ABORT, 'selected_images_history is append-only');
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_history_append_only() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO patients (id, display_name) VALUES ('p1', 'MARIA')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO exams (id, patient_id, exam_date) VALUES ('e1', 'p1', '2025-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO medical_reports (id, exam_id) VALUES ('r1', 'e1')",
            [],
        )
        .unwrap();
        conn.execute(
            r#"INSERT INTO selected_images_history
               (id, report_id, previous_images, new_images, changed_by, reason, content_hash)
               VALUES ('h1', 'r1', '{}', '{}', 'test', 'test', 'abc')"#,
            [],
        )
        .unwrap();

        let update = conn.execute(
            "UPDATE selected_images_history SET reason = 'edited' WHERE id = 'h1'",
            [],
        );
        assert!(update.is_err());

        let delete = conn.execute("DELETE FROM selected_images_history WHERE id = 'h1'", []);
        assert!(delete.is_err());
    }

    #[test]
    fn test_duplicate_source_ids_representable() {
        // The dirty state the engine exists to repair must insert cleanly.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO patients (id, display_name) VALUES ('p1', 'MARIA')",
            [],
        )
        .unwrap();
        for exam_id in ["e1", "e2"] {
            conn.execute(
                "INSERT INTO exams (id, patient_id, source_system_id, exam_date) VALUES (?1, 'p1', 'X123', '2025-01-01')",
                [exam_id],
            )
            .unwrap();
        }
    }
}
