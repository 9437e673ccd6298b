//! Append-only selected-images history operations.

use rusqlite::{params, Row};

use super::{Database, DbResult};
use crate::models::HistoryEntry;

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(HistoryEntry, String, String)> {
    let previous_json: String = row.get(2)?;
    let new_json: String = row.get(3)?;
    Ok((
        HistoryEntry {
            id: row.get(0)?,
            report_id: row.get(1)?,
            previous_images: Default::default(),
            new_images: Default::default(),
            changed_by: row.get(4)?,
            reason: row.get(5)?,
            content_hash: row.get(6)?,
            created_at: row.get(7)?,
        },
        previous_json,
        new_json,
    ))
}

impl Database {
    /// Append a history entry. There is no update or delete counterpart;
    /// the table's triggers reject both.
    pub fn append_history(&self, entry: &HistoryEntry) -> DbResult<()> {
        let previous_json = serde_json::to_string(&entry.previous_images)?;
        let new_json = serde_json::to_string(&entry.new_images)?;
        self.conn.execute(
            r#"
            INSERT INTO selected_images_history (
                id, report_id, previous_images, new_images,
                changed_by, reason, content_hash, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.id,
                entry.report_id,
                previous_json,
                new_json,
                entry.changed_by,
                entry.reason,
                entry.content_hash,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// List history entries for a report, oldest first.
    pub fn list_history_for_report(&self, report_id: &str) -> DbResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, report_id, previous_images, new_images,
                   changed_by, reason, content_hash, created_at
            FROM selected_images_history
            WHERE report_id = ?
            ORDER BY created_at, id
            "#,
        )?;
        let rows = stmt.query_map([report_id], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            let (mut entry, previous_json, new_json) = row?;
            entry.previous_images = serde_json::from_str(&previous_json)?;
            entry.new_images = serde_json::from_str(&new_json)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
