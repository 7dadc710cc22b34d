//! Decision log database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::audit::{hash_record, AuditEntry, DecisionRecord, GENESIS_HASH};

/// Append a record to the chain. Call inside the commit transaction.
pub(super) fn append_decision(conn: &Connection, record: &DecisionRecord) -> DbResult<AuditEntry> {
    let prev_hash: String = conn
        .query_row(
            "SELECT entry_hash FROM decision_log ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let entry_hash =
        hash_record(&prev_hash, record).map_err(|e| DbError::Constraint(e.to_string()))?;

    conn.execute(
        r#"
        INSERT INTO decision_log (
            prescription_id, action, from_status, to_status, reviewer,
            notes, linked_order_id, payload, prev_hash, entry_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            record.prescription_id,
            record.action,
            record.from_status,
            record.to_status,
            record.reviewer,
            record.notes,
            record.linked_order_id,
            record.payload,
            prev_hash,
            entry_hash,
        ],
    )?;
    let seq = conn.last_insert_rowid();

    let created_at: String = conn.query_row(
        "SELECT created_at FROM decision_log WHERE seq = ?",
        [seq],
        |row| row.get(0),
    )?;

    Ok(AuditEntry {
        seq,
        record: record.clone(),
        prev_hash,
        entry_hash,
        created_at,
    })
}

impl Database {
    /// Full decision log in chain order.
    pub fn list_decision_log(&self) -> DbResult<Vec<AuditEntry>> {
        self.query_decision_log(None)
    }

    /// Decision log entries for one prescription, in chain order.
    pub fn list_decisions_for(&self, prescription_id: &str) -> DbResult<Vec<AuditEntry>> {
        self.query_decision_log(Some(prescription_id))
    }

    fn query_decision_log(&self, prescription_id: Option<&str>) -> DbResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, prescription_id, action, from_status, to_status, reviewer,
                   notes, linked_order_id, payload, prev_hash, entry_hash, created_at
            FROM decision_log
            WHERE ?1 IS NULL OR prescription_id = ?1
            ORDER BY seq
            "#,
        )?;

        let rows = stmt.query_map([prescription_id], |row| {
            Ok(AuditEntry {
                seq: row.get(0)?,
                record: DecisionRecord {
                    prescription_id: row.get(1)?,
                    action: row.get(2)?,
                    from_status: row.get(3)?,
                    to_status: row.get(4)?,
                    reviewer: row.get(5)?,
                    notes: row.get(6)?,
                    linked_order_id: row.get(7)?,
                    payload: row.get(8)?,
                },
                prev_hash: row.get(9)?,
                entry_hash: row.get(10)?,
                created_at: row.get(11)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
