//! Prescription and line database operations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::audit::append_decision;
use super::{Database, DbError, DbResult};
use crate::audit::{AuditEntry, DecisionRecord};
use crate::models::{
    LineMapping, LineOrigin, Prescription, PrescriptionLine, PrescriptionStatus, VerifiedFields,
};

const PRESCRIPTION_COLUMNS: &str = "id, image_uri, uploaded_at, status, overall_confidence, \
     pharmacist_notes, linked_order_id, version, updated_at";

const LINE_COLUMNS: &str = "id, prescription_id, position, origin, extracted_name, \
     extracted_dosage, extracted_frequency, extracted_instructions, verified, confidence, \
     mapping_status, mapped_product_id, suggested_product_ids";

/// Result of a compare-and-set commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Written; carries the new version and the audit entry if one was appended
    Committed {
        version: u64,
        audit: Option<AuditEntry>,
    },
    /// Stored version no longer matched; nothing was written
    VersionConflict,
}

impl Database {
    /// Insert a new prescription.
    pub fn insert_prescription(&self, prescription: &Prescription) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO prescriptions (
                id, image_uri, uploaded_at, status, overall_confidence,
                pharmacist_notes, linked_order_id, version, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                prescription.id,
                prescription.image_uri,
                format_timestamp(&prescription.uploaded_at),
                prescription.status.as_str(),
                prescription.overall_confidence,
                prescription.pharmacist_notes,
                prescription.linked_order_id,
                prescription.version as i64,
                format_timestamp(&prescription.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Get a prescription by ID.
    pub fn get_prescription(&self, id: &str) -> DbResult<Option<Prescription>> {
        let sql = format!("SELECT {} FROM prescriptions WHERE id = ?", PRESCRIPTION_COLUMNS);
        self.conn
            .query_row(&sql, [id], prescription_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List prescriptions in one status, oldest upload first.
    pub fn list_prescriptions_by_status(
        &self,
        status: PrescriptionStatus,
    ) -> DbResult<Vec<Prescription>> {
        let sql = format!(
            "SELECT {} FROM prescriptions WHERE status = ? ORDER BY uploaded_at",
            PRESCRIPTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([status.as_str()], prescription_row)?;

        let mut prescriptions = Vec::new();
        for row in rows {
            prescriptions.push(row?.try_into()?);
        }
        Ok(prescriptions)
    }

    /// Lines of a prescription in display order.
    pub fn get_lines(&self, prescription_id: &str) -> DbResult<Vec<PrescriptionLine>> {
        let sql = format!(
            "SELECT {} FROM prescription_lines WHERE prescription_id = ? ORDER BY position",
            LINE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([prescription_id], line_row)?;

        let mut lines = Vec::new();
        for row in rows {
            lines.push(row?.try_into()?);
        }
        Ok(lines)
    }

    /// Atomically write a prescription, replace its lines, and optionally
    /// append a decision to the audit chain.
    ///
    /// The write only happens if the stored version still equals
    /// `expected_version`; the stored version becomes `expected_version + 1`.
    /// Any failure rolls the whole transaction back.
    pub fn commit_prescription(
        &mut self,
        prescription: &Prescription,
        lines: &[PrescriptionLine],
        expected_version: u64,
        record: Option<&DecisionRecord>,
    ) -> DbResult<CommitOutcome> {
        let new_version = expected_version + 1;
        let tx = self.conn.transaction()?;

        let updated = tx.execute(
            r#"
            UPDATE prescriptions SET
                status = ?3,
                overall_confidence = ?4,
                pharmacist_notes = ?5,
                linked_order_id = ?6,
                version = ?7,
                updated_at = ?8
            WHERE id = ?1 AND version = ?2
            "#,
            params![
                prescription.id,
                expected_version as i64,
                prescription.status.as_str(),
                prescription.overall_confidence,
                prescription.pharmacist_notes,
                prescription.linked_order_id,
                new_version as i64,
                format_timestamp(&prescription.updated_at),
            ],
        )?;

        if updated == 0 {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT version FROM prescriptions WHERE id = ?",
                    [&prescription.id],
                    |row| row.get(0),
                )
                .optional()?;
            return match exists {
                Some(_) => Ok(CommitOutcome::VersionConflict),
                None => Err(DbError::NotFound(prescription.id.clone())),
            };
        }

        replace_lines(&tx, &prescription.id, lines)?;

        let audit = match record {
            Some(record) => Some(append_decision(&tx, record)?),
            None => None,
        };

        tx.commit()?;
        Ok(CommitOutcome::Committed {
            version: new_version,
            audit,
        })
    }
}

fn replace_lines(conn: &Connection, prescription_id: &str, lines: &[PrescriptionLine]) -> DbResult<()> {
    conn.execute(
        "DELETE FROM prescription_lines WHERE prescription_id = ?",
        [prescription_id],
    )?;

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO prescription_lines (
            id, prescription_id, position, origin, extracted_name,
            extracted_dosage, extracted_frequency, extracted_instructions, verified,
            confidence, mapping_status, mapped_product_id, suggested_product_ids
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )?;

    for line in lines {
        if line.prescription_id != prescription_id {
            return Err(DbError::Constraint(format!(
                "line {} belongs to {}",
                line.id, line.prescription_id
            )));
        }
        stmt.execute(params![
            line.id,
            line.prescription_id,
            line.position,
            origin_to_string(line.origin),
            line.extracted_name,
            line.extracted_dosage,
            line.extracted_frequency,
            line.extracted_instructions,
            serde_json::to_string(&line.verified)?,
            line.confidence,
            line.mapping_status().as_str(),
            line.mapped_product_id(),
            serde_json::to_string(&line.suggested_product_ids)?,
        ])?;
    }
    Ok(())
}

/// Intermediate row struct for database mapping.
struct PrescriptionRow {
    id: String,
    image_uri: String,
    uploaded_at: String,
    status: String,
    overall_confidence: f64,
    pharmacist_notes: Option<String>,
    linked_order_id: Option<String>,
    version: i64,
    updated_at: String,
}

fn prescription_row(row: &Row<'_>) -> rusqlite::Result<PrescriptionRow> {
    Ok(PrescriptionRow {
        id: row.get(0)?,
        image_uri: row.get(1)?,
        uploaded_at: row.get(2)?,
        status: row.get(3)?,
        overall_confidence: row.get(4)?,
        pharmacist_notes: row.get(5)?,
        linked_order_id: row.get(6)?,
        version: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl TryFrom<PrescriptionRow> for Prescription {
    type Error = DbError;

    fn try_from(row: PrescriptionRow) -> Result<Self, Self::Error> {
        Ok(Prescription {
            id: row.id,
            image_uri: row.image_uri,
            uploaded_at: parse_timestamp(&row.uploaded_at)?,
            status: string_to_status(&row.status)?,
            overall_confidence: row.overall_confidence,
            pharmacist_notes: row.pharmacist_notes,
            linked_order_id: row.linked_order_id,
            version: row.version.max(0) as u64,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

struct LineRow {
    id: String,
    prescription_id: String,
    position: u32,
    origin: String,
    extracted_name: String,
    extracted_dosage: String,
    extracted_frequency: String,
    extracted_instructions: String,
    verified: String,
    confidence: f64,
    mapping_status: String,
    mapped_product_id: Option<String>,
    suggested_product_ids: String,
}

fn line_row(row: &Row<'_>) -> rusqlite::Result<LineRow> {
    Ok(LineRow {
        id: row.get(0)?,
        prescription_id: row.get(1)?,
        position: row.get(2)?,
        origin: row.get(3)?,
        extracted_name: row.get(4)?,
        extracted_dosage: row.get(5)?,
        extracted_frequency: row.get(6)?,
        extracted_instructions: row.get(7)?,
        verified: row.get(8)?,
        confidence: row.get(9)?,
        mapping_status: row.get(10)?,
        mapped_product_id: row.get(11)?,
        suggested_product_ids: row.get(12)?,
    })
}

impl TryFrom<LineRow> for PrescriptionLine {
    type Error = DbError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let verified: VerifiedFields = serde_json::from_str(&row.verified)?;
        let mapping = string_to_mapping(&row.mapping_status, row.mapped_product_id)?;

        Ok(PrescriptionLine {
            id: row.id,
            prescription_id: row.prescription_id,
            position: row.position,
            origin: string_to_origin(&row.origin)?,
            extracted_name: row.extracted_name,
            extracted_dosage: row.extracted_dosage,
            extracted_frequency: row.extracted_frequency,
            extracted_instructions: row.extracted_instructions,
            verified,
            confidence: row.confidence,
            mapping,
            suggested_product_ids: serde_json::from_str(&row.suggested_product_ids)?,
        })
    }
}

// Fixed-width UTC so lexical order is chronological order
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn string_to_status(s: &str) -> Result<PrescriptionStatus, DbError> {
    match s {
        "uploaded" => Ok(PrescriptionStatus::Uploaded),
        "ai_processed" => Ok(PrescriptionStatus::AiProcessed),
        "pending_review" => Ok(PrescriptionStatus::PendingReview),
        "verified" => Ok(PrescriptionStatus::Verified),
        "rejected" => Ok(PrescriptionStatus::Rejected),
        "clarification_needed" => Ok(PrescriptionStatus::ClarificationNeeded),
        _ => Err(DbError::Constraint(format!("Unknown prescription status: {}", s))),
    }
}

fn origin_to_string(origin: LineOrigin) -> &'static str {
    match origin {
        LineOrigin::Extracted => "extracted",
        LineOrigin::Manual => "manual",
    }
}

fn string_to_origin(s: &str) -> Result<LineOrigin, DbError> {
    match s {
        "extracted" => Ok(LineOrigin::Extracted),
        "manual" => Ok(LineOrigin::Manual),
        _ => Err(DbError::Constraint(format!("Unknown line origin: {}", s))),
    }
}

fn string_to_mapping(status: &str, product_id: Option<String>) -> Result<LineMapping, DbError> {
    match (status, product_id) {
        ("pending", None) => Ok(LineMapping::Pending),
        ("unavailable", None) => Ok(LineMapping::Unavailable),
        ("mapped", Some(product_id)) => Ok(LineMapping::Mapped { product_id }),
        (status, product_id) => Err(DbError::Constraint(format!(
            "Inconsistent mapping: {} / {:?}",
            status, product_id
        ))),
    }
}
