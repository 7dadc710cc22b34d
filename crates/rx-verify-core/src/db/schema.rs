//! SQLite schema definition.

/// Complete database schema for rx-verify.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Product Catalog (local mirror of the external catalog)
-- ============================================================================

CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    strength TEXT,
    manufacturer TEXT,
    price REAL NOT NULL DEFAULT 0,
    aliases TEXT NOT NULL DEFAULT '[]',           -- JSON array of strings
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- FTS5 virtual table for full-text search
CREATE VIRTUAL TABLE IF NOT EXISTS products_fts USING fts5(
    id,
    name,
    aliases,
    content='products',
    content_rowid='rowid'
);

-- Triggers to keep FTS5 in sync with main table
CREATE TRIGGER IF NOT EXISTS products_ai AFTER INSERT ON products BEGIN
    INSERT INTO products_fts(rowid, id, name, aliases)
    VALUES (new.rowid, new.id, new.name, new.aliases);
END;

CREATE TRIGGER IF NOT EXISTS products_ad AFTER DELETE ON products BEGIN
    INSERT INTO products_fts(products_fts, rowid, id, name, aliases)
    VALUES ('delete', old.rowid, old.id, old.name, old.aliases);
END;

CREATE TRIGGER IF NOT EXISTS products_au AFTER UPDATE ON products BEGIN
    INSERT INTO products_fts(products_fts, rowid, id, name, aliases)
    VALUES ('delete', old.rowid, old.id, old.name, old.aliases);
    INSERT INTO products_fts(rowid, id, name, aliases)
    VALUES (new.rowid, new.id, new.name, new.aliases);
END;

-- ============================================================================
-- Prescriptions
-- ============================================================================

CREATE TABLE IF NOT EXISTS prescriptions (
    id TEXT PRIMARY KEY,
    image_uri TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'uploaded'
        CHECK (status IN ('uploaded', 'ai_processed', 'pending_review',
                          'verified', 'rejected', 'clarification_needed')),
    overall_confidence REAL NOT NULL DEFAULT 0,
    pharmacist_notes TEXT,
    linked_order_id TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    -- an order is linked exactly when the prescription is verified
    CHECK ((status = 'verified') = (linked_order_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_prescriptions_status ON prescriptions(status);
CREATE INDEX IF NOT EXISTS idx_prescriptions_uploaded ON prescriptions(uploaded_at);

CREATE TABLE IF NOT EXISTS prescription_lines (
    id TEXT PRIMARY KEY,
    prescription_id TEXT NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    origin TEXT NOT NULL CHECK (origin IN ('extracted', 'manual')),
    extracted_name TEXT NOT NULL DEFAULT '',
    extracted_dosage TEXT NOT NULL DEFAULT '',
    extracted_frequency TEXT NOT NULL DEFAULT '',
    extracted_instructions TEXT NOT NULL DEFAULT '',
    verified TEXT NOT NULL DEFAULT '{}',        -- JSON VerifiedFields
    confidence REAL NOT NULL DEFAULT 0,
    mapping_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (mapping_status IN ('pending', 'mapped', 'unavailable')),
    mapped_product_id TEXT,
    suggested_product_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array, best first
    CHECK ((mapping_status = 'mapped') = (mapped_product_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_lines_prescription ON prescription_lines(prescription_id, position);

-- ============================================================================
-- Decision Log (Append-Only, hash-chained)
-- ============================================================================

CREATE TABLE IF NOT EXISTS decision_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    prescription_id TEXT NOT NULL REFERENCES prescriptions(id),
    action TEXT NOT NULL,
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    reviewer TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    linked_order_id TEXT,
    payload TEXT NOT NULL,                      -- JSON ReviewDecision
    prev_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_decision_log_prescription ON decision_log(prescription_id);

-- Entries are never rewritten
CREATE TRIGGER IF NOT EXISTS decision_log_no_update BEFORE UPDATE ON decision_log
BEGIN
    SELECT RAISE(ABORT, 'decision_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS decision_log_no_delete BEFORE DELETE ON decision_log
BEGIN
    SELECT RAISE(ABORT, 'decision_log is append-only');
END;
"#;
