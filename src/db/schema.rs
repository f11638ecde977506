//! SQL DDL for all Dossier tables.
//!
//! Defines the `entities`, `entity_identifiers`, `entity_facts`,
//! `entity_facts_vec` (vec0), `entity_relations`, `entity_relation_members`,
//! `graph_log`, and `schema_meta` tables. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for Dossier's core tables.
const SCHEMA_SQL: &str = r#"
-- People and organizations
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL CHECK(entity_type IN ('person','organization')),
    name TEXT NOT NULL,
    is_bot INTEGER NOT NULL DEFAULT 0,
    is_owner INTEGER NOT NULL DEFAULT 0,
    organization_id TEXT REFERENCES entities(id) ON DELETE SET NULL,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
CREATE INDEX IF NOT EXISTS idx_entities_owner ON entities(is_owner);
CREATE INDEX IF NOT EXISTS idx_entities_org ON entities(organization_id);
CREATE INDEX IF NOT EXISTS idx_entities_deleted ON entities(deleted_at);

-- Per-platform messaging handles attached by upstream ingestion
CREATE TABLE IF NOT EXISTS entity_identifiers (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    platform TEXT NOT NULL,
    handle TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(entity_id, platform, handle)
);

CREATE INDEX IF NOT EXISTS idx_identifiers_entity ON entity_identifiers(entity_id);

-- Temporal facts; closed by setting valid_until, never physically deleted
CREATE TABLE IF NOT EXISTS entity_facts (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    fact_type TEXT NOT NULL,
    category TEXT,
    value TEXT,
    value_json TEXT,
    source TEXT NOT NULL DEFAULT 'extracted' CHECK(source IN ('manual','extracted')),
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    rank TEXT NOT NULL DEFAULT 'normal' CHECK(rank IN ('preferred','normal','deprecated')),
    needs_review INTEGER NOT NULL DEFAULT 0,
    valid_from TEXT NOT NULL,
    valid_until TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facts_entity_type_window
    ON entity_facts(entity_id, fact_type, valid_until);

-- Typed n-ary relations
CREATE TABLE IF NOT EXISTS entity_relations (
    id TEXT PRIMARY KEY,
    relation_type TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'manual' CHECK(source IN ('manual','extracted','inferred')),
    confidence REAL NOT NULL DEFAULT 1.0,
    metadata TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relations_type ON entity_relations(relation_type);

-- Relation membership; soft-removed by setting valid_until
CREATE TABLE IF NOT EXISTS entity_relation_members (
    id TEXT PRIMARY KEY,
    relation_id TEXT NOT NULL REFERENCES entity_relations(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    label TEXT,
    properties TEXT,
    valid_until TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_members_relation ON entity_relation_members(relation_id);
CREATE INDEX IF NOT EXISTS idx_members_entity_window
    ON entity_relation_members(entity_id, valid_until);

-- Audit log
CREATE TABLE IF NOT EXISTS graph_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN
        ('create','update','supersede','invalidate','merge','delete','restore','set_owner')),
    subject_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entity_facts_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"entities".to_string()));
        assert!(tables.contains(&"entity_identifiers".to_string()));
        assert!(tables.contains(&"entity_facts".to_string()));
        assert!(tables.contains(&"entity_relations".to_string()));
        assert!(tables.contains(&"entity_relation_members".to_string()));
        assert!(tables.contains(&"graph_log".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));

        // Verify the vec0 virtual table is usable
        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }
}
