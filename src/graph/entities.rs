//! Entity identity and lifecycle.
//!
//! Owns the singleton-owner invariant, soft delete/restore, the guarded hard
//! delete, and merge. `set_owner` and `restore` take SQLite's write lock up
//! front (immediate transaction) because both race against concurrent writers;
//! everything else is a single-statement write or an idempotent multi-step
//! sequence.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::audit::log_event;
use super::error::{GraphError, GraphResult};
use super::parse_col;
use super::types::{Entity, EntityIdentifier, EntityType, Lifecycle};

/// Input shape for creating an entity.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityDraft {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Partial update for an entity. `organization_id` is double-optional:
/// `None` = leave unchanged, `Some(None)` = clear the back-reference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub is_bot: Option<bool>,
    pub organization_id: Option<Option<String>>,
}

/// Result returned from a merge operation.
#[derive(Debug, Serialize)]
pub struct MergeOutcome {
    pub source_id: String,
    pub target_id: String,
    pub identifiers_moved: usize,
    pub facts_moved: usize,
}

const ENTITY_COLS: &str =
    "id, entity_type, name, is_bot, is_owner, organization_id, deleted_at, created_at, updated_at";

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        entity_type: parse_col(1, row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        is_bot: row.get(3)?,
        is_owner: row.get(4)?,
        organization_id: row.get(5)?,
        lifecycle: Lifecycle::from_deleted_at(row.get(6)?),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Create a new entity. A provided `organization_id` must reference an
/// existing entity.
pub fn create(conn: &Connection, draft: &EntityDraft) -> GraphResult<Entity> {
    if let Some(org_id) = &draft.organization_id {
        if !exists(conn, org_id)? {
            return Err(GraphError::EntityNotFound(org_id.clone()));
        }
    }

    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO entities (id, entity_type, name, is_bot, is_owner, organization_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)",
        params![
            id,
            draft.entity_type.as_str(),
            draft.name,
            draft.is_bot,
            draft.organization_id,
            now,
        ],
    )?;

    log_event(conn, "create", &id, None)?;
    find_one(conn, &id)
}

/// Fetch an entity by id. Soft-deleted entities are returned with a
/// `Deleted` lifecycle.
pub fn find_one(conn: &Connection, id: &str) -> GraphResult<Entity> {
    conn.query_row(
        &format!("SELECT {ENTITY_COLS} FROM entities WHERE id = ?1"),
        params![id],
        entity_from_row,
    )
    .optional()?
    .ok_or_else(|| GraphError::EntityNotFound(id.to_string()))
}

/// Whether any entity row (active or soft-deleted) has this id.
pub(crate) fn exists(conn: &Connection, id: &str) -> GraphResult<bool> {
    let found: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM entities WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// List entities, newest first.
pub fn find_all(conn: &Connection, include_deleted: bool) -> GraphResult<Vec<Entity>> {
    let sql = if include_deleted {
        format!("SELECT {ENTITY_COLS} FROM entities ORDER BY created_at DESC")
    } else {
        format!(
            "SELECT {ENTITY_COLS} FROM entities WHERE deleted_at IS NULL ORDER BY created_at DESC"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], entity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Apply a partial update. Absent fields are left unchanged.
pub fn update(conn: &Connection, id: &str, patch: &EntityPatch) -> GraphResult<Entity> {
    let entity = find_one(conn, id)?;

    if let Some(Some(org_id)) = &patch.organization_id {
        if !exists(conn, org_id)? {
            return Err(GraphError::EntityNotFound(org_id.clone()));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE entities SET name = ?1, is_bot = ?2, organization_id = ?3, updated_at = ?4 \
         WHERE id = ?5",
        params![
            patch.name.as_deref().unwrap_or(&entity.name),
            patch.is_bot.unwrap_or(entity.is_bot),
            match &patch.organization_id {
                Some(v) => v.clone(),
                None => entity.organization_id.clone(),
            },
            now,
            id,
        ],
    )?;

    log_event(conn, "update", id, None)?;
    find_one(conn, id)
}

/// Soft-delete an entity: set the deletion timestamp and leave facts and
/// relations untouched. The owner cannot be soft-deleted. Idempotent.
pub fn soft_delete(conn: &Connection, id: &str) -> GraphResult<()> {
    let entity = find_one(conn, id)?;
    if entity.is_owner {
        return Err(GraphError::BadRequest(
            "cannot soft-delete the owner entity".into(),
        ));
    }
    if entity.lifecycle.is_deleted() {
        return Ok(());
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE entities SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now, id],
    )?;
    log_event(conn, "delete", id, Some(&serde_json::json!({"hard_delete": false})))?;
    Ok(())
}

/// Restore a soft-deleted entity.
///
/// Runs in an immediate transaction so the row cannot be hard-deleted by a
/// concurrent writer between the check and the update. Fails BadRequest when
/// the row is not currently soft-deleted.
pub fn restore(conn: &mut Connection, id: &str) -> GraphResult<Entity> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let deleted_at: Option<String> = tx
        .query_row(
            "SELECT deleted_at FROM entities WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| GraphError::EntityNotFound(id.to_string()))?;

    if deleted_at.is_none() {
        return Err(GraphError::BadRequest(format!(
            "entity {id} is not soft-deleted"
        )));
    }

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE entities SET deleted_at = NULL, updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    log_event(&tx, "restore", id, None)?;
    tx.commit()?;

    find_one(conn, id)
}

/// Upstream tables that block a hard delete while they still reference the
/// entity. Probed via sqlite_master because they belong to the host
/// application's schema, not ours.
const UPSTREAM_DEPENDENTS: &[(&str, &str)] = &[
    ("activities", "entity_id"),
    ("commitments", "entity_id"),
    ("participations", "entity_id"),
];

fn table_exists(conn: &Connection, table: &str) -> GraphResult<bool> {
    let found: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Permanently remove an entity and everything it owns (facts, identifiers,
/// relation memberships, fact embeddings).
///
/// Requires `confirm = true`, and fails with `ReferentialConflict` while any
/// dependent record — upstream activities/commitments/participations, or
/// another entity's `organization_id` back-reference — still points here.
pub fn hard_delete(conn: &mut Connection, id: &str, confirm: bool) -> GraphResult<()> {
    if !confirm {
        return Err(GraphError::BadRequest(
            "hard delete requires explicit confirmation".into(),
        ));
    }
    if !exists(conn, id)? {
        return Err(GraphError::EntityNotFound(id.to_string()));
    }

    for (table, column) in UPSTREAM_DEPENDENTS {
        if !table_exists(conn, table)? {
            continue;
        }
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
            params![id],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Err(GraphError::ReferentialConflict {
                entity_id: id.to_string(),
                table: table.to_string(),
                count,
            });
        }
    }

    let back_refs: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE organization_id = ?1 AND id != ?1",
        params![id],
        |row| row.get(0),
    )?;
    if back_refs > 0 {
        return Err(GraphError::ReferentialConflict {
            entity_id: id.to_string(),
            table: "entities".to_string(),
            count: back_refs,
        });
    }

    let tx = conn.transaction()?;

    // Fact embeddings live in a virtual table with no FK; clean them up first.
    tx.execute(
        "DELETE FROM entity_facts_vec WHERE id IN \
         (SELECT id FROM entity_facts WHERE entity_id = ?1)",
        params![id],
    )?;

    log_event(&tx, "delete", id, Some(&serde_json::json!({"hard_delete": true})))?;

    // Cascades to entity_facts, entity_identifiers, and entity_relation_members.
    tx.execute("DELETE FROM entities WHERE id = ?1", params![id])?;

    tx.commit()?;
    Ok(())
}

/// Merge `source_id` into `target_id`: move identifiers, then move facts,
/// then soft-delete the source.
///
/// The two moves are persisted independently — a crash in between leaves data
/// attached to both entities, which is acceptable because each move is
/// idempotent and the merge can be re-run.
pub fn merge(conn: &Connection, source_id: &str, target_id: &str) -> GraphResult<MergeOutcome> {
    if source_id == target_id {
        return Err(GraphError::Conflict(
            "cannot merge an entity into itself".into(),
        ));
    }
    let source = find_one(conn, source_id)?;
    find_one(conn, target_id)?;
    if source.is_owner {
        return Err(GraphError::BadRequest(
            "cannot merge the owner entity away".into(),
        ));
    }

    // Step 1: move identifiers. UPDATE OR IGNORE skips handles the target
    // already has; the leftovers are exact duplicates and are dropped.
    let identifiers_moved = conn.execute(
        "UPDATE OR IGNORE entity_identifiers SET entity_id = ?1 WHERE entity_id = ?2",
        params![target_id, source_id],
    )?;
    conn.execute(
        "DELETE FROM entity_identifiers WHERE entity_id = ?1",
        params![source_id],
    )?;

    // Step 2: move facts.
    let facts_moved = conn.execute(
        "UPDATE entity_facts SET entity_id = ?1 WHERE entity_id = ?2",
        params![target_id, source_id],
    )?;

    // Step 3: retire the source.
    if !source.lifecycle.is_deleted() {
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE entities SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, source_id],
        )?;
    }

    log_event(
        conn,
        "merge",
        target_id,
        Some(&serde_json::json!({
            "source_id": source_id,
            "identifiers_moved": identifiers_moved,
            "facts_moved": facts_moved,
        })),
    )?;

    tracing::info!(source = source_id, target = target_id, facts_moved, "merged entities");

    Ok(MergeOutcome {
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        identifiers_moved,
        facts_moved,
    })
}

/// Make `id` the owner entity, clearing the flag from the previous owner.
///
/// The whole state machine runs in an immediate transaction: two concurrent
/// callers cannot both observe "no owner" and both set the flag.
pub fn set_owner(conn: &mut Connection, id: &str) -> GraphResult<Entity> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let target_deleted: Option<String> = tx
        .query_row(
            "SELECT deleted_at FROM entities WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| GraphError::EntityNotFound(id.to_string()))?;
    if target_deleted.is_some() {
        return Err(GraphError::BadRequest(
            "cannot make a soft-deleted entity the owner".into(),
        ));
    }

    let now = chrono::Utc::now().to_rfc3339();

    let current: Option<String> = tx
        .query_row(
            "SELECT id FROM entities WHERE is_owner = 1 LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    if current.as_deref() != Some(id) {
        if let Some(previous) = &current {
            tx.execute(
                "UPDATE entities SET is_owner = 0, updated_at = ?1 WHERE id = ?2",
                params![now, previous],
            )?;
        }
        tx.execute(
            "UPDATE entities SET is_owner = 1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        log_event(
            &tx,
            "set_owner",
            id,
            Some(&serde_json::json!({"previous": current})),
        )?;
    }

    tx.commit()?;
    find_one(conn, id)
}

/// Attach a per-platform handle to an entity. Idempotent on the
/// (entity, platform, handle) triple; returns whether a row was created.
pub fn add_identifier(
    conn: &Connection,
    entity_id: &str,
    platform: &str,
    handle: &str,
) -> GraphResult<(EntityIdentifier, bool)> {
    if !exists(conn, entity_id)? {
        return Err(GraphError::EntityNotFound(entity_id.to_string()));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO entity_identifiers (id, entity_id, platform, handle, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, entity_id, platform, handle, now],
    )?;

    let identifier = conn.query_row(
        "SELECT id, entity_id, platform, handle, created_at FROM entity_identifiers \
         WHERE entity_id = ?1 AND platform = ?2 AND handle = ?3",
        params![entity_id, platform, handle],
        |row| {
            Ok(EntityIdentifier {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                platform: row.get(2)?,
                handle: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )?;

    Ok((identifier, inserted > 0))
}

/// List an entity's identifiers.
pub fn find_identifiers(conn: &Connection, entity_id: &str) -> GraphResult<Vec<EntityIdentifier>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_id, platform, handle, created_at FROM entity_identifiers \
         WHERE entity_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map(params![entity_id], |row| {
            Ok(EntityIdentifier {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                platform: row.get(2)?,
                handle: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn person(conn: &Connection, name: &str) -> Entity {
        create(
            conn,
            &EntityDraft {
                entity_type: EntityType::Person,
                name: name.into(),
                is_bot: false,
                organization_id: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn create_and_find() {
        let conn = test_db();
        let e = person(&conn, "Ada Lovelace");
        let found = find_one(&conn, &e.id).unwrap();
        assert_eq!(found.name, "Ada Lovelace");
        assert_eq!(found.entity_type, EntityType::Person);
        assert_eq!(found.lifecycle, Lifecycle::Active);
        assert!(!found.is_owner);
    }

    #[test]
    fn find_one_unknown_fails() {
        let conn = test_db();
        let err = find_one(&conn, "nope").unwrap_err();
        assert!(matches!(err, GraphError::EntityNotFound(_)));
    }

    #[test]
    fn create_with_unknown_org_fails() {
        let conn = test_db();
        let err = create(
            &conn,
            &EntityDraft {
                entity_type: EntityType::Person,
                name: "Orphan".into(),
                is_bot: false,
                organization_id: Some("missing-org".into()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::EntityNotFound(_)));
    }

    #[test]
    fn update_patches_only_given_fields() {
        let conn = test_db();
        let e = person(&conn, "Ada");
        let patched = update(
            &conn,
            &e.id,
            &EntityPatch {
                name: Some("Ada L.".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(patched.name, "Ada L.");
        assert!(!patched.is_bot);
    }

    #[test]
    fn update_clears_org_with_double_option() {
        let conn = test_db();
        let org = create(
            &conn,
            &EntityDraft {
                entity_type: EntityType::Organization,
                name: "Acme".into(),
                is_bot: false,
                organization_id: None,
            },
        )
        .unwrap();
        let e = create(
            &conn,
            &EntityDraft {
                entity_type: EntityType::Person,
                name: "Ada".into(),
                is_bot: false,
                organization_id: Some(org.id.clone()),
            },
        )
        .unwrap();
        assert_eq!(e.organization_id.as_deref(), Some(org.id.as_str()));

        let patched = update(
            &conn,
            &e.id,
            &EntityPatch {
                organization_id: Some(None),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(patched.organization_id.is_none());
    }

    #[test]
    fn soft_delete_and_restore() {
        let mut conn = test_db();
        let e = person(&conn, "Ada");

        soft_delete(&conn, &e.id).unwrap();
        assert!(find_one(&conn, &e.id).unwrap().lifecycle.is_deleted());

        // restoring an active entity fails
        let active = person(&conn, "Grace");
        let err = restore(&mut conn, &active.id).unwrap_err();
        assert!(matches!(err, GraphError::BadRequest(_)));

        let restored = restore(&mut conn, &e.id).unwrap();
        assert_eq!(restored.lifecycle, Lifecycle::Active);
    }

    #[test]
    fn soft_delete_owner_fails() {
        let mut conn = test_db();
        let e = person(&conn, "Ada");
        set_owner(&mut conn, &e.id).unwrap();

        let err = soft_delete(&conn, &e.id).unwrap_err();
        assert!(matches!(err, GraphError::BadRequest(_)));
    }

    #[test]
    fn set_owner_moves_flag() {
        let mut conn = test_db();
        let b = person(&conn, "B");
        let c = person(&conn, "C");

        set_owner(&mut conn, &b.id).unwrap();
        set_owner(&mut conn, &c.id).unwrap();

        let owners: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities WHERE is_owner = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(owners, 1);
        assert!(!find_one(&conn, &b.id).unwrap().is_owner);
        assert!(find_one(&conn, &c.id).unwrap().is_owner);
    }

    #[test]
    fn set_owner_is_idempotent() {
        let mut conn = test_db();
        let e = person(&conn, "Ada");
        set_owner(&mut conn, &e.id).unwrap();
        set_owner(&mut conn, &e.id).unwrap();
        assert!(find_one(&conn, &e.id).unwrap().is_owner);
    }

    #[test]
    fn hard_delete_requires_confirmation() {
        let mut conn = test_db();
        let e = person(&conn, "Ada");
        let err = hard_delete(&mut conn, &e.id, false).unwrap_err();
        assert!(matches!(err, GraphError::BadRequest(_)));
    }

    #[test]
    fn hard_delete_blocked_by_upstream_table() {
        let mut conn = test_db();
        let e = person(&conn, "Ada");

        // Simulate the host application's schema.
        conn.execute_batch(
            "CREATE TABLE commitments (id INTEGER PRIMARY KEY, entity_id TEXT NOT NULL)",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO commitments (entity_id) VALUES (?1)",
            params![e.id],
        )
        .unwrap();

        let err = hard_delete(&mut conn, &e.id, true).unwrap_err();
        match err {
            GraphError::ReferentialConflict { table, count, .. } => {
                assert_eq!(table, "commitments");
                assert_eq!(count, 1);
            }
            other => panic!("expected ReferentialConflict, got {other:?}"),
        }

        // After removing the reference, the delete goes through.
        conn.execute("DELETE FROM commitments WHERE entity_id = ?1", params![e.id])
            .unwrap();
        hard_delete(&mut conn, &e.id, true).unwrap();
        assert!(matches!(
            find_one(&conn, &e.id).unwrap_err(),
            GraphError::EntityNotFound(_)
        ));
    }

    #[test]
    fn hard_delete_blocked_by_org_back_reference() {
        let mut conn = test_db();
        let org = create(
            &conn,
            &EntityDraft {
                entity_type: EntityType::Organization,
                name: "Acme".into(),
                is_bot: false,
                organization_id: None,
            },
        )
        .unwrap();
        create(
            &conn,
            &EntityDraft {
                entity_type: EntityType::Person,
                name: "Ada".into(),
                is_bot: false,
                organization_id: Some(org.id.clone()),
            },
        )
        .unwrap();

        let err = hard_delete(&mut conn, &org.id, true).unwrap_err();
        assert!(matches!(err, GraphError::ReferentialConflict { .. }));
    }

    #[test]
    fn merge_self_fails_conflict() {
        let conn = test_db();
        let e = person(&conn, "Ada");
        let err = merge(&conn, &e.id, &e.id).unwrap_err();
        assert!(matches!(err, GraphError::Conflict(_)));
    }

    #[test]
    fn merge_moves_identifiers_and_soft_deletes_source() {
        let conn = test_db();
        let a = person(&conn, "Ada");
        let b = person(&conn, "Ada Lovelace");
        add_identifier(&conn, &a.id, "telegram", "@ada").unwrap();
        // Shared handle on both sides: the move must not trip the unique index.
        add_identifier(&conn, &a.id, "email", "ada@example.com").unwrap();
        add_identifier(&conn, &b.id, "email", "ada@example.com").unwrap();

        let outcome = merge(&conn, &a.id, &b.id).unwrap();
        assert_eq!(outcome.identifiers_moved, 1); // "@ada"; the email was a duplicate

        let moved = find_identifiers(&conn, &b.id).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(find_identifiers(&conn, &a.id).unwrap().is_empty());
        assert!(find_one(&conn, &a.id).unwrap().lifecycle.is_deleted());
    }

    #[test]
    fn merge_is_rerunnable() {
        let conn = test_db();
        let a = person(&conn, "Ada");
        let b = person(&conn, "Ada Lovelace");
        add_identifier(&conn, &a.id, "telegram", "@ada").unwrap();

        merge(&conn, &a.id, &b.id).unwrap();
        let second = merge(&conn, &a.id, &b.id).unwrap();
        assert_eq!(second.identifiers_moved, 0);
        assert_eq!(second.facts_moved, 0);
        assert_eq!(find_identifiers(&conn, &b.id).unwrap().len(), 1);
    }

    #[test]
    fn add_identifier_is_idempotent() {
        let conn = test_db();
        let e = person(&conn, "Ada");
        let (first, created) = add_identifier(&conn, &e.id, "slack", "U123").unwrap();
        assert!(created);
        let (second, created) = add_identifier(&conn, &e.id, "slack", "U123").unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }
}
