//! Typed, role-constrained, n-ary relations between entities.
//!
//! Every write validates the member roles against the relation type's
//! vocabulary and the active member count against its cardinality rule.
//! Creation dedups on the active (entity, role) member set — storing the same
//! relation twice is idempotent regardless of member order.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::audit::log_event;
use super::entities;
use super::error::{GraphError, GraphResult};
use super::parse_col;
use super::types::{EntityRelation, RelationMember, RelationSource, RelationType};

/// Ingestion input shape for one relation member.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberDraft {
    pub entity_id: String,
    pub role: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
}

/// A relation together with its members.
#[derive(Debug, Clone, Serialize)]
pub struct RelationWithMembers {
    pub relation: EntityRelation,
    pub members: Vec<RelationMember>,
}

/// Result returned from a relation create.
#[derive(Debug, Serialize)]
pub struct RelationWriteResult {
    pub relation: EntityRelation,
    pub members: Vec<RelationMember>,
    /// `true` if a set-equal relation already existed and was returned instead.
    pub deduplicated: bool,
}

/// One relation seen from a member entity's point of view.
///
/// `own_role` surfaces only the first active role when the entity holds
/// several within one relation — a documented display simplification.
#[derive(Debug, Clone, Serialize)]
pub struct RelationContext {
    pub relation: EntityRelation,
    pub own_role: String,
    pub others: Vec<RelationMember>,
}

const RELATION_COLS: &str = "id, relation_type, source, confidence, metadata, created_at";
const MEMBER_COLS: &str =
    "id, relation_id, entity_id, role, label, properties, valid_until, created_at";

fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRelation> {
    let metadata: Option<String> = row.get(4)?;
    Ok(EntityRelation {
        id: row.get(0)?,
        relation_type: parse_col(1, row.get::<_, String>(1)?)?,
        source: parse_col(2, row.get::<_, String>(2)?)?,
        confidence: row.get(3)?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(5)?,
    })
}

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RelationMember> {
    let properties: Option<String> = row.get(5)?;
    Ok(RelationMember {
        id: row.get(0)?,
        relation_id: row.get(1)?,
        entity_id: row.get(2)?,
        role: row.get(3)?,
        label: row.get(4)?,
        properties: properties.and_then(|s| serde_json::from_str(&s).ok()),
        valid_until: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn load_relation(conn: &Connection, id: &str) -> GraphResult<EntityRelation> {
    conn.query_row(
        &format!("SELECT {RELATION_COLS} FROM entity_relations WHERE id = ?1"),
        params![id],
        relation_from_row,
    )
    .optional()?
    .ok_or_else(|| GraphError::RelationNotFound(id.to_string()))
}

fn load_members(
    conn: &Connection,
    relation_id: &str,
    active_only: bool,
) -> GraphResult<Vec<RelationMember>> {
    let sql = if active_only {
        format!(
            "SELECT {MEMBER_COLS} FROM entity_relation_members \
             WHERE relation_id = ?1 AND valid_until IS NULL ORDER BY created_at"
        )
    } else {
        format!(
            "SELECT {MEMBER_COLS} FROM entity_relation_members \
             WHERE relation_id = ?1 ORDER BY created_at"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![relation_id], member_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn validate_role(relation_type: RelationType, role: &str) -> GraphResult<()> {
    if !relation_type.roles().contains(&role) {
        return Err(GraphError::InvalidRole {
            role: role.to_string(),
            relation_type,
            valid_roles: relation_type.roles().iter().map(|r| r.to_string()).collect(),
        });
    }
    Ok(())
}

fn validate_cardinality(relation_type: RelationType, active_count: usize) -> GraphResult<()> {
    let rule = relation_type.cardinality();
    if !rule.allows(active_count) {
        return Err(GraphError::InvalidCardinality {
            relation_type,
            required: rule.to_string(),
            actual: active_count,
        });
    }
    Ok(())
}

/// The active (entity, role) pairs of a relation, for set-equality dedup.
fn active_member_set(conn: &Connection, relation_id: &str) -> GraphResult<BTreeSet<(String, String)>> {
    Ok(load_members(conn, relation_id, true)?
        .into_iter()
        .map(|m| (m.entity_id, m.role))
        .collect())
}

/// Create a relation after validating roles, cardinality, and member
/// existence. Returns the existing relation unchanged when one of the same
/// type already has a set-equal active member set.
pub fn create(
    conn: &Connection,
    relation_type: RelationType,
    members: &[MemberDraft],
    source: RelationSource,
    confidence: f64,
    metadata: Option<&serde_json::Value>,
) -> GraphResult<RelationWriteResult> {
    for member in members {
        validate_role(relation_type, &member.role)?;
    }
    validate_cardinality(relation_type, members.len())?;
    for member in members {
        if !entities::exists(conn, &member.entity_id)? {
            return Err(GraphError::EntityNotFound(member.entity_id.clone()));
        }
    }

    // Dedup: any same-type relation whose active member set is set-equal.
    let requested: BTreeSet<(String, String)> = members
        .iter()
        .map(|m| (m.entity_id.clone(), m.role.clone()))
        .collect();
    let mut stmt = conn.prepare(
        "SELECT id FROM entity_relations WHERE relation_type = ?1 ORDER BY created_at",
    )?;
    let candidate_ids: Vec<String> = stmt
        .query_map(params![relation_type.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for candidate_id in candidate_ids {
        if active_member_set(conn, &candidate_id)? == requested {
            return Ok(RelationWriteResult {
                relation: load_relation(conn, &candidate_id)?,
                members: load_members(conn, &candidate_id, true)?,
                deduplicated: true,
            });
        }
    }

    let relation_id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let metadata_json = metadata.map(|m| m.to_string());

    conn.execute(
        "INSERT INTO entity_relations (id, relation_type, source, confidence, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            relation_id,
            relation_type.as_str(),
            source.as_str(),
            confidence,
            metadata_json,
            now,
        ],
    )?;

    for member in members {
        insert_member(conn, &relation_id, member)?;
    }

    log_event(conn, "create", &relation_id, None)?;

    Ok(RelationWriteResult {
        relation: load_relation(conn, &relation_id)?,
        members: load_members(conn, &relation_id, true)?,
        deduplicated: false,
    })
}

fn insert_member(
    conn: &Connection,
    relation_id: &str,
    draft: &MemberDraft,
) -> GraphResult<RelationMember> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let properties = draft
        .properties
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO entity_relation_members \
         (id, relation_id, entity_id, role, label, properties, valid_until, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
        params![
            id,
            relation_id,
            draft.entity_id,
            draft.role,
            draft.label,
            properties,
            now,
        ],
    )?;
    conn.query_row(
        &format!("SELECT {MEMBER_COLS} FROM entity_relation_members WHERE id = ?1"),
        params![id],
        member_from_row,
    )
    .map_err(GraphError::from)
}

/// Fetch a relation with its full membership history.
pub fn find_by_id(conn: &Connection, id: &str) -> GraphResult<RelationWithMembers> {
    let relation = load_relation(conn, id)?;
    let members = load_members(conn, id, false)?;
    Ok(RelationWithMembers { relation, members })
}

/// Relations in which the entity holds at least one active membership.
/// Members returned are the active set.
pub fn find_by_entity(conn: &Connection, entity_id: &str) -> GraphResult<Vec<RelationWithMembers>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT r.id FROM entity_relations r \
         JOIN entity_relation_members m ON m.relation_id = r.id \
         WHERE m.entity_id = ?1 AND m.valid_until IS NULL \
         ORDER BY r.created_at",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![entity_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    ids.into_iter()
        .map(|id| {
            Ok(RelationWithMembers {
                relation: load_relation(conn, &id)?,
                members: load_members(conn, &id, true)?,
            })
        })
        .collect()
}

/// [`find_by_entity`], reshaped around the caller: the entity's own role and
/// the other members of each relation.
pub fn find_by_entity_with_context(
    conn: &Connection,
    entity_id: &str,
) -> GraphResult<Vec<RelationContext>> {
    let relations = find_by_entity(conn, entity_id)?;
    let mut contexts = Vec::with_capacity(relations.len());
    for rel in relations {
        // First active role wins when the entity appears under several.
        let Some(own_role) = rel
            .members
            .iter()
            .find(|m| m.entity_id == entity_id)
            .map(|m| m.role.clone())
        else {
            continue;
        };
        let others = rel
            .members
            .into_iter()
            .filter(|m| m.entity_id != entity_id)
            .collect();
        contexts.push(RelationContext {
            relation: rel.relation,
            own_role,
            others,
        });
    }
    Ok(contexts)
}

/// All relations of one type, with their active members.
pub fn find_by_type(
    conn: &Connection,
    relation_type: RelationType,
) -> GraphResult<Vec<RelationWithMembers>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM entity_relations WHERE relation_type = ?1 ORDER BY created_at",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![relation_type.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    ids.into_iter()
        .map(|id| {
            Ok(RelationWithMembers {
                relation: load_relation(conn, &id)?,
                members: load_members(conn, &id, true)?,
            })
        })
        .collect()
}

/// Find a relation whose active members include both entities, optionally
/// restricted by type.
///
/// Implemented as two independent existence predicates rather than positional
/// matching, so `find_by_pair(a, b, t) == find_by_pair(b, a, t)`.
pub fn find_by_pair(
    conn: &Connection,
    entity_a: &str,
    entity_b: &str,
    relation_type: Option<RelationType>,
) -> GraphResult<Option<RelationWithMembers>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT r.id FROM entity_relations r \
             WHERE (?3 IS NULL OR r.relation_type = ?3) \
             AND EXISTS (SELECT 1 FROM entity_relation_members m \
                 WHERE m.relation_id = r.id AND m.entity_id = ?1 AND m.valid_until IS NULL) \
             AND EXISTS (SELECT 1 FROM entity_relation_members m \
                 WHERE m.relation_id = r.id AND m.entity_id = ?2 AND m.valid_until IS NULL) \
             ORDER BY r.created_at LIMIT 1",
            params![entity_a, entity_b, relation_type.map(|t| t.as_str())],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => Ok(Some(RelationWithMembers {
            relation: load_relation(conn, &id)?,
            members: load_members(conn, &id, true)?,
        })),
        None => Ok(None),
    }
}

/// Add a member to an existing relation.
///
/// Idempotent: an identical active (entity, role) membership is returned
/// unchanged. Otherwise the role and the resulting cardinality are
/// re-validated against the current active member set.
pub fn add_member(
    conn: &Connection,
    relation_id: &str,
    draft: &MemberDraft,
) -> GraphResult<(RelationMember, bool)> {
    let relation = load_relation(conn, relation_id)?;
    if !entities::exists(conn, &draft.entity_id)? {
        return Err(GraphError::EntityNotFound(draft.entity_id.clone()));
    }
    validate_role(relation.relation_type, &draft.role)?;

    let active = load_members(conn, relation_id, true)?;
    if let Some(existing) = active
        .iter()
        .find(|m| m.entity_id == draft.entity_id && m.role == draft.role)
    {
        return Ok((existing.clone(), false));
    }

    validate_cardinality(relation.relation_type, active.len() + 1)?;

    let member = insert_member(conn, relation_id, draft)?;
    log_event(
        conn,
        "update",
        relation_id,
        Some(&serde_json::json!({"member_added": member.entity_id, "role": member.role})),
    )?;
    Ok((member, true))
}

/// Soft-remove the matching active membership. Returns whether a row was
/// affected; the relation itself stays, even with zero active members left.
pub fn remove_member(
    conn: &Connection,
    relation_id: &str,
    entity_id: &str,
    role: &str,
) -> GraphResult<bool> {
    load_relation(conn, relation_id)?;
    let now = chrono::Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE entity_relation_members SET valid_until = ?1 \
         WHERE relation_id = ?2 AND entity_id = ?3 AND role = ?4 AND valid_until IS NULL",
        params![now, relation_id, entity_id, role],
    )?;
    if affected > 0 {
        log_event(
            conn,
            "update",
            relation_id,
            Some(&serde_json::json!({"member_removed": entity_id, "role": role})),
        )?;
    }
    Ok(affected > 0)
}
