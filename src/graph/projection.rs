//! One-hop graph projection for presentation.
//!
//! Builds a node/edge view centered on an entity. The view holds only id
//! references — nodes are keyed by entity id (first seen wins) and edges point
//! at node ids, never at embedded records, so cyclic relation data cannot
//! produce cyclic structures here.

use std::collections::HashSet;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::ProjectionConfig;

use super::entities;
use super::error::{GraphError, GraphResult};
use super::relations;
use super::types::{Entity, EntityType, RelationMember, RelationType};

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Load a member's entity record, treating missing and soft-deleted records
/// as orphaned (excluded from the projection).
fn load_node(conn: &Connection, entity_id: &str) -> GraphResult<Option<Entity>> {
    match entities::find_one(conn, entity_id) {
        Ok(e) if e.lifecycle.is_deleted() => Ok(None),
        Ok(e) => Ok(Some(e)),
        Err(GraphError::EntityNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Build the one-hop node/edge view of an entity's active relations.
///
/// Only depth 1 is supported. Projection is an optional feature; when
/// disabled the call fails `ServiceUnavailable` instead of degrading.
pub fn get_graph(
    conn: &Connection,
    config: &ProjectionConfig,
    entity_id: &str,
    depth: u32,
) -> GraphResult<GraphView> {
    if !config.enabled {
        return Err(GraphError::ServiceUnavailable("graph projection".into()));
    }
    if depth != 1 {
        return Err(GraphError::BadRequest(format!(
            "graph depth {depth} is not supported (only depth 1)"
        )));
    }

    let central = entities::find_one(conn, entity_id)?;

    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut edges: Vec<GraphEdge> = Vec::new();

    push_node(&mut nodes, &mut seen, &central);

    for rel in relations::find_by_entity(conn, entity_id)? {
        let members: Vec<&RelationMember> =
            rel.members.iter().filter(|m| m.is_active()).collect();

        if members.len() == 2 {
            // Binary relation: one edge between the two members, skipped when
            // either record is orphaned.
            let (Some(a), Some(b)) = (
                load_node(conn, &members[0].entity_id)?,
                load_node(conn, &members[1].entity_id)?,
            ) else {
                continue;
            };
            let (this, other) = if a.id == entity_id { (a, b) } else { (b, a) };
            let other_role = members
                .iter()
                .find(|m| m.entity_id == other.id)
                .map(|m| m.role.clone());
            push_node(&mut nodes, &mut seen, &this);
            push_node(&mut nodes, &mut seen, &other);
            edges.push(GraphEdge {
                id: rel.relation.id.clone(),
                source: entity_id.to_string(),
                target: other.id,
                relation_type: rel.relation.relation_type,
                role: other_role,
            });
        } else {
            // N-ary relation: fan out from the central entity to every other
            // active member. The edge id embeds target and role so two
            // entities sharing several relations never collide.
            for member in &members {
                if member.entity_id == entity_id {
                    continue;
                }
                let Some(other) = load_node(conn, &member.entity_id)? else {
                    continue;
                };
                push_node(&mut nodes, &mut seen, &other);
                edges.push(GraphEdge {
                    id: format!("{}-{}-{}", rel.relation.id, member.entity_id, member.role),
                    source: entity_id.to_string(),
                    target: other.id,
                    relation_type: rel.relation.relation_type,
                    role: Some(member.role.clone()),
                });
            }
        }
    }

    Ok(GraphView { nodes, edges })
}

/// First seen wins: a node already in the map is never replaced.
fn push_node(nodes: &mut Vec<GraphNode>, seen: &mut HashSet<String>, entity: &Entity) {
    if seen.insert(entity.id.clone()) {
        nodes.push(GraphNode {
            id: entity.id.clone(),
            label: entity.name.clone(),
            entity_type: entity.entity_type,
        });
    }
}
