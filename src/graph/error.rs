//! The store's error taxonomy.
//!
//! Every public graph operation returns `Result<_, GraphError>`. Collaborator
//! failures (embedding generation, semantic search) are deliberately NOT part
//! of this taxonomy — they are caught inside the dedup pipeline and downgraded
//! to "proceed without this check".

use thiserror::Error;

use super::types::RelationType;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("relation not found: {0}")]
    RelationNotFound(String),

    #[error("fact not found: {0}")]
    FactNotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid role '{role}' for {relation_type}; valid roles: {}", .valid_roles.join(", "))]
    InvalidRole {
        role: String,
        relation_type: RelationType,
        valid_roles: Vec<String>,
    },

    #[error("{relation_type} requires {required} active members, got {actual}")]
    InvalidCardinality {
        relation_type: RelationType,
        required: String,
        actual: usize,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot hard-delete entity {entity_id}: {count} dependent record(s) in {table}")]
    ReferentialConflict {
        entity_id: String,
        table: String,
        count: i64,
    },

    #[error("feature unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;
