//! Core graph type definitions.
//!
//! Defines [`EntityType`], the fact and relation source/rank enums,
//! [`Lifecycle`] (the tagged soft-delete state), the record structs matching
//! the table schemas, and the [`RelationType`] registry with its role
//! vocabularies and cardinality rules.

use serde::{Deserialize, Serialize};

/// The two entity kinds the graph stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
}

impl EntityType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(Self::Person),
            "organization" => Ok(Self::Organization),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

/// Where a fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    Manual,
    Extracted,
}

impl FactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Extracted => "extracted",
        }
    }
}

impl std::str::FromStr for FactSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "extracted" => Ok(Self::Extracted),
            _ => Err(format!("unknown fact source: {s}")),
        }
    }
}

/// Where a relation came from. `Inferred` marks relations derived from facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationSource {
    Manual,
    Extracted,
    Inferred,
}

impl RelationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Extracted => "extracted",
            Self::Inferred => "inferred",
        }
    }
}

impl std::str::FromStr for RelationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "extracted" => Ok(Self::Extracted),
            "inferred" => Ok(Self::Inferred),
            _ => Err(format!("unknown relation source: {s}")),
        }
    }
}

/// Presentation preference for a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactRank {
    Preferred,
    Normal,
    Deprecated,
}

impl FactRank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preferred => "preferred",
            Self::Normal => "normal",
            Self::Deprecated => "deprecated",
        }
    }
}

impl std::str::FromStr for FactRank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preferred" => Ok(Self::Preferred),
            "normal" => Ok(Self::Normal),
            "deprecated" => Ok(Self::Deprecated),
            _ => Err(format!("unknown fact rank: {s}")),
        }
    }
}

/// Soft-delete state of an entity, derived from the `deleted_at` column.
///
/// Modeled as a tagged state rather than a bare nullable timestamp so callers
/// match on it instead of remembering to filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Lifecycle {
    Active,
    Deleted { at: String },
}

impl Lifecycle {
    pub fn from_deleted_at(deleted_at: Option<String>) -> Self {
        match deleted_at {
            None => Self::Active,
            Some(at) => Self::Deleted { at },
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

/// An entity record, matching the `entities` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    pub is_bot: bool,
    /// At most one entity holds this flag at any instant.
    pub is_owner: bool,
    /// Optional back-reference to the organization this entity belongs to.
    pub organization_id: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_at: String,
    pub updated_at: String,
}

/// A per-platform messaging handle attached to an entity by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityIdentifier {
    pub id: String,
    pub entity_id: String,
    pub platform: String,
    pub handle: String,
    pub created_at: String,
}

/// A fact record, matching the `entity_facts` table schema.
///
/// Facts are mutated only by setting `valid_until`; values are never edited
/// in place and rows are never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFact {
    pub id: String,
    pub entity_id: String,
    pub fact_type: String,
    pub category: Option<String>,
    pub value: Option<String>,
    pub value_json: Option<serde_json::Value>,
    pub source: FactSource,
    pub confidence: f64,
    pub rank: FactRank,
    /// Set when a fusion decision deferred to a human reviewer.
    pub needs_review: bool,
    pub valid_from: String,
    /// `None` = currently active.
    pub valid_until: Option<String>,
    pub created_at: String,
}

impl EntityFact {
    pub fn is_active(&self) -> bool {
        self.valid_until.is_none()
    }
}

/// A relation record, matching the `entity_relations` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub id: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub source: RelationSource,
    pub confidence: f64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// A relation membership, matching the `entity_relation_members` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMember {
    pub id: String,
    pub relation_id: String,
    pub entity_id: String,
    pub role: String,
    pub label: Option<String>,
    pub properties: Option<serde_json::Value>,
    /// `None` = active membership; set = soft-removed.
    pub valid_until: Option<String>,
    pub created_at: String,
}

impl RelationMember {
    pub fn is_active(&self) -> bool {
        self.valid_until.is_none()
    }
}

/// The allowed count of active members for a relation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Exactly(usize),
    AtLeast(usize),
}

impl Cardinality {
    pub fn allows(&self, count: usize) -> bool {
        match self {
            Self::Exactly(n) => count == *n,
            Self::AtLeast(n) => count >= *n,
        }
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// The registered relation types with their role vocabularies and
/// cardinality rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Employment,
    Marriage,
    Friendship,
    Team,
}

impl RelationType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employment => "EMPLOYMENT",
            Self::Marriage => "MARRIAGE",
            Self::Friendship => "FRIENDSHIP",
            Self::Team => "TEAM",
        }
    }

    /// The role vocabulary valid for this relation type.
    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            Self::Employment => &["employee", "employer"],
            Self::Marriage => &["spouse"],
            Self::Friendship => &["friend"],
            Self::Team => &["lead", "member", "sponsor"],
        }
    }

    /// The cardinality rule for the active member set.
    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::Employment | Self::Marriage | Self::Friendship => Cardinality::Exactly(2),
            Self::Team => Cardinality::AtLeast(2),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMPLOYMENT" => Ok(Self::Employment),
            "MARRIAGE" => Ok(Self::Marriage),
            "FRIENDSHIP" => Ok(Self::Friendship),
            "TEAM" => Ok(Self::Team),
            _ => Err(format!("unknown relation type: {s}")),
        }
    }
}

/// Fact types expected to change over time, eligible for supersession
/// rather than plain duplicate-skip.
pub const TEMPORAL_FACT_TYPES: &[&str] =
    &["position", "company", "department", "location", "status"];

/// Whether a fact type belongs to the temporal group.
pub fn is_temporal_fact_type(fact_type: &str) -> bool {
    TEMPORAL_FACT_TYPES.contains(&fact_type)
}
