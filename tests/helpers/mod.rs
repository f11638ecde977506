#![allow(dead_code)]

use std::collections::HashMap;

use dossier::db;
use dossier::embedding::EmbeddingProvider;
use dossier::graph::entities::{self, EntityDraft};
use dossier::graph::facts::FactDraft;
use dossier::graph::relations::MemberDraft;
use dossier::graph::types::{EntityType, FactSource};
use rusqlite::Connection;

static TRACING_INIT: std::sync::Once = std::sync::Once::new();

/// Route store logs through a test subscriber (set RUST_LOG to see them).
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    init_tracing();
    db::load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// Create a person entity and return its id.
pub fn person(conn: &Connection, name: &str) -> String {
    entities::create(
        conn,
        &EntityDraft {
            entity_type: EntityType::Person,
            name: name.into(),
            is_bot: false,
            organization_id: None,
        },
    )
    .unwrap()
    .id
}

/// Create an organization entity and return its id.
pub fn organization(conn: &Connection, name: &str) -> String {
    entities::create(
        conn,
        &EntityDraft {
            entity_type: EntityType::Organization,
            name: name.into(),
            is_bot: false,
            organization_id: None,
        },
    )
    .unwrap()
    .id
}

/// A minimal extracted fact draft.
pub fn fact_draft(fact_type: &str, value: &str) -> FactDraft {
    FactDraft {
        fact_type: fact_type.into(),
        category: None,
        value: Some(value.into()),
        value_json: None,
        source: FactSource::Extracted,
        confidence: Some(0.9),
        rank: None,
    }
}

/// A relation member draft.
pub fn member(entity_id: &str, role: &str) -> MemberDraft {
    MemberDraft {
        entity_id: entity_id.into(),
        role: role.into(),
        label: None,
        properties: None,
    }
}

/// Generate a deterministic 384-dim embedding with a spike at position `seed`.
/// Each seed produces a distinct, orthogonal-ish vector.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; 384];
    v[seed as usize % 384] = 1.0;
    v
}

/// Generate an embedding similar to `base` with small perturbation.
/// The result will have high cosine similarity to `base`.
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..5 {
        v[(i * 37) % 384] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Embedding provider backed by a fixed text → vector map; unknown texts fail.
pub struct MapEmbedder {
    map: HashMap<String, Vec<f32>>,
}

impl MapEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            map: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl EmbeddingProvider for MapEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.map
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no test embedding for: {text}"))
    }
}

/// Embedding provider that always fails, for degradation tests.
pub struct OfflineEmbedder;

impl EmbeddingProvider for OfflineEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding model offline")
    }
}
