//! Fact write path — deduplication, temporal supersession, storage.
//!
//! [`create_with_dedup`] is the single entry point for new facts. Duplicate
//! detection is three-tier: embedding cosine similarity when a provider is
//! wired in, exact normalized text, and fuzzy Levenshtein with a supersession
//! band for temporal fact types. Collaborator failures downgrade the check —
//! losing a duplicate check is preferable to losing data, so embedding errors
//! never fail fact creation.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DedupConfig;
use crate::embedding::EmbeddingProvider;

use super::audit::log_event;
use super::dedup::{judge_text, normalize_value, FusionAction, FusionStrategy, TextVerdict};
use super::entities;
use super::error::{GraphError, GraphResult};
use super::types::{EntityFact, FactRank, FactSource};
use super::{cosine_threshold_to_l2, embedding_to_bytes, l2_to_cosine, parse_col};

/// Ingestion input shape for a candidate fact.
#[derive(Debug, Clone, Deserialize)]
pub struct FactDraft {
    pub fact_type: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_json: Option<serde_json::Value>,
    #[serde(default = "default_source")]
    pub source: FactSource,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rank: Option<FactRank>,
}

fn default_source() -> FactSource {
    FactSource::Extracted
}

/// What the dedup pipeline did with an incoming fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupAction {
    /// No duplicate found; a new active fact was created.
    Created,
    /// Duplicate found; the existing fact was returned untouched.
    Skipped,
    /// Duplicate found; the existing fact was boosted or edited instead of
    /// creating a new row.
    Updated,
    /// The old fact was closed and a new active fact created.
    Superseded,
    /// A new fact was created with `needs_review` set, pending a human call.
    FlaggedForReview,
}

/// Result returned from a fact write.
#[derive(Debug, Serialize)]
pub struct FactWriteResult {
    pub fact: EntityFact,
    pub action: DedupAction,
    /// The pre-existing fact the pipeline matched against, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
    /// Diagnostic note, e.g. `"semantic cos=0.91"` or `"embedding_unavailable"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result returned from a batch ingestion.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub created: Vec<EntityFact>,
    /// Pairs of (closed fact id, replacement fact).
    pub superseded: Vec<(String, EntityFact)>,
    pub skipped: usize,
}

const FACT_COLS: &str = "id, entity_id, fact_type, category, value, value_json, source, \
     confidence, rank, needs_review, valid_from, valid_until, created_at";

fn fact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityFact> {
    let value_json: Option<String> = row.get(5)?;
    Ok(EntityFact {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        fact_type: row.get(2)?,
        category: row.get(3)?,
        value: row.get(4)?,
        value_json: value_json.and_then(|s| serde_json::from_str(&s).ok()),
        source: parse_col(6, row.get::<_, String>(6)?)?,
        confidence: row.get(7)?,
        rank: parse_col(8, row.get::<_, String>(8)?)?,
        needs_review: row.get(9)?,
        valid_from: row.get(10)?,
        valid_until: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// Fetch a fact by id.
pub fn find_fact(conn: &Connection, fact_id: &str) -> GraphResult<EntityFact> {
    conn.query_row(
        &format!("SELECT {FACT_COLS} FROM entity_facts WHERE id = ?1"),
        params![fact_id],
        fact_from_row,
    )
    .optional()?
    .ok_or_else(|| GraphError::FactNotFound(fact_id.to_string()))
}

enum SemanticOutcome {
    /// Best active match at or above the cosine threshold.
    Match {
        fact: EntityFact,
        cosine: f64,
        embedding: Vec<f32>,
    },
    /// Embedding computed, nothing close enough in the store.
    NoMatch { embedding: Vec<f32> },
    /// The provider failed; the caller falls back to the text path.
    Unavailable,
}

/// KNN over the fact embeddings, post-filtered to this entity's active facts
/// (and the same fact type when so configured).
fn semantic_duplicate(
    conn: &Connection,
    entity_id: &str,
    fact_type: &str,
    value: &str,
    embedder: &dyn EmbeddingProvider,
    config: &DedupConfig,
) -> GraphResult<SemanticOutcome> {
    let embedding = match embedder.embed(value) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "embedding generation failed, semantic dedup skipped");
            return Ok(SemanticOutcome::Unavailable);
        }
    };

    let max_distance = cosine_threshold_to_l2(config.semantic_threshold);
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM entity_facts_vec WHERE embedding MATCH ?1 \
         ORDER BY distance LIMIT ?2",
    )?;
    let candidates: Vec<(String, f64)> = stmt
        .query_map(
            params![embedding_to_bytes(&embedding), config.knn_candidates as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for (candidate_id, distance) in candidates {
        // Results are ordered by distance — stop once we're past the threshold
        if distance > max_distance {
            break;
        }
        let fact = match conn
            .query_row(
                &format!("SELECT {FACT_COLS} FROM entity_facts WHERE id = ?1"),
                params![candidate_id],
                fact_from_row,
            )
            .optional()?
        {
            Some(f) => f,
            None => continue,
        };
        if fact.entity_id != entity_id || !fact.is_active() {
            continue;
        }
        if config.scope_to_fact_type && fact.fact_type != fact_type {
            continue;
        }
        return Ok(SemanticOutcome::Match {
            fact,
            cosine: l2_to_cosine(distance),
            embedding,
        });
    }

    Ok(SemanticOutcome::NoMatch { embedding })
}

/// Insert a new active fact row.
fn insert_fact(
    conn: &Connection,
    entity_id: &str,
    draft: &FactDraft,
    needs_review: bool,
) -> GraphResult<EntityFact> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let value_json = draft
        .value_json
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO entity_facts (id, entity_id, fact_type, category, value, value_json, \
         source, confidence, rank, needs_review, valid_from, valid_until, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?11)",
        params![
            id,
            entity_id,
            draft.fact_type,
            draft.category,
            draft.value,
            value_json,
            draft.source.as_str(),
            draft.confidence.unwrap_or(1.0),
            draft.rank.unwrap_or(FactRank::Normal).as_str(),
            needs_review,
            now,
        ],
    )?;

    log_event(
        conn,
        "create",
        &id,
        needs_review.then(|| serde_json::json!({"needs_review": true})).as_ref(),
    )?;
    find_fact(conn, &id)
}

/// Store a fact embedding, replacing any previous vector for this fact.
fn store_embedding(conn: &Connection, fact_id: &str, embedding: &[f32]) -> GraphResult<()> {
    conn.execute(
        "DELETE FROM entity_facts_vec WHERE id = ?1",
        params![fact_id],
    )?;
    conn.execute(
        "INSERT INTO entity_facts_vec (id, embedding) VALUES (?1, ?2)",
        params![fact_id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

/// Close an active fact by setting `valid_until = now`.
fn close_fact(conn: &Connection, fact_id: &str) -> GraphResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE entity_facts SET valid_until = ?1 WHERE id = ?2 AND valid_until IS NULL",
        params![now, fact_id],
    )?;
    Ok(())
}

/// Full write path: semantic dedup → fusion decision → text fallback → create.
///
/// The steps are persisted individually, not wrapped in one transaction: a
/// crash between close-old and create-new leaves partially-applied state that
/// the next identical ingestion converges.
pub fn create_with_dedup(
    conn: &Connection,
    entity_id: &str,
    draft: &FactDraft,
    embedder: Option<&dyn EmbeddingProvider>,
    fusion: Option<&dyn FusionStrategy>,
    config: &DedupConfig,
) -> GraphResult<FactWriteResult> {
    if !entities::exists(conn, entity_id)? {
        return Err(GraphError::EntityNotFound(entity_id.to_string()));
    }
    if draft.value.is_none() && draft.value_json.is_none() {
        return Err(GraphError::BadRequest(
            "fact requires a value or value_json".into(),
        ));
    }

    // Tier 1: semantic check, when there is text to embed and a provider.
    if let (Some(value), Some(embedder)) = (draft.value.as_deref(), embedder) {
        match semantic_duplicate(conn, entity_id, &draft.fact_type, value, embedder, config)? {
            SemanticOutcome::Match {
                fact,
                cosine,
                embedding,
            } => {
                return apply_fusion(conn, entity_id, draft, fact, cosine, embedding, fusion);
            }
            SemanticOutcome::NoMatch { embedding } => {
                // Nothing close by meaning — create, reusing the vector.
                let fact = insert_fact(conn, entity_id, draft, false)?;
                store_embedding(conn, &fact.id, &embedding)?;
                return Ok(FactWriteResult {
                    fact,
                    action: DedupAction::Created,
                    matched_id: None,
                    reason: None,
                });
            }
            SemanticOutcome::Unavailable => {}
        }
    }

    // Tier 2/3: text-based dedup over active facts of the same type.
    if let Some(value) = draft.value.as_deref() {
        let mut stmt = conn.prepare(
            "SELECT id, value FROM entity_facts \
             WHERE entity_id = ?1 AND fact_type = ?2 AND valid_until IS NULL \
             AND value IS NOT NULL",
        )?;
        let candidates: Vec<(String, String)> = stmt
            .query_map(params![entity_id, draft.fact_type], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        match judge_text(&draft.fact_type, value, &candidates, config) {
            TextVerdict::Exact { fact_id } => {
                debug!(fact_id = %fact_id, "exact duplicate, skipping");
                return Ok(FactWriteResult {
                    fact: find_fact(conn, &fact_id)?,
                    action: DedupAction::Skipped,
                    matched_id: Some(fact_id),
                    reason: Some("exact_text_match".into()),
                });
            }
            TextVerdict::Boost { fact_id, similarity } => {
                conn.execute(
                    "UPDATE entity_facts SET confidence = MIN(confidence + 0.1, 1.0) \
                     WHERE id = ?1",
                    params![fact_id],
                )?;
                log_event(
                    conn,
                    "update",
                    &fact_id,
                    Some(&serde_json::json!({"reason": "deduplication"})),
                )?;
                return Ok(FactWriteResult {
                    fact: find_fact(conn, &fact_id)?,
                    action: DedupAction::Updated,
                    matched_id: Some(fact_id),
                    reason: Some(format!("fuzzy sim={similarity:.2}")),
                });
            }
            TextVerdict::Supersede { fact_id, similarity } => {
                return supersede(
                    conn,
                    entity_id,
                    draft,
                    &fact_id,
                    format!("temporal sim={similarity:.2}"),
                    embedder,
                );
            }
            TextVerdict::NoDuplicate => {}
        }
    }

    // No duplicate by either path — create, embedding best-effort.
    let fact = insert_fact(conn, entity_id, draft, false)?;
    let embedded = embed_best_effort(conn, &fact, embedder);
    let reason = (embedder.is_some() && !embedded && fact.value.is_some())
        .then(|| "embedding_unavailable".to_string());
    Ok(FactWriteResult {
        fact,
        action: DedupAction::Created,
        matched_id: None,
        reason,
    })
}

/// Attempt to embed and store a fact's value. Returns `true` on success;
/// failure is logged and absorbed.
fn embed_best_effort(
    conn: &Connection,
    fact: &EntityFact,
    embedder: Option<&dyn EmbeddingProvider>,
) -> bool {
    let (Some(embedder), Some(value)) = (embedder, fact.value.as_deref()) else {
        return false;
    };
    match embedder.embed(value) {
        Ok(embedding) => match store_embedding(conn, &fact.id, &embedding) {
            Ok(()) => true,
            Err(e) => {
                warn!(fact_id = %fact.id, error = %e, "failed to store embedding");
                false
            }
        },
        Err(e) => {
            warn!(fact_id = %fact.id, error = %e, "embedding generation failed");
            false
        }
    }
}

/// Apply the fusion decision for a semantic duplicate. Without a configured
/// strategy the policy is skip.
fn apply_fusion(
    conn: &Connection,
    entity_id: &str,
    draft: &FactDraft,
    existing: EntityFact,
    cosine: f64,
    embedding: Vec<f32>,
    fusion: Option<&dyn FusionStrategy>,
) -> GraphResult<FactWriteResult> {
    let new_value = draft.value.as_deref().unwrap_or_default();
    let action = fusion
        .map(|f| f.decide(&existing, new_value).action)
        .unwrap_or(FusionAction::Skip);
    let reason = format!("semantic cos={cosine:.2}");

    match action {
        FusionAction::Skip => Ok(FactWriteResult {
            matched_id: Some(existing.id.clone()),
            fact: existing,
            action: DedupAction::Skipped,
            reason: Some(reason),
        }),
        FusionAction::Update => {
            conn.execute(
                "UPDATE entity_facts SET value = ?1, confidence = MAX(confidence, ?2) \
                 WHERE id = ?3",
                params![new_value, draft.confidence.unwrap_or(1.0), existing.id],
            )?;
            store_embedding(conn, &existing.id, &embedding)?;
            log_event(
                conn,
                "update",
                &existing.id,
                Some(&serde_json::json!({"reason": "fusion_update"})),
            )?;
            Ok(FactWriteResult {
                fact: find_fact(conn, &existing.id)?,
                action: DedupAction::Updated,
                matched_id: Some(existing.id),
                reason: Some(reason),
            })
        }
        FusionAction::Supersede => supersede(conn, entity_id, draft, &existing.id, reason, None)
            .map(|mut result| {
                // Reuse the vector computed during the duplicate check.
                if store_embedding(conn, &result.fact.id, &embedding).is_err() {
                    result.reason = Some("embedding_unavailable".into());
                }
                result
            }),
        FusionAction::Review => {
            let fact = insert_fact(conn, entity_id, draft, true)?;
            store_embedding(conn, &fact.id, &embedding)?;
            Ok(FactWriteResult {
                fact,
                action: DedupAction::FlaggedForReview,
                matched_id: Some(existing.id),
                reason: Some(reason),
            })
        }
    }
}

/// Close the old fact and create the replacement as the active fact.
fn supersede(
    conn: &Connection,
    entity_id: &str,
    draft: &FactDraft,
    old_id: &str,
    reason: String,
    embedder: Option<&dyn EmbeddingProvider>,
) -> GraphResult<FactWriteResult> {
    close_fact(conn, old_id)?;
    let fact = insert_fact(conn, entity_id, draft, false)?;
    log_event(
        conn,
        "supersede",
        old_id,
        Some(&serde_json::json!({"superseded_by": fact.id})),
    )?;
    embed_best_effort(conn, &fact, embedder);
    Ok(FactWriteResult {
        fact,
        action: DedupAction::Superseded,
        matched_id: Some(old_id.to_string()),
        reason: Some(reason),
    })
}

/// Batch ingestion: dedup within the batch first (same fact type + normalized
/// value keeps the higher-confidence draft), then each survivor goes through
/// the store-level pipeline.
pub fn process_batch(
    conn: &Connection,
    entity_id: &str,
    drafts: Vec<FactDraft>,
    embedder: Option<&dyn EmbeddingProvider>,
    fusion: Option<&dyn FusionStrategy>,
    config: &DedupConfig,
) -> GraphResult<BatchOutcome> {
    let mut kept: Vec<FactDraft> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut skipped = 0usize;

    for draft in drafts {
        let key = draft
            .value
            .as_deref()
            .map(|v| (draft.fact_type.clone(), normalize_value(v)));
        let Some(key) = key else {
            // No text value, nothing to compare against.
            kept.push(draft);
            continue;
        };
        match index.get(&key) {
            Some(&i) => {
                skipped += 1;
                if draft.confidence.unwrap_or(1.0) > kept[i].confidence.unwrap_or(1.0) {
                    kept[i] = draft;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(draft);
            }
        }
    }

    let mut outcome = BatchOutcome {
        created: Vec::new(),
        superseded: Vec::new(),
        skipped,
    };

    for draft in &kept {
        let result = create_with_dedup(conn, entity_id, draft, embedder, fusion, config)?;
        match result.action {
            DedupAction::Created | DedupAction::FlaggedForReview => {
                outcome.created.push(result.fact)
            }
            DedupAction::Superseded => {
                // matched_id is always set for a supersession
                if let Some(old_id) = result.matched_id {
                    outcome.superseded.push((old_id, result.fact));
                }
            }
            DedupAction::Skipped | DedupAction::Updated => outcome.skipped += 1,
        }
    }

    Ok(outcome)
}

/// List an entity's facts, newest first. Without `include_history` only the
/// active window is returned.
pub fn find_by_entity(
    conn: &Connection,
    entity_id: &str,
    include_history: bool,
) -> GraphResult<Vec<EntityFact>> {
    let sql = if include_history {
        format!(
            "SELECT {FACT_COLS} FROM entity_facts WHERE entity_id = ?1 \
             ORDER BY valid_from DESC"
        )
    } else {
        format!(
            "SELECT {FACT_COLS} FROM entity_facts \
             WHERE entity_id = ?1 AND valid_until IS NULL ORDER BY valid_from DESC"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![entity_id], fact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active facts ordered for presentation: preferred > normal > deprecated,
/// then fact type, then recency.
pub fn find_by_entity_ranked(conn: &Connection, entity_id: &str) -> GraphResult<Vec<EntityFact>> {
    let sql = format!(
        "SELECT {FACT_COLS} FROM entity_facts \
         WHERE entity_id = ?1 AND valid_until IS NULL \
         ORDER BY CASE rank WHEN 'preferred' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END, \
         fact_type, valid_from DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![entity_id], fact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Closed facts, most recently closed first.
pub fn find_history(
    conn: &Connection,
    entity_id: &str,
    limit: usize,
) -> GraphResult<Vec<EntityFact>> {
    let sql = format!(
        "SELECT {FACT_COLS} FROM entity_facts \
         WHERE entity_id = ?1 AND valid_until IS NOT NULL \
         ORDER BY valid_until DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![entity_id, limit as i64], fact_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Close a fact outside the normal supersession flow — the compensation
/// primitive for duplicates created by a detected race. Idempotent on
/// already-closed facts.
pub fn invalidate(conn: &Connection, fact_id: &str) -> GraphResult<EntityFact> {
    let fact = find_fact(conn, fact_id)?;
    if fact.is_active() {
        close_fact(conn, fact_id)?;
        log_event(conn, "invalidate", fact_id, None)?;
    }
    find_fact(conn, fact_id)
}
