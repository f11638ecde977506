//! Derives EMPLOYMENT relations from active `company` facts.
//!
//! Designed to run repeatedly from an external scheduler: the
//! `find_by_pair` gate makes every re-run idempotent, and per-fact failures
//! are collected into the report instead of aborting the scan.

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::InferenceConfig;

use super::dedup::similarity;
use super::error::GraphResult;
use super::relations::{self, MemberDraft};
use super::types::{RelationSource, RelationType};

/// One person↔organization match found during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct InferredMatch {
    pub fact_id: String,
    pub fact_value: String,
    pub person_id: String,
    pub organization_id: String,
    pub organization_name: String,
    pub similarity: f64,
    /// Set when an EMPLOYMENT relation between the pair already existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_relation_id: Option<String>,
    /// `false` in dry-run mode and for already-linked pairs.
    pub created: bool,
}

/// Outcome of one inference scan.
#[derive(Debug, Serialize)]
pub struct InferenceReport {
    pub scanned: usize,
    pub matches: Vec<InferredMatch>,
    pub created: usize,
    /// Facts with no usable organization match plus already-linked pairs.
    pub skipped: usize,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

/// Legal-entity suffixes dropped from the end of a company name.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "inc.", "incorporated", "llc", "ltd", "ltd.", "limited", "corp", "corp.",
    "corporation", "co", "co.", "company", "gmbh", "ag", "sa", "s.a.", "plc", "bv", "oy",
    "ab", "srl", "kk", "pty",
];

/// Normalize a company name for matching: strip quoting, lowercase, trim,
/// drop trailing legal-entity suffixes.
pub fn normalize_org_name(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '«' | '»' | '“' | '”' | '‘' | '’' | ','))
        .collect();
    let lowered = stripped.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if LEGAL_SUFFIXES.contains(last) && tokens.len() > 1 {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// The first token worth matching on: longer than two characters and not a
/// leading article.
fn first_significant_word(normalized: &str) -> Option<&str> {
    normalized
        .split_whitespace()
        .find(|w| w.len() > 2 && *w != "the")
}

struct CompanyFact {
    id: String,
    entity_id: String,
    value: String,
    confidence: f64,
}

struct OrgCandidate {
    id: String,
    name: String,
    normalized: String,
}

/// Scan active company facts of non-deleted persons and create the implied
/// EMPLOYMENT relations. With `dry_run` the report lists intended matches
/// without writing.
pub fn run(
    conn: &Connection,
    config: &InferenceConfig,
    dry_run: bool,
) -> GraphResult<InferenceReport> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.entity_id, f.value, f.confidence \
         FROM entity_facts f JOIN entities e ON e.id = f.entity_id \
         WHERE f.fact_type = ?1 AND f.valid_until IS NULL AND f.value IS NOT NULL \
         AND e.entity_type = 'person' AND e.deleted_at IS NULL \
         ORDER BY f.valid_from",
    )?;
    let facts: Vec<CompanyFact> = stmt
        .query_map(params![config.fact_type], |row| {
            Ok(CompanyFact {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                value: row.get(2)?,
                confidence: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name FROM entities \
         WHERE entity_type = 'organization' AND deleted_at IS NULL",
    )?;
    let orgs: Vec<OrgCandidate> = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            Ok(OrgCandidate {
                id: row.get(0)?,
                normalized: normalize_org_name(&name),
                name,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = InferenceReport {
        scanned: facts.len(),
        matches: Vec::new(),
        created: 0,
        skipped: 0,
        errors: Vec::new(),
        dry_run,
    };

    for fact in &facts {
        match infer_one(conn, config, fact, &orgs, dry_run) {
            Ok(Some(m)) => {
                if m.created {
                    report.created += 1;
                } else if m.existing_relation_id.is_some() {
                    report.skipped += 1;
                }
                report.matches.push(m);
            }
            Ok(None) => report.skipped += 1,
            Err(e) => report.errors.push(format!("fact {}: {e}", fact.id)),
        }
    }

    info!(
        scanned = report.scanned,
        created = report.created,
        skipped = report.skipped,
        errors = report.errors.len(),
        dry_run,
        "inference scan finished"
    );
    Ok(report)
}

fn infer_one(
    conn: &Connection,
    config: &InferenceConfig,
    fact: &CompanyFact,
    orgs: &[OrgCandidate],
    dry_run: bool,
) -> GraphResult<Option<InferredMatch>> {
    let normalized = normalize_org_name(&fact.value);
    if normalized.is_empty() {
        return Ok(None);
    }

    // (a) exact normalized-name match, then (b) first-significant-word scan.
    let candidate = orgs
        .iter()
        .find(|o| o.normalized == normalized)
        .or_else(|| {
            let word = first_significant_word(&normalized)?;
            orgs.iter()
                .filter(|o| o.normalized.contains(word))
                .max_by(|a, b| {
                    similarity(&normalized, &a.normalized)
                        .total_cmp(&similarity(&normalized, &b.normalized))
                })
        });

    let Some(org) = candidate else {
        debug!(fact_id = %fact.id, value = %fact.value, "no organization candidate");
        return Ok(None);
    };
    let score = similarity(&normalized, &org.normalized);
    if score < config.min_name_similarity {
        return Ok(None);
    }

    if let Some(existing) =
        relations::find_by_pair(conn, &fact.entity_id, &org.id, Some(RelationType::Employment))?
    {
        return Ok(Some(InferredMatch {
            fact_id: fact.id.clone(),
            fact_value: fact.value.clone(),
            person_id: fact.entity_id.clone(),
            organization_id: org.id.clone(),
            organization_name: org.name.clone(),
            similarity: score,
            existing_relation_id: Some(existing.relation.id),
            created: false,
        }));
    }

    if !dry_run {
        relations::create(
            conn,
            RelationType::Employment,
            &[
                MemberDraft {
                    entity_id: fact.entity_id.clone(),
                    role: "employee".into(),
                    label: None,
                    properties: None,
                },
                MemberDraft {
                    entity_id: org.id.clone(),
                    role: "employer".into(),
                    label: None,
                    properties: None,
                },
            ],
            RelationSource::Inferred,
            fact.confidence,
            Some(&serde_json::json!({
                "fact_id": fact.id,
                "fact_value": fact.value,
            })),
        )?;
    }

    Ok(Some(InferredMatch {
        fact_id: fact.id.clone(),
        fact_value: fact.value.clone(),
        person_id: fact.entity_id.clone(),
        organization_id: org.id.clone(),
        organization_name: org.name.clone(),
        similarity: score,
        existing_relation_id: None,
        created: !dry_run,
    }))
}
