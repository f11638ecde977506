mod helpers;

use dossier::config::{DedupConfig, InferenceConfig, ProjectionConfig};
use dossier::graph::types::{RelationSource, RelationType};
use dossier::graph::{facts, inference, projection, relations};
use helpers::{fact_draft, organization, person, test_db};

/// The full ingestion control flow: facts in, inference, projection out.
#[test]
fn company_fact_flows_into_an_employment_edge() {
    let conn = test_db();
    let ada = person(&conn, "Ada");
    let acme = organization(&conn, "Acme");

    facts::process_batch(
        &conn,
        &ada,
        vec![fact_draft("company", "Acme, Inc."), fact_draft("position", "Engineer")],
        None,
        None,
        &DedupConfig::default(),
    )
    .unwrap();

    let report = inference::run(&conn, &InferenceConfig::default(), false).unwrap();
    assert_eq!(report.created, 1);
    assert!(report.errors.is_empty());

    let pair = relations::find_by_pair(&conn, &ada, &acme, Some(RelationType::Employment))
        .unwrap()
        .expect("inference should have linked person and organization");
    assert_eq!(pair.relation.source, RelationSource::Inferred);

    let view = projection::get_graph(&conn, &ProjectionConfig::default(), &ada, 1).unwrap();
    assert_eq!(view.nodes.len(), 2);
    assert_eq!(view.edges.len(), 1);
    assert_eq!(view.edges[0].target, acme);
}

#[test]
fn repeated_scans_never_duplicate_relations() {
    let conn = test_db();
    let ada = person(&conn, "Ada");
    organization(&conn, "Globex");

    facts::create_with_dedup(
        &conn,
        &ada,
        &fact_draft("company", "Globex Corporation"),
        None,
        None,
        &DedupConfig::default(),
    )
    .unwrap();

    for _ in 0..3 {
        inference::run(&conn, &InferenceConfig::default(), false).unwrap();
    }

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entity_relations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
}
