mod helpers;

use std::collections::HashSet;

use dossier::config::ProjectionConfig;
use dossier::graph::projection::get_graph;
use dossier::graph::relations::create;
use dossier::graph::types::{RelationSource, RelationType};
use helpers::{member, person, test_db};

#[test]
fn team_centered_on_lead_produces_two_collision_free_edges() {
    let conn = test_db();
    let lead = person(&conn, "Lead");
    let m = person(&conn, "Member");
    let s = person(&conn, "Sponsor");

    create(
        &conn,
        RelationType::Team,
        &[member(&lead, "lead"), member(&m, "member"), member(&s, "sponsor")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap();

    let view = get_graph(&conn, &ProjectionConfig::default(), &lead, 1).unwrap();

    assert_eq!(view.edges.len(), 2);
    let ids: HashSet<&str> = view.edges.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids.len(), 2);

    for edge in &view.edges {
        let role = edge.role.as_deref().unwrap();
        assert!(edge.id.contains(&edge.target));
        assert!(edge.id.contains(role));
    }
}

#[test]
fn node_map_is_first_seen_wins_across_relations() {
    let conn = test_db();
    let a = person(&conn, "A");
    let b = person(&conn, "B");

    create(
        &conn,
        RelationType::Friendship,
        &[member(&a, "friend"), member(&b, "friend")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap();
    create(
        &conn,
        RelationType::Marriage,
        &[member(&a, "spouse"), member(&b, "spouse")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap();

    let view = get_graph(&conn, &ProjectionConfig::default(), &a, 1).unwrap();
    // Two relations, but each entity appears exactly once in the node map.
    assert_eq!(view.nodes.len(), 2);
    assert_eq!(view.edges.len(), 2);
}
