mod helpers;

use dossier::graph::error::GraphError;
use dossier::graph::relations::{create, find_by_pair};
use dossier::graph::types::{RelationSource, RelationType};
use helpers::{member, organization, person, test_db};

#[test]
fn marriage_cardinality_is_enforced() {
    let conn = test_db();
    let a = person(&conn, "A");
    let b = person(&conn, "B");
    let c = person(&conn, "C");

    let err = create(
        &conn,
        RelationType::Marriage,
        &[member(&a, "spouse"), member(&b, "spouse"), member(&c, "spouse")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::InvalidCardinality { .. }));

    let ok = create(
        &conn,
        RelationType::Marriage,
        &[member(&a, "spouse"), member(&b, "spouse")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap();
    assert!(!ok.deduplicated);
}

#[test]
fn employment_role_vocabulary_is_enforced() {
    let conn = test_db();
    let a = person(&conn, "A");
    let acme = organization(&conn, "Acme");

    let err = create(
        &conn,
        RelationType::Employment,
        &[member(&a, "invalid_role"), member(&acme, "employer")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap_err();

    match err {
        GraphError::InvalidRole { role, valid_roles, .. } => {
            assert_eq!(role, "invalid_role");
            assert_eq!(valid_roles, vec!["employee", "employer"]);
        }
        other => panic!("expected InvalidRole, got {other:?}"),
    }
}

#[test]
fn find_by_pair_is_order_independent() {
    let conn = test_db();
    let a = person(&conn, "A");
    let acme = organization(&conn, "Acme");

    create(
        &conn,
        RelationType::Employment,
        &[member(&a, "employee"), member(&acme, "employer")],
        RelationSource::Manual,
        1.0,
        None,
    )
    .unwrap();

    let ab = find_by_pair(&conn, &a, &acme, None).unwrap();
    let ba = find_by_pair(&conn, &acme, &a, None).unwrap();
    assert_eq!(
        ab.map(|r| r.relation.id),
        ba.map(|r| r.relation.id),
        "find_by_pair(A, B) must equal find_by_pair(B, A)"
    );
}

#[test]
fn recreating_a_relation_is_idempotent() {
    let conn = test_db();
    let a = person(&conn, "A");
    let b = person(&conn, "B");

    let first = create(
        &conn,
        RelationType::Friendship,
        &[member(&a, "friend"), member(&b, "friend")],
        RelationSource::Extracted,
        0.7,
        None,
    )
    .unwrap();
    let second = create(
        &conn,
        RelationType::Friendship,
        &[member(&b, "friend"), member(&a, "friend")],
        RelationSource::Extracted,
        0.7,
        None,
    )
    .unwrap();

    assert!(second.deduplicated);
    assert_eq!(second.relation.id, first.relation.id);
}
