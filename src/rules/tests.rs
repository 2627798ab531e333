use super::*;
use crate::position::{ObjectType, Offset, PolicyRuleType};
use crate::testutil::*;
use pretty_assertions::assert_eq;

async fn policy_scope(
    tx: &mut crate::database::Tx<'_>,
    firewall: i64,
) -> Vec<crate::database::Rule> {
    rules_in_scope(
        tx,
        &RuleScope {
            firewall,
            family: RuleFamily::Policy,
            group: None,
        },
    )
    .await
    .unwrap()
}

async fn seed_four(tx: &mut crate::database::Tx<'_>) -> i64 {
    let fwcloud = seed_fwcloud(tx, "cloud").await.unwrap();
    let fw = seed_firewall(tx, fwcloud, "fw", 0).await.unwrap();
    for name in ["A", "B", "C", "D"] {
        policy_rule(tx, fw, PolicyRuleType::Input, name).await.unwrap();
    }
    fw
}

#[tokio::test]
async fn create_appends_densely() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;

    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(
        comment_orders(&scope),
        vec![
            ("A".to_string(), 1),
            ("B".to_string(), 2),
            ("C".to_string(), 3),
            ("D".to_string(), 4),
        ]
    );
}

#[tokio::test]
async fn move_below_worked_example() {
    // [A=1,B=2,C=3,D=4]; move([A], C, Below) => [B=1,C=2,A=3,D=4]
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;
    let (a, c) = (scope[0].id, scope[2].id);

    move_rules(&mut tx, &[a], c, Offset::Below).await.unwrap();

    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(
        comment_orders(&scope),
        vec![
            ("B".to_string(), 1),
            ("C".to_string(), 2),
            ("A".to_string(), 3),
            ("D".to_string(), 4),
        ]
    );
}

#[tokio::test]
async fn move_above_backward() {
    // [A,B,C,D]; move([D], B, Above) => [A,D,B,C]
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;
    let (b, d) = (scope[1].id, scope[3].id);

    move_rules(&mut tx, &[d], b, Offset::Above).await.unwrap();

    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(
        comment_orders(&scope),
        vec![
            ("A".to_string(), 1),
            ("D".to_string(), 2),
            ("B".to_string(), 3),
            ("C".to_string(), 4),
        ]
    );
}

#[tokio::test]
async fn move_multiple_keeps_relative_order() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;
    let (a, b, d) = (scope[0].id, scope[1].id, scope[3].id);

    // Move A and B (in that order) below D.
    let moved = move_rules(&mut tx, &[b, a], d, Offset::Below).await.unwrap();
    assert_eq!(moved.len(), 2);

    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(
        comment_orders(&scope),
        vec![
            ("C".to_string(), 1),
            ("D".to_string(), 2),
            ("A".to_string(), 3),
            ("B".to_string(), 4),
        ]
    );
}

#[tokio::test]
async fn noop_move_is_idempotent() {
    // Moving a rule above its immediate successor changes nothing.
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let before = policy_scope(&mut tx, fw).await;
    let (b, c) = (before[1].id, before[2].id);

    move_rules(&mut tx, &[b], c, Offset::Above).await.unwrap();

    let after = policy_scope(&mut tx, fw).await;
    assert_eq!(comment_orders(&before), comment_orders(&after));
}

#[tokio::test]
async fn empty_ids_is_noop() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;

    let moved = move_rules(&mut tx, &[], scope[0].id, Offset::Above)
        .await
        .unwrap();
    assert!(moved.is_empty());
    assert_dense(&policy_scope(&mut tx, fw).await);
}

#[tokio::test]
async fn move_to_missing_destination_fails_before_writes() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let before = policy_scope(&mut tx, fw).await;

    let err = move_rules(&mut tx, &[before[0].id], 9999, Offset::Above)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let after = policy_scope(&mut tx, fw).await;
    assert_eq!(comment_orders(&before), comment_orders(&after));
}

#[tokio::test]
async fn copy_preserves_originals() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;
    let (a, b, d) = (scope[0].id, scope[1].id, scope[3].id);

    let copies = copy_rules(&mut tx, &[a, b], d, Offset::Above).await.unwrap();
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().all(|c| c.id != a && c.id != b));

    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(scope.len(), 6);
    // Originals still present with their field values.
    assert!(scope.iter().any(|r| r.id == a && r.comment.as_deref() == Some("A")));
    assert!(scope.iter().any(|r| r.id == b && r.comment.as_deref() == Some("B")));
    // Copies sit contiguously above D, mirroring the order of `ids`.
    assert_eq!(
        comment_orders(&scope),
        vec![
            ("A".to_string(), 1),
            ("B".to_string(), 2),
            ("C".to_string(), 3),
            ("A".to_string(), 4),
            ("B".to_string(), 5),
            ("D".to_string(), 6),
        ]
    );
}

#[tokio::test]
async fn copy_duplicates_positioned_items() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fwcloud = seed_fwcloud(&mut tx, "cloud").await.unwrap();
    let fw = seed_firewall(&mut tx, fwcloud, "fw", 0).await.unwrap();
    let a = policy_rule(&mut tx, fw, PolicyRuleType::Input, "A").await.unwrap();
    let b = policy_rule(&mut tx, fw, PolicyRuleType::Input, "B").await.unwrap();
    let addr = seed_address(&mut tx, fwcloud, "web", "10.0.0.1").await.unwrap();
    add_rule_item(&mut tx, a.id, RulePosition::Source, ItemRef::Object(addr), false)
        .await
        .unwrap();

    let copies = copy_rules(&mut tx, &[a.id], b.id, Offset::Below).await.unwrap();

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rule_item WHERE rule_id = ?")
            .bind(copies[0].id)
            .fetch_one(&mut *tx)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn move_across_groups_reparents() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fwcloud = seed_fwcloud(&mut tx, "cloud").await.unwrap();
    let fw = seed_firewall(&mut tx, fwcloud, "fw", 0).await.unwrap();
    let g1 = seed_group(&mut tx, fw, RuleFamily::Haproxy, "g1").await.unwrap();
    let g2 = seed_group(&mut tx, fw, RuleFamily::Haproxy, "g2").await.unwrap();

    let r1 = grouped_rule(&mut tx, fw, RuleFamily::Haproxy, g1, "r1").await.unwrap();
    let _r2 = grouped_rule(&mut tx, fw, RuleFamily::Haproxy, g1, "r2").await.unwrap();
    let d1 = grouped_rule(&mut tx, fw, RuleFamily::Haproxy, g2, "d1").await.unwrap();
    let _d2 = grouped_rule(&mut tx, fw, RuleFamily::Haproxy, g2, "d2").await.unwrap();

    let moved = move_rules(&mut tx, &[r1.id], d1.id, Offset::Below).await.unwrap();
    assert_eq!(moved[0].group_id, Some(g2));

    let scope1 = rules_in_scope(
        &mut tx,
        &RuleScope {
            firewall: fw,
            family: RuleFamily::Haproxy,
            group: Some(g1),
        },
    )
    .await
    .unwrap();
    let scope2 = rules_in_scope(
        &mut tx,
        &RuleScope {
            firewall: fw,
            family: RuleFamily::Haproxy,
            group: Some(g2),
        },
    )
    .await
    .unwrap();

    assert_eq!(scope1.len(), 1);
    assert_eq!(scope2.len(), 3);
    assert_dense(&scope1);
    assert_dense(&scope2);
    assert_eq!(
        comment_orders(&scope2),
        vec![
            ("d1".to_string(), 1),
            ("r1".to_string(), 2),
            ("d2".to_string(), 3),
        ]
    );
}

#[tokio::test]
async fn remove_renumbers_the_scope() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;

    let removed = remove_rule(&mut tx, scope[1].id).await.unwrap();
    assert_eq!(removed.comment.as_deref(), Some("B"));

    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(
        comment_orders(&scope),
        vec![
            ("A".to_string(), 1),
            ("C".to_string(), 2),
            ("D".to_string(), 3),
        ]
    );
}

#[tokio::test]
async fn dense_invariant_survives_op_sequences() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;

    let scope = policy_scope(&mut tx, fw).await;
    let ids: Vec<i64> = scope.iter().map(|r| r.id).collect();

    move_rules(&mut tx, &[ids[3]], ids[0], Offset::Above).await.unwrap();
    assert_dense(&policy_scope(&mut tx, fw).await);

    copy_rules(&mut tx, &[ids[1], ids[2]], ids[0], Offset::Below).await.unwrap();
    assert_dense(&policy_scope(&mut tx, fw).await);

    remove_rule(&mut tx, ids[2]).await.unwrap();
    assert_dense(&policy_scope(&mut tx, fw).await);

    move_rules(&mut tx, &[ids[0], ids[1]], ids[3], Offset::Below).await.unwrap();
    assert_dense(&policy_scope(&mut tx, fw).await);
}

#[tokio::test]
async fn mutations_mark_firewall_uncompiled() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fwcloud = seed_fwcloud(&mut tx, "cloud").await.unwrap();
    let fw = seed_firewall(&mut tx, fwcloud, "fw", 0).await.unwrap();
    let a = policy_rule(&mut tx, fw, PolicyRuleType::Input, "A").await.unwrap();
    let b = policy_rule(&mut tx, fw, PolicyRuleType::Input, "B").await.unwrap();

    crate::database::mark_firewall_compiled(&mut tx, fw).await.unwrap();
    move_rules(&mut tx, &[a.id], b.id, Offset::Below).await.unwrap();

    let fw_row = crate::database::firewall_by_id(&mut tx, fw).await.unwrap();
    assert!(fw_row.needs_compile());
}

#[tokio::test]
async fn create_honors_placement() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fw = seed_four(&mut tx).await;
    let scope = policy_scope(&mut tx, fw).await;

    let created = create(
        &mut tx,
        CreateRule::builder()
            .firewall(fw)
            .family(RuleFamily::Policy)
            .rule_type(PolicyRuleType::Input)
            .comment("E".to_string())
            .to(scope[0].id)
            .offset(Offset::Above)
            .build(),
    )
    .await
    .unwrap();

    assert_eq!(created.rule_order, 1);
    let scope = policy_scope(&mut tx, fw).await;
    assert_dense(&scope);
    assert_eq!(scope[0].comment.as_deref(), Some("E"));
}

#[tokio::test]
async fn item_compatibility_is_enforced() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fwcloud = seed_fwcloud(&mut tx, "cloud").await.unwrap();
    let fw = seed_firewall(&mut tx, fwcloud, "fw", 0).await.unwrap();
    let rule = policy_rule(&mut tx, fw, PolicyRuleType::Input, "A").await.unwrap();
    let addr = seed_address(&mut tx, fwcloud, "web", "10.0.0.1").await.unwrap();
    let svc = seed_tcp_service(&mut tx, fwcloud, "https", 443).await.unwrap();

    // A service in an address slot is rejected before persistence.
    let err = add_rule_item(&mut tx, rule.id, RulePosition::Source, ItemRef::Object(svc), false)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    // A translated slot does not exist on an INPUT rule.
    let err = add_rule_item(
        &mut tx,
        rule.id,
        RulePosition::TranslatedSource,
        ItemRef::Object(addr),
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        crate::Error::RulesModule(RuleError::InvalidSlot { .. })
    ));

    // Compatible attachments land with increasing intra-slot order.
    let first = add_rule_item(&mut tx, rule.id, RulePosition::Source, ItemRef::Object(addr), false)
        .await
        .unwrap();
    let svc_item =
        add_rule_item(&mut tx, rule.id, RulePosition::Service, ItemRef::Object(svc), false)
            .await
            .unwrap();
    assert_eq!(first.item_order, 1);
    assert_eq!(svc_item.item_order, 1);
    assert_eq!(first.position, RulePosition::Source);

    let second = add_rule_item(&mut tx, rule.id, RulePosition::Source, ItemRef::Object(addr), true)
        .await
        .unwrap();
    assert_eq!(second.item_order, 2);
    assert!(second.negate);

    let obj_type = ObjectType::from_code(2).unwrap();
    assert_eq!(obj_type, ObjectType::Tcp);
}
