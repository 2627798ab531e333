use super::*;
use crate::testutil::*;

#[tokio::test]
async fn init_database_runs_migrations() {
    let (_temp, db) = setup_db().await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rules")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn firewall_lookup_and_status_bits() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fwcloud = seed_fwcloud(&mut tx, "cloud").await.unwrap();
    let fw = seed_firewall(&mut tx, fwcloud, "edge", 0x0001).await.unwrap();

    let row = firewall_by_id(&mut tx, fw).await.unwrap();
    assert!(row.is_stateful());
    assert!(row.needs_compile()); // firewalls start uncompiled

    mark_firewall_compiled(&mut tx, fw).await.unwrap();
    let row = firewall_by_id(&mut tx, fw).await.unwrap();
    assert!(!row.needs_compile());

    mark_firewall_uncompiled(&mut tx, fw).await.unwrap();
    let row = firewall_by_id(&mut tx, fw).await.unwrap();
    assert!(row.needs_compile());
}

#[tokio::test]
async fn missing_firewall_is_not_found() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();

    let err = firewall_by_id(&mut tx, 42).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let (_temp, db) = setup_db().await;

    {
        let mut tx = db.begin().await.unwrap();
        seed_fwcloud(&mut tx, "ephemeral").await.unwrap();
        // dropped without commit
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fwcloud")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn committed_transaction_persists() {
    let (_temp, db) = setup_db().await;

    let mut tx = db.begin().await.unwrap();
    seed_fwcloud(&mut tx, "durable").await.unwrap();
    commit(tx).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fwcloud")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn rule_items_cascade_with_their_rule() {
    let (_temp, db) = setup_db().await;
    let mut tx = db.begin().await.unwrap();
    let fwcloud = seed_fwcloud(&mut tx, "cloud").await.unwrap();
    let fw = seed_firewall(&mut tx, fwcloud, "edge", 0).await.unwrap();
    let rule = policy_rule(&mut tx, fw, crate::position::PolicyRuleType::Input, "A")
        .await
        .unwrap();
    let addr = seed_address(&mut tx, fwcloud, "web", "10.0.0.1").await.unwrap();
    crate::rules::add_rule_item(
        &mut tx,
        rule.id,
        crate::position::RulePosition::Source,
        crate::rules::ItemRef::Object(addr),
        false,
    )
    .await
    .unwrap();

    sqlx::query("DELETE FROM rules WHERE id = ?")
        .bind(rule.id)
        .execute(&mut *tx)
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rule_item WHERE rule_id = ?")
        .bind(rule.id)
        .fetch_one(&mut *tx)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
