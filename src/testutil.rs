//! Shared fixtures for module tests: a temp-file backed database plus seed
//! helpers for the entities the stores operate on.

use crate::database::error::DatabaseError;
use crate::database::{Db, Rule, Tx};
use crate::position::PolicyRuleType;
use crate::rules::{self, CreateRule, RuleFamily};
use crate::Result;
use tempfile::NamedTempFile;

pub(crate) async fn setup_db() -> (NamedTempFile, Db) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Db::builder().db_path(temp_file.path()).build().await.unwrap();
    (temp_file, db)
}

pub(crate) async fn seed_fwcloud(tx: &mut Tx<'_>, name: &str) -> Result<i64> {
    Ok(sqlx::query("INSERT INTO fwcloud (name) VALUES (?)")
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("seeding fwcloud", e))?
        .last_insert_rowid())
}

pub(crate) async fn seed_firewall(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    options: i64,
) -> Result<i64> {
    Ok(
        sqlx::query("INSERT INTO firewall (fwcloud, name, options) VALUES (?, ?, ?)")
            .bind(fwcloud)
            .bind(name)
            .bind(options)
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::query("seeding firewall", e))?
            .last_insert_rowid(),
    )
}

pub(crate) async fn seed_cluster(tx: &mut Tx<'_>, fwcloud: i64, name: &str) -> Result<i64> {
    Ok(sqlx::query("INSERT INTO cluster (fwcloud, name) VALUES (?, ?)")
        .bind(fwcloud)
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("seeding cluster", e))?
        .last_insert_rowid())
}

pub(crate) async fn seed_group(
    tx: &mut Tx<'_>,
    firewall: i64,
    family: RuleFamily,
    name: &str,
) -> Result<i64> {
    Ok(
        sqlx::query("INSERT INTO rule_group (firewall, family, name) VALUES (?, ?, ?)")
            .bind(firewall)
            .bind(family)
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::query("seeding rule group", e))?
            .last_insert_rowid(),
    )
}

pub(crate) async fn seed_address(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    address: &str,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, name, obj_type, address) VALUES (?, ?, 5, ?)",
    )
    .bind(fwcloud)
    .bind(name)
    .bind(address)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding address", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_network(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    address: &str,
    netmask: &str,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, name, obj_type, address, netmask) VALUES (?, ?, 7, ?, ?)",
    )
    .bind(fwcloud)
    .bind(name)
    .bind(address)
    .bind(netmask)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding network", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_range(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    start: &str,
    end: &str,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, name, obj_type, range_start, range_end) \
         VALUES (?, ?, 6, ?, ?)",
    )
    .bind(fwcloud)
    .bind(name)
    .bind(start)
    .bind(end)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding range", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_tcp_service(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    port: i64,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, name, obj_type, protocol, port_start, port_end) \
         VALUES (?, ?, 2, 6, ?, ?)",
    )
    .bind(fwcloud)
    .bind(name)
    .bind(port)
    .bind(port)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding tcp service", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_mark(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    code: i64,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, name, obj_type, mark_code) VALUES (?, ?, 30, ?)",
    )
    .bind(fwcloud)
    .bind(name)
    .bind(code)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding mark", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_host(tx: &mut Tx<'_>, fwcloud: i64, name: &str) -> Result<i64> {
    Ok(
        sqlx::query("INSERT INTO ipobj (fwcloud, name, obj_type) VALUES (?, ?, 8)")
            .bind(fwcloud)
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::query("seeding host", e))?
            .last_insert_rowid(),
    )
}

pub(crate) async fn seed_host_interface(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    host: i64,
    name: &str,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, host_id, name, obj_type) VALUES (?, ?, ?, 11)",
    )
    .bind(fwcloud)
    .bind(host)
    .bind(name)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding host interface", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_interface_address(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    interface: i64,
    name: &str,
    address: &str,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj (fwcloud, interface_id, name, obj_type, address) \
         VALUES (?, ?, ?, 5, ?)",
    )
    .bind(fwcloud)
    .bind(interface)
    .bind(name)
    .bind(address)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding interface address", e))?
    .last_insert_rowid())
}

pub(crate) async fn seed_object_group(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    group_type: i64,
) -> Result<i64> {
    Ok(sqlx::query(
        "INSERT INTO ipobj_group (fwcloud, name, group_type) VALUES (?, ?, ?)",
    )
    .bind(fwcloud)
    .bind(name)
    .bind(group_type)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("seeding object group", e))?
    .last_insert_rowid())
}

pub(crate) async fn add_group_member(
    tx: &mut Tx<'_>,
    group: i64,
    ipobj: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO ipobj_group_member (group_id, ipobj_id) VALUES (?, ?)")
        .bind(group)
        .bind(ipobj)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("seeding group member", e))?;
    Ok(())
}

/// Shorthand: a policy rule appended at the end of its scope.
pub(crate) async fn policy_rule(
    tx: &mut Tx<'_>,
    firewall: i64,
    chain: PolicyRuleType,
    comment: &str,
) -> Result<Rule> {
    rules::create(
        tx,
        CreateRule::builder()
            .firewall(firewall)
            .family(RuleFamily::Policy)
            .rule_type(chain)
            .comment(comment.to_string())
            .build(),
    )
    .await
}

/// Shorthand: a grouped rule of an arbitrary family.
pub(crate) async fn grouped_rule(
    tx: &mut Tx<'_>,
    firewall: i64,
    family: RuleFamily,
    group: i64,
    comment: &str,
) -> Result<Rule> {
    rules::create(
        tx,
        CreateRule::builder()
            .firewall(firewall)
            .family(family)
            .group_id(group)
            .comment(comment.to_string())
            .build(),
    )
    .await
}

/// The (comment, order) pairs of a scope, for order assertions.
pub(crate) fn comment_orders(rules: &[Rule]) -> Vec<(String, i64)> {
    rules
        .iter()
        .map(|r| (r.comment.clone().unwrap_or_default(), r.rule_order))
        .collect()
}

/// Assert a scope's orders are exactly 1..N in the returned sequence.
pub(crate) fn assert_dense(rules: &[Rule]) {
    let orders: Vec<i64> = rules.iter().map(|r| r.rule_order).collect();
    let expected: Vec<i64> = (1..=rules.len() as i64).collect();
    assert_eq!(orders, expected, "scope orders are not dense: {orders:?}");
}
