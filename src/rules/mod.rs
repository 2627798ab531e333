//! Ordering engine shared by every rule family.
//!
//! All mutations keep the invariant that a scope (firewall + family +
//! optional group) holds `rule_order` values exactly 1..N, dense and unique.
//! Callers pass the transaction in; a whole move/copy/remove runs as one
//! unit of work and both touched scopes are renumbered before commit.

pub mod error;

#[cfg(test)]
mod tests;

use crate::database::error::DatabaseError;
use crate::database::{self, Rule, RuleItem, Tx};
use crate::position::{self, ObjectType, Offset, PolicyRuleType, RulePosition};
use crate::Result;
use bon::Builder;
use error::RuleError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rule family discriminator. Each family orders independently and compiles
/// to a different artifact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleFamily {
    Policy,
    Routing,
    Dhcp,
    Haproxy,
    Keepalived,
}

impl RuleFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Routing => "routing",
            Self::Dhcp => "dhcp",
            Self::Haproxy => "haproxy",
            Self::Keepalived => "keepalived",
        }
    }
}

/// The ordering domain: a group, or the ungrouped remainder of a firewall's
/// rules of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleScope {
    pub firewall: i64,
    pub family: RuleFamily,
    pub group: Option<i64>,
}

impl RuleScope {
    pub fn of(rule: &Rule) -> Self {
        Self {
            firewall: rule.firewall,
            family: rule.family,
            group: rule.group_id,
        }
    }
}

const RULE_COLS: &str = "id, firewall, family, rule_type, group_id, rule_order, active, special, \
     action, comment, style, max_lease, cfg_text, mark_id, network_id, range_id, router_id, \
     interface_id, frontend_ip, frontend_port, backend_ip, backend_port";

/// Fetch one rule or fail with NotFound.
pub async fn get_rule(tx: &mut Tx<'_>, id: i64) -> Result<Rule> {
    let sql = format!("SELECT {RULE_COLS} FROM rules WHERE id = ?");
    let rule = sqlx::query_as::<_, Rule>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading rule", e))?;

    rule.ok_or_else(|| RuleError::not_found("rule", id).into())
}

/// All rules of a scope, ordered; id breaks order ties deterministically.
pub async fn rules_in_scope(tx: &mut Tx<'_>, scope: &RuleScope) -> Result<Vec<Rule>> {
    let sql = match scope.group {
        Some(_) => format!(
            "SELECT {RULE_COLS} FROM rules \
             WHERE firewall = ? AND family = ? AND group_id = ? \
             ORDER BY rule_order ASC, id ASC"
        ),
        None => format!(
            "SELECT {RULE_COLS} FROM rules \
             WHERE firewall = ? AND family = ? AND group_id IS NULL \
             ORDER BY rule_order ASC, id ASC"
        ),
    };

    let mut query = sqlx::query_as::<_, Rule>(&sql)
        .bind(scope.firewall)
        .bind(scope.family);
    if let Some(group) = scope.group {
        query = query.bind(group);
    }

    Ok(query
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading scope rules", e))?)
}

/// The rule with the highest order in the scope, or None if the scope is
/// empty. New rules append after it.
pub async fn last_rule_in_scope(tx: &mut Tx<'_>, scope: &RuleScope) -> Result<Option<Rule>> {
    Ok(rules_in_scope(tx, scope).await?.into_iter().last())
}

/// Renumber a scope densely from 1, keeping the current relative order.
/// Pure re-indexing: it never reorders, only closes gaps and duplicates.
pub async fn refresh_orders(tx: &mut Tx<'_>, scope: &RuleScope) -> Result<()> {
    let rules = rules_in_scope(tx, scope).await?;

    for (idx, rule) in rules.iter().enumerate() {
        let order = idx as i64 + 1;
        if rule.rule_order != order {
            sqlx::query("UPDATE rules SET rule_order = ? WHERE id = ?")
                .bind(order)
                .bind(rule.id)
                .execute(&mut **tx)
                .await
                .map_err(|e| DatabaseError::query("refreshing rule orders", e))?;
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Builder)]
pub struct CreateRule {
    pub firewall: i64,
    pub family: RuleFamily,
    pub rule_type: Option<PolicyRuleType>,
    pub group_id: Option<i64>,
    #[builder(default = true)]
    pub active: bool,
    #[builder(default = database::SPECIAL_NONE)]
    pub special: i64,
    #[builder(default = database::ACTION_ACCEPT)]
    pub action: i64,
    pub comment: Option<String>,
    pub style: Option<String>,
    pub max_lease: Option<i64>,
    pub cfg_text: Option<String>,
    pub mark_id: Option<i64>,
    pub network_id: Option<i64>,
    pub range_id: Option<i64>,
    pub router_id: Option<i64>,
    pub interface_id: Option<i64>,
    pub frontend_ip: Option<i64>,
    pub frontend_port: Option<i64>,
    pub backend_ip: Option<i64>,
    pub backend_port: Option<i64>,
    /// Optional placement: move the new rule relative to this rule id.
    pub to: Option<i64>,
    pub offset: Option<Offset>,
}

/// Insert a rule appended at the end of its scope, then optionally move it
/// into place when a `(to, offset)` placement was given.
pub async fn create(tx: &mut Tx<'_>, data: CreateRule) -> Result<Rule> {
    let scope = RuleScope {
        firewall: data.firewall,
        family: data.family,
        group: data.group_id,
    };
    let order = match last_rule_in_scope(tx, &scope).await? {
        Some(last) => last.rule_order + 1,
        None => 1,
    };

    let id = sqlx::query(
        "INSERT INTO rules (firewall, family, rule_type, group_id, rule_order, active, special, \
         action, comment, style, max_lease, cfg_text, mark_id, network_id, range_id, router_id, \
         interface_id, frontend_ip, frontend_port, backend_ip, backend_port) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(data.firewall)
    .bind(data.family)
    .bind(data.rule_type)
    .bind(data.group_id)
    .bind(order)
    .bind(data.active)
    .bind(data.special)
    .bind(data.action)
    .bind(&data.comment)
    .bind(&data.style)
    .bind(data.max_lease)
    .bind(&data.cfg_text)
    .bind(data.mark_id)
    .bind(data.network_id)
    .bind(data.range_id)
    .bind(data.router_id)
    .bind(data.interface_id)
    .bind(data.frontend_ip)
    .bind(data.frontend_port)
    .bind(data.backend_ip)
    .bind(data.backend_port)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("inserting rule", e))?
    .last_insert_rowid();

    database::mark_firewall_uncompiled(tx, data.firewall).await?;

    if let (Some(to), Some(offset)) = (data.to, data.offset) {
        let moved = move_rules(tx, &[id], to, offset).await?;
        return moved
            .into_iter()
            .next()
            .ok_or_else(|| RuleError::not_found("rule", id).into());
    }

    get_rule(tx, id).await
}

/// Move `ids` so they sit contiguously immediately above/below the
/// destination rule, adopting its group. Returns the moved rules in their
/// final order. Empty `ids` is a no-op.
pub async fn move_rules(
    tx: &mut Tx<'_>,
    ids: &[i64],
    dest_rule_id: i64,
    offset: Offset,
) -> Result<Vec<Rule>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    // Load the moving set sorted by current order so relative order survives.
    let mut moving = Vec::with_capacity(ids.len());
    for &id in ids {
        moving.push(get_rule(tx, id).await?);
    }
    moving.sort_by_key(|r| (r.rule_order, r.id));

    let dest = get_rule(tx, dest_rule_id).await?;
    let dest_scope = RuleScope::of(&dest);
    let src_scope = RuleScope::of(&moving[0]);

    let moving_ids: Vec<i64> = moving.iter().map(|r| r.id).collect();
    let dest_position = dest.rule_order;
    let first_order = moving[0].rule_order;
    let forward = first_order < dest_position;
    let len = moving.len() as i64;

    debug!(
        dest = dest_rule_id,
        ?offset,
        forward,
        count = moving.len(),
        "moving rules"
    );

    // The affected set is the destination scope plus any cross-scope movers.
    let mut affected = rules_in_scope(tx, &dest_scope).await?;
    for rule in &moving {
        if !affected.iter().any(|r| r.id == rule.id) {
            affected.push(rule.clone());
        }
    }

    for rule in &mut affected {
        if let Some(idx) = moving_ids.iter().position(|&m| m == rule.id) {
            rule.rule_order = match offset {
                Offset::Above => dest_position + idx as i64,
                Offset::Below => dest_position + idx as i64 + 1,
            };
            rule.group_id = dest.group_id;
            sqlx::query("UPDATE rules SET rule_order = ?, group_id = ? WHERE id = ?")
                .bind(rule.rule_order)
                .bind(rule.group_id)
                .bind(rule.id)
                .execute(&mut **tx)
                .await
                .map_err(|e| DatabaseError::query("placing moved rule", e))?;
        } else {
            let displaced = match offset {
                Offset::Above => {
                    (forward && rule.rule_order >= dest_position)
                        || (!forward
                            && rule.rule_order >= dest_position
                            && rule.rule_order < first_order)
                }
                Offset::Below => {
                    (forward && rule.rule_order > dest_position)
                        || (!forward
                            && rule.rule_order > dest_position
                            && rule.rule_order < first_order)
                }
            };
            if displaced {
                rule.rule_order += len;
                sqlx::query("UPDATE rules SET rule_order = ? WHERE id = ?")
                    .bind(rule.rule_order)
                    .bind(rule.id)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| DatabaseError::query("shifting displaced rule", e))?;
            }
        }
    }

    refresh_orders(tx, &dest_scope).await?;
    if src_scope != dest_scope {
        refresh_orders(tx, &src_scope).await?;
    }

    database::mark_firewall_uncompiled(tx, dest.firewall).await?;
    if src_scope.firewall != dest_scope.firewall {
        database::mark_firewall_uncompiled(tx, src_scope.firewall).await?;
    }

    let mut result = Vec::with_capacity(moving_ids.len());
    for &id in &moving_ids {
        result.push(get_rule(tx, id).await?);
    }
    result.sort_by_key(|r| r.rule_order);
    Ok(result)
}

/// Duplicate `ids` (new identity, same field values and positioned items,
/// appended after the last rule of the first source's scope), then move the
/// copies into place at the destination. Originals are untouched.
pub async fn copy_rules(
    tx: &mut Tx<'_>,
    ids: &[i64],
    dest_rule_id: i64,
    offset: Offset,
) -> Result<Vec<Rule>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    // Copies mirror the order of `ids` as given by the caller.
    let mut sources = Vec::with_capacity(ids.len());
    for &id in ids {
        sources.push(get_rule(tx, id).await?);
    }

    let append_scope = RuleScope::of(&sources[0]);
    let base_order = last_rule_in_scope(tx, &append_scope)
        .await?
        .map(|r| r.rule_order)
        .unwrap_or(0);

    let mut copy_ids = Vec::with_capacity(sources.len());
    for (idx, src) in sources.iter().enumerate() {
        let copy_id = sqlx::query(
            "INSERT INTO rules (firewall, family, rule_type, group_id, rule_order, active, \
             special, action, comment, style, max_lease, cfg_text, mark_id, network_id, \
             range_id, router_id, interface_id, frontend_ip, frontend_port, backend_ip, \
             backend_port) \
             SELECT firewall, family, rule_type, group_id, ?, active, special, action, comment, \
             style, max_lease, cfg_text, mark_id, network_id, range_id, router_id, interface_id, \
             frontend_ip, frontend_port, backend_ip, backend_port \
             FROM rules WHERE id = ?",
        )
        .bind(base_order + idx as i64 + 1)
        .bind(src.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("copying rule", e))?
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO rule_item (rule_id, position, ipobj_id, group_id, negate, item_order) \
             SELECT ?, position, ipobj_id, group_id, negate, item_order \
             FROM rule_item WHERE rule_id = ?",
        )
        .bind(copy_id)
        .bind(src.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("copying rule items", e))?;

        copy_ids.push(copy_id);
    }

    move_rules(tx, &copy_ids, dest_rule_id, offset).await
}

/// Delete a rule and renumber the scope it vacated.
pub async fn remove_rule(tx: &mut Tx<'_>, id: i64) -> Result<Rule> {
    let rule = get_rule(tx, id).await?;

    sqlx::query("DELETE FROM rules WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("deleting rule", e))?;

    refresh_orders(tx, &RuleScope::of(&rule)).await?;
    database::mark_firewall_uncompiled(tx, rule.firewall).await?;

    Ok(rule)
}

/// What a positioned item references: a concrete object or an object group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRef {
    Object(i64),
    Group(i64),
}

/// Attach an object to a rule position, after checking the position exists
/// for the rule's type and accepts the object's type. Appended at the end of
/// the slot's intra-order.
pub async fn add_rule_item(
    tx: &mut Tx<'_>,
    rule_id: i64,
    rule_position: RulePosition,
    item: ItemRef,
    negate: bool,
) -> Result<RuleItem> {
    let rule = get_rule(tx, rule_id).await?;

    if rule.family == RuleFamily::Policy {
        let slot_exists = rule
            .rule_type
            .map(|t| position::position_meta(t, rule_position).is_some())
            .unwrap_or(false);
        if !slot_exists {
            return Err(RuleError::InvalidSlot {
                position: rule_position,
                rule_id,
            }
            .into());
        }
    }

    let obj_type = match item {
        ItemRef::Object(obj_id) => {
            let code: Option<i64> =
                sqlx::query_scalar("SELECT obj_type FROM ipobj WHERE id = ?")
                    .bind(obj_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| DatabaseError::query("loading object type", e))?;
            let code = code.ok_or(RuleError::not_found("ipobj", obj_id))?;
            ObjectType::from_code(code)
                .ok_or(RuleError::UnknownObjectType { code, id: obj_id })?
        }
        ItemRef::Group(group_id) => {
            let code: Option<i64> =
                sqlx::query_scalar("SELECT group_type FROM ipobj_group WHERE id = ?")
                    .bind(group_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| DatabaseError::query("loading group type", e))?;
            let code = code.ok_or(RuleError::not_found("ipobj_group", group_id))?;
            ObjectType::from_code(code)
                .ok_or(RuleError::UnknownObjectType { code, id: group_id })?
        }
    };

    if !position::is_compatible(rule_position, obj_type) {
        return Err(RuleError::InvalidPosition {
            position: rule_position,
            obj_type,
        }
        .into());
    }

    let next_order: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(item_order) FROM rule_item WHERE rule_id = ? AND position = ?",
    )
    .bind(rule_id)
    .bind(rule_position)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading item order", e))?;
    let item_order = next_order.unwrap_or(0) + 1;

    let (ipobj_id, group_id) = match item {
        ItemRef::Object(id) => (Some(id), None),
        ItemRef::Group(id) => (None, Some(id)),
    };

    let id = sqlx::query(
        "INSERT INTO rule_item (rule_id, position, ipobj_id, group_id, negate, item_order) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(rule_id)
    .bind(rule_position)
    .bind(ipobj_id)
    .bind(group_id)
    .bind(negate)
    .bind(item_order)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("inserting rule item", e))?
    .last_insert_rowid();

    database::mark_firewall_uncompiled(tx, rule.firewall).await?;

    Ok(RuleItem {
        id,
        rule_id,
        position: rule_position,
        ipobj_id,
        group_id,
        negate,
        item_order,
    })
}
