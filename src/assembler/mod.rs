//! Joins rules with their positioned object references and produces the two
//! shapes consumers need: a compiler-oriented one (addresses, masks, ports,
//! mark codes) and a grid-oriented one (names plus owning firewall/cluster).
//!
//! Object groups and hosts are expanded into their concrete leaf objects, so
//! a rule referencing a group with three members yields three items.

pub mod error;


use crate::database::error::DatabaseError;
use crate::database::{self, IpObj, Rule, Tx};
use crate::position::{ObjectType, RulePosition};
use crate::rules::{self, RuleFamily};
use crate::Result;
use error::AssembleError;
use serde::Serialize;
use std::collections::HashSet;

/// A rule plus its resolved, order-sorted items.
#[derive(Debug, Clone, Serialize)]
pub struct RuleWithItems<T> {
    pub rule: Rule,
    pub items: Vec<T>,
}

/// Item shape consumed by the compiler: the object's literal data.
#[derive(Debug, Clone, Serialize)]
pub struct CompilerItem {
    pub entity_id: i64,
    pub obj_type: ObjectType,
    pub position: RulePosition,
    pub negate: bool,
    pub order: i64,
    pub name: String,
    pub address: Option<String>,
    pub netmask: Option<String>,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    pub protocol: Option<i64>,
    pub port_start: Option<i64>,
    pub port_end: Option<i64>,
    pub icmp_type: Option<i64>,
    pub icmp_code: Option<i64>,
    pub mark_code: Option<i64>,
}

/// Item shape consumed by the UI grid: names and owning firewall/cluster.
#[derive(Debug, Clone, Serialize)]
pub struct GridItem {
    pub id: i64,
    pub name: String,
    pub obj_type: ObjectType,
    pub position: RulePosition,
    pub negate: bool,
    pub order: i64,
    pub firewall_id: Option<i64>,
    pub firewall_name: Option<String>,
    pub cluster_id: Option<i64>,
    pub cluster_name: Option<String>,
}

/// Normalized intermediate: both output shapes are projections of this.
struct ResolvedItem {
    position: RulePosition,
    negate: bool,
    order: i64,
    obj: IpObj,
}

/// Assemble rules for the compiler. Disabled rules are included so a preview
/// compile can still render them.
pub async fn assemble_for_compiler(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    firewall: i64,
    family: RuleFamily,
    rule_ids: Option<&[i64]>,
) -> Result<Vec<RuleWithItems<CompilerItem>>> {
    let rules = load_rules(tx, fwcloud, firewall, family, rule_ids).await?;

    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let items = load_items(tx, &rule)
            .await?
            .into_iter()
            .map(|item| CompilerItem {
                entity_id: item.obj.id,
                obj_type: obj_type_of(&item.obj),
                position: item.position,
                negate: item.negate,
                order: item.order,
                name: item.obj.name,
                address: item.obj.address,
                netmask: item.obj.netmask,
                range_start: item.obj.range_start,
                range_end: item.obj.range_end,
                protocol: item.obj.protocol,
                port_start: item.obj.port_start,
                port_end: item.obj.port_end,
                icmp_type: item.obj.icmp_type,
                icmp_code: item.obj.icmp_code,
                mark_code: item.obj.mark_code,
            })
            .collect();
        out.push(RuleWithItems { rule, items });
    }

    Ok(out)
}

/// Assemble rules for the grid. Same logical items as the compiler shape,
/// only the field projection differs.
pub async fn assemble_for_grid(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    firewall: i64,
    family: RuleFamily,
    rule_ids: Option<&[i64]>,
) -> Result<Vec<RuleWithItems<GridItem>>> {
    let rules = load_rules(tx, fwcloud, firewall, family, rule_ids).await?;

    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let resolved = load_items(tx, &rule).await?;
        let mut items = Vec::with_capacity(resolved.len());
        for item in resolved {
            let (firewall_id, firewall_name, cluster_id, cluster_name) =
                owning_firewall(tx, &item.obj).await?;
            items.push(GridItem {
                id: item.obj.id,
                obj_type: obj_type_of(&item.obj),
                name: item.obj.name,
                position: item.position,
                negate: item.negate,
                order: item.order,
                firewall_id,
                firewall_name,
                cluster_id,
                cluster_name,
            });
        }
        out.push(RuleWithItems { rule, items });
    }

    Ok(out)
}

fn obj_type_of(obj: &IpObj) -> ObjectType {
    // Unknown codes degrade to Address so a stray row cannot poison a whole
    // assembly; the compiler will reject the item if it cannot render it.
    ObjectType::from_code(obj.obj_type).unwrap_or(ObjectType::Address)
}

async fn load_rules(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    firewall: i64,
    family: RuleFamily,
    rule_ids: Option<&[i64]>,
) -> Result<Vec<Rule>> {
    let fw = database::firewall_by_id(tx, firewall).await?;
    if fw.fwcloud != fwcloud {
        return Err(AssembleError::WrongTenant { firewall, fwcloud }.into());
    }

    match rule_ids {
        Some(ids) => {
            // Preserve the caller's id order in the result.
            let mut out = Vec::with_capacity(ids.len());
            for &id in ids {
                let rule = rules::get_rule(tx, id).await?;
                if rule.firewall == firewall && rule.family == family {
                    out.push(rule);
                }
            }
            Ok(out)
        }
        None => {
            const COLS: &str = "id, firewall, family, rule_type, group_id, rule_order, active, \
                 special, action, comment, style, max_lease, cfg_text, mark_id, network_id, \
                 range_id, router_id, interface_id, frontend_ip, frontend_port, backend_ip, \
                 backend_port";
            let sql = format!(
                "SELECT {COLS} FROM rules WHERE firewall = ? AND family = ? \
                 ORDER BY COALESCE(group_id, 0), rule_order, id"
            );
            Ok(sqlx::query_as::<_, Rule>(&sql)
                .bind(firewall)
                .bind(family)
                .fetch_all(&mut **tx)
                .await
                .map_err(|e| DatabaseError::query("loading rules for assembly", e))?)
        }
    }
}

async fn ipobj_by_id(tx: &mut Tx<'_>, id: i64) -> Result<IpObj> {
    let obj = sqlx::query_as::<_, IpObj>("SELECT * FROM ipobj WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading ipobj", e))?;
    obj.ok_or_else(|| AssembleError::not_found("ipobj", id).into())
}

/// Load a rule's positioned items plus the synthetic items implied by its
/// fixed per-family references, expand groups and hosts to leaves, and sort
/// by intra-slot order.
async fn load_items(tx: &mut Tx<'_>, rule: &Rule) -> Result<Vec<ResolvedItem>> {
    let rows = sqlx::query_as::<_, (RulePosition, Option<i64>, Option<i64>, bool, i64)>(
        "SELECT position, ipobj_id, group_id, negate, item_order FROM rule_item \
         WHERE rule_id = ? ORDER BY position, item_order, id",
    )
    .bind(rule.id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading rule items", e))?;

    let mut items = Vec::new();
    for (position, ipobj_id, group_id, negate, order) in rows {
        if let Some(obj_id) = ipobj_id {
            let obj = ipobj_by_id(tx, obj_id).await?;
            push_expanded(tx, &mut items, position, negate, order, obj).await?;
        }
        if let Some(gid) = group_id {
            expand_group(tx, &mut items, position, negate, order, gid).await?;
        }
    }

    // Fixed references get a synthetic slot each, order 0 so they lead.
    let fixed: [(Option<i64>, RulePosition); 9] = [
        (rule.mark_id, RulePosition::Mark),
        (rule.network_id, RulePosition::Network),
        (rule.range_id, RulePosition::Range),
        (rule.router_id, RulePosition::Router),
        (rule.interface_id, RulePosition::Interface),
        (rule.frontend_ip, RulePosition::FrontendIp),
        (rule.frontend_port, RulePosition::FrontendPort),
        (rule.backend_ip, RulePosition::BackendIp),
        (rule.backend_port, RulePosition::BackendPort),
    ];
    for (obj_id, position) in fixed {
        if let Some(obj_id) = obj_id {
            let obj = ipobj_by_id(tx, obj_id).await?;
            items.push(ResolvedItem {
                position,
                negate: false,
                order: 0,
                obj,
            });
        }
    }

    items.sort_by_key(|i| (i.order, i.obj.id));
    Ok(items)
}

/// Push an object, expanding hosts to the addresses of their interfaces.
async fn push_expanded(
    tx: &mut Tx<'_>,
    items: &mut Vec<ResolvedItem>,
    position: RulePosition,
    negate: bool,
    order: i64,
    obj: IpObj,
) -> Result<()> {
    if obj.obj_type == ObjectType::Host.code() {
        let addrs = sqlx::query_as::<_, IpObj>(
            "SELECT a.* FROM ipobj a \
             INNER JOIN ipobj i ON a.interface_id = i.id \
             WHERE i.host_id = ? ORDER BY a.id",
        )
        .bind(obj.id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("expanding host addresses", e))?;
        for addr in addrs {
            items.push(ResolvedItem {
                position,
                negate,
                order,
                obj: addr,
            });
        }
    } else {
        items.push(ResolvedItem {
            position,
            negate,
            order,
            obj,
        });
    }
    Ok(())
}

/// Expand a group reference into one item per concrete leaf member. Nested
/// groups are walked with an explicit worklist; the seen-set breaks cycles.
async fn expand_group(
    tx: &mut Tx<'_>,
    items: &mut Vec<ResolvedItem>,
    position: RulePosition,
    negate: bool,
    order: i64,
    group_id: i64,
) -> Result<()> {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut stack = vec![group_id];

    while let Some(gid) = stack.pop() {
        if !seen.insert(gid) {
            continue;
        }

        let members = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
            "SELECT ipobj_id, member_group_id FROM ipobj_group_member WHERE group_id = ?",
        )
        .bind(gid)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading group members", e))?;

        for (ipobj_id, member_group_id) in members {
            if let Some(obj_id) = ipobj_id {
                let obj = ipobj_by_id(tx, obj_id).await?;
                push_expanded(tx, items, position, negate, order, obj).await?;
            }
            if let Some(nested) = member_group_id {
                stack.push(nested);
            }
        }
    }

    Ok(())
}

async fn owning_firewall(
    tx: &mut Tx<'_>,
    obj: &IpObj,
) -> Result<(Option<i64>, Option<String>, Option<i64>, Option<String>)> {
    let Some(fw_id) = obj.firewall_id else {
        return Ok((None, None, None, None));
    };

    let fw = database::firewall_by_id(tx, fw_id).await?;
    let cluster = match fw.cluster {
        Some(cl_id) => sqlx::query_as::<_, (i64, String)>(
            "SELECT id, name FROM cluster WHERE id = ?",
        )
        .bind(cl_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading cluster", e))?,
        None => None,
    };

    let (cluster_id, cluster_name) = match cluster {
        Some((id, name)) => (Some(id), Some(name)),
        None => (None, None),
    };
    Ok((Some(fw.id), Some(fw.name.clone()), cluster_id, cluster_name))
}
