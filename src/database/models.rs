use bon::Builder;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::position::{PolicyRuleType, RulePosition};
use crate::rules::RuleFamily;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct Firewall {
    pub id: i64,
    pub fwcloud: i64,
    pub cluster: Option<i64>,
    pub fwmaster: bool,
    pub name: String,
    pub options: i64,
    pub status: i64,
}

impl Firewall {
    /// Stateful firewalls get the ESTABLISHED,RELATED preamble at compile
    /// time instead of explicit per-chain rules.
    pub fn is_stateful(&self) -> bool {
        self.options & 0x0001 != 0
    }

    pub fn needs_compile(&self) -> bool {
        self.status & 0x1 != 0
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct Cluster {
    pub id: i64,
    pub fwcloud: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct RuleGroup {
    pub id: i64,
    pub firewall: i64,
    pub family: RuleFamily,
    pub name: String,
}

/// One rule of any family. Family-specific references are nullable and only
/// populated for the family that uses them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct Rule {
    pub id: i64,
    pub firewall: i64,
    pub family: RuleFamily,
    pub rule_type: Option<PolicyRuleType>,
    pub group_id: Option<i64>,
    pub rule_order: i64,
    pub active: bool,
    pub special: i64,
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
}

pub const SPECIAL_NONE: i64 = 0;
pub const SPECIAL_CATCH_ALL: i64 = 1;
pub const SPECIAL_STATEFUL: i64 = 2;

pub const ACTION_ACCEPT: i64 = 1;
pub const ACTION_DROP: i64 = 2;
pub const ACTION_REJECT: i64 = 3;

/// A positioned object reference: (rule, slot, object-or-group, negate,
/// intra-slot order).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct RuleItem {
    pub id: i64,
    pub rule_id: i64,
    pub position: RulePosition,
    pub ipobj_id: Option<i64>,
    pub group_id: Option<i64>,
    pub negate: bool,
    pub item_order: i64,
}

/// The wide network/service object table: addresses, ranges, networks,
/// hosts, TCP/UDP/ICMP services, interfaces and iptables marks.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct IpObj {
    pub id: i64,
    pub fwcloud: i64,
    pub interface_id: Option<i64>,
    pub host_id: Option<i64>,
    pub firewall_id: Option<i64>,
    pub name: String,
    pub obj_type: i64,
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

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct IpObjGroup {
    pub id: i64,
    pub fwcloud: i64,
    pub name: String,
    pub group_type: i64,
}

/// One entry of the hierarchical navigation index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Builder)]
pub struct TreeNode {
    pub id: i64,
    pub fwcloud: i64,
    pub id_parent: Option<i64>,
    pub name: String,
    pub node_type: String,
    pub node_order: i64,
    pub id_obj: Option<i64>,
    pub obj_type: Option<i64>,
}
