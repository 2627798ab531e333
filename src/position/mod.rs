//! Typed slot model for rule object references.
//!
//! Every rule family exposes a fixed set of positions ("slots") an object can
//! occupy, and every position accepts only a declared set of object types.
//! All lookups here are pure; the rule store consults them before persisting
//! a positioned item.

use serde::{Deserialize, Serialize};

/// Relative placement directive used by every move/copy operation: put the
/// moved set immediately before or after the destination rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Offset {
    Above,
    Below,
}

/// Policy chain a policy rule compiles into. Codes match the legacy
/// `policy_type` table and double as the strict compile sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i64)]
pub enum PolicyRuleType {
    Input = 1,
    Output = 2,
    Forward = 3,
    Snat = 4,
    Dnat = 5,
}

impl PolicyRuleType {
    /// Tables are always rendered in this sequence, regardless of the order
    /// rules arrive in.
    pub const COMPILE_ORDER: [PolicyRuleType; 5] = [
        PolicyRuleType::Input,
        PolicyRuleType::Output,
        PolicyRuleType::Forward,
        PolicyRuleType::Snat,
        PolicyRuleType::Dnat,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Input),
            2 => Some(Self::Output),
            3 => Some(Self::Forward),
            4 => Some(Self::Snat),
            5 => Some(Self::Dnat),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn table_name(self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::Forward => "FORWARD",
            Self::Snat => "SNAT",
            Self::Dnat => "DNAT",
        }
    }

    /// Chains in the filter table use -A <chain>; NAT types hook the nat
    /// table chains.
    pub fn chain(self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::Forward => "FORWARD",
            Self::Snat => "POSTROUTING",
            Self::Dnat => "PREROUTING",
        }
    }

    pub fn is_nat(self) -> bool {
        matches!(self, Self::Snat | Self::Dnat)
    }
}

/// Whether a slot holds network/service objects or interfaces. Replaces the
/// legacy 'O'/'I' content-string comparisons with an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Object,
    Interface,
}

/// Object type codes, preserved from the legacy `ipobj_type` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum ObjectType {
    Firewall = 0,
    IpService = 1,
    Tcp = 2,
    Icmp = 3,
    Udp = 4,
    Address = 5,
    Range = 6,
    Network = 7,
    Host = 8,
    Dns = 9,
    FirewallInterface = 10,
    HostInterface = 11,
    ObjectGroup = 20,
    ServiceGroup = 21,
    Mark = 30,
    Cluster = 100,
    OpenVpn = 311,
}

impl ObjectType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Firewall),
            1 => Some(Self::IpService),
            2 => Some(Self::Tcp),
            3 => Some(Self::Icmp),
            4 => Some(Self::Udp),
            5 => Some(Self::Address),
            6 => Some(Self::Range),
            7 => Some(Self::Network),
            8 => Some(Self::Host),
            9 => Some(Self::Dns),
            10 => Some(Self::FirewallInterface),
            11 => Some(Self::HostInterface),
            20 => Some(Self::ObjectGroup),
            21 => Some(Self::ServiceGroup),
            30 => Some(Self::Mark),
            100 => Some(Self::Cluster),
            311 => Some(Self::OpenVpn),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn is_group(self) -> bool {
        matches!(self, Self::ObjectGroup | Self::ServiceGroup)
    }

    pub fn is_interface(self) -> bool {
        matches!(self, Self::FirewallInterface | Self::HostInterface)
    }
}

/// A named role an object can fill within a rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RulePosition {
    // policy
    Source,
    Destination,
    Service,
    TranslatedSource,
    TranslatedDestination,
    TranslatedService,
    In,
    Out,
    Mark,
    // routing
    Gateway,
    // dhcp
    Network,
    Range,
    Router,
    Interface,
    // haproxy
    FrontendIp,
    FrontendPort,
    BackendIp,
    BackendPort,
    // keepalived
    VirtualIp,
}

/// Slot metadata: grid column ordinal, object-vs-interface kind, and whether
/// the slot carries NAT translation semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMeta {
    pub column: u8,
    pub kind: SlotKind,
    pub translated: bool,
}

const fn meta(column: u8, kind: SlotKind, translated: bool) -> PositionMeta {
    PositionMeta {
        column,
        kind,
        translated,
    }
}

/// Slot metadata for a policy rule type, or `None` when the slot does not
/// exist for that type (e.g. translated slots outside SNAT/DNAT). Column
/// ordinals mirror the legacy `policy_position` seed data.
pub fn position_meta(rule_type: PolicyRuleType, position: RulePosition) -> Option<PositionMeta> {
    use PolicyRuleType::*;
    use RulePosition::*;

    match (rule_type, position) {
        (Input, In) | (Output, Out) => Some(meta(1, SlotKind::Interface, false)),
        (Forward, In) | (Snat, Out) | (Dnat, In) => Some(meta(1, SlotKind::Interface, false)),
        (Forward, Out) => Some(meta(2, SlotKind::Interface, false)),

        (Input | Output | Snat | Dnat, Source) => Some(meta(2, SlotKind::Object, false)),
        (Forward, Source) => Some(meta(3, SlotKind::Object, false)),

        (Input | Output | Snat | Dnat, Destination) => Some(meta(3, SlotKind::Object, false)),
        (Forward, Destination) => Some(meta(4, SlotKind::Object, false)),

        (Input | Output | Snat | Dnat, Service) => Some(meta(4, SlotKind::Object, false)),
        (Forward, Service) => Some(meta(5, SlotKind::Object, false)),

        (Snat, TranslatedSource) => Some(meta(5, SlotKind::Object, true)),
        (Dnat, TranslatedDestination) => Some(meta(5, SlotKind::Object, true)),
        (Snat | Dnat, TranslatedService) => Some(meta(6, SlotKind::Object, true)),

        (_, Mark) => Some(meta(7, SlotKind::Object, false)),

        _ => None,
    }
}

const OBJECT_SLOT_TYPES: &[ObjectType] = &[
    ObjectType::Address,
    ObjectType::Range,
    ObjectType::Network,
    ObjectType::Host,
    ObjectType::Dns,
    ObjectType::FirewallInterface,
    ObjectType::HostInterface,
    ObjectType::ObjectGroup,
    ObjectType::OpenVpn,
];

const SERVICE_SLOT_TYPES: &[ObjectType] = &[
    ObjectType::IpService,
    ObjectType::Tcp,
    ObjectType::Icmp,
    ObjectType::Udp,
    ObjectType::ServiceGroup,
];

const INTERFACE_SLOT_TYPES: &[ObjectType] =
    &[ObjectType::FirewallInterface, ObjectType::HostInterface];

/// The set of object types a position accepts, mirroring the legacy
/// `ipobj_type__policy_position` mapping.
pub fn compatible_types(position: RulePosition) -> &'static [ObjectType] {
    use RulePosition::*;

    match position {
        Source | Destination | TranslatedSource | TranslatedDestination => OBJECT_SLOT_TYPES,
        Service | TranslatedService => SERVICE_SLOT_TYPES,
        In | Out | Interface => INTERFACE_SLOT_TYPES,
        Mark => &[ObjectType::Mark],
        Gateway | Router | FrontendIp | BackendIp | VirtualIp => &[ObjectType::Address],
        Network => &[ObjectType::Network],
        Range => &[ObjectType::Range],
        FrontendPort | BackendPort => &[ObjectType::Tcp],
    }
}

/// Compatibility check applied before a positioned item is persisted.
pub fn is_compatible(position: RulePosition, obj_type: ObjectType) -> bool {
    compatible_types(position).contains(&obj_type)
}
