//! Renders one policy rule into iptables shell lines.
//!
//! Multiple items in one slot combine with the family's OR syntax: addresses
//! fan out into one line per source/destination pair, TCP/UDP services fold
//! into `-m multiport`. Negated items render with the `!` operator.

use super::error::CompileError;
use crate::assembler::{CompilerItem, RuleWithItems};
use crate::database::{ACTION_DROP, ACTION_REJECT, SPECIAL_STATEFUL};
use crate::position::{position_meta, ObjectType, PolicyRuleType, RulePosition};

pub(crate) fn compile_policy_rule(
    data: &RuleWithItems<CompilerItem>,
) -> Result<String, CompileError> {
    let rule = &data.rule;
    let rule_type = rule
        .rule_type
        .ok_or_else(|| CompileError::segment(rule.id, "policy rule has no type"))?;

    let mut out = String::new();
    if let Some(comment) = &rule.comment {
        for line in comment.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }

    // A rule with no items is a comment-only separator, or one of the
    // implicit specials rendered from fixed templates.
    if data.items.is_empty() {
        if rule.special == SPECIAL_STATEFUL {
            out.push_str(&stateful_lines(rule_type));
        } else if rule.special != 0 || rule.comment.is_none() {
            out.push_str(&format!(
                "$IPTABLES -A {} -j {}\n",
                rule_type.chain(),
                action_target(rule.action)
            ));
        }
        return Ok(out);
    }

    // Every item must sit in a slot that exists for this rule type.
    for item in &data.items {
        if position_meta(rule_type, item.position).is_none() {
            return Err(CompileError::segment(
                rule.id,
                format!(
                    "position {:?} is not valid for {} rules",
                    item.position,
                    rule_type.table_name()
                ),
            ));
        }
    }

    let slot = |p: RulePosition| -> Vec<&CompilerItem> {
        data.items.iter().filter(|i| i.position == p).collect()
    };

    let sources = slot(RulePosition::Source);
    let destinations = slot(RulePosition::Destination);
    let services = slot(RulePosition::Service);
    let in_ifaces = slot(RulePosition::In);
    let out_ifaces = slot(RulePosition::Out);
    let marks = slot(RulePosition::Mark);
    let translated = translated_fragment(rule_type, &data.items, rule.id)?;

    let table_flag = if rule_type.is_nat() { "-t nat " } else { "" };
    let target = if rule_type.is_nat() {
        rule_type.table_name().to_string()
    } else {
        action_target(rule.action)
    };

    let iface_frag = {
        let mut s = String::new();
        if let Some(item) = in_ifaces.first() {
            s.push_str(&negate_flag(item.negate));
            s.push_str(&format!("-i {} ", item.name));
        }
        if let Some(item) = out_ifaces.first() {
            s.push_str(&negate_flag(item.negate));
            s.push_str(&format!("-o {} ", item.name));
        }
        s
    };

    let mark_frag = match marks.first() {
        Some(item) => {
            let code = item.mark_code.ok_or_else(|| {
                CompileError::segment(rule.id, format!("mark object {} has no code", item.entity_id))
            })?;
            format!("-m mark --mark {code} ")
        }
        None => String::new(),
    };

    let src_frags = address_fragments(&sources, "-s", "--src-range", rule.id)?;
    let dst_frags = address_fragments(&destinations, "-d", "--dst-range", rule.id)?;
    let svc_frags = service_fragments(&services, rule.id)?;

    for src in &src_frags {
        for dst in &dst_frags {
            for svc in &svc_frags {
                out.push_str(&format!(
                    "$IPTABLES {table_flag}-A {chain} {iface}{src}{dst}{svc}{mark}-j {target}{translated}\n",
                    chain = rule_type.chain(),
                    iface = iface_frag,
                    mark = mark_frag,
                ));
            }
        }
    }

    Ok(out)
}

/// The explicit per-chain lines a stateless firewall needs; stateful ones
/// get the same three chains covered once in the script preamble.
pub(crate) fn stateful_lines(rule_type: PolicyRuleType) -> String {
    format!(
        "$IPTABLES -A {} -m state --state ESTABLISHED,RELATED -j ACCEPT\n",
        rule_type.chain()
    )
}

fn action_target(action: i64) -> String {
    match action {
        ACTION_DROP => "DROP".to_string(),
        ACTION_REJECT => "REJECT".to_string(),
        _ => "ACCEPT".to_string(),
    }
}

fn negate_flag(negate: bool) -> String {
    if negate {
        "! ".to_string()
    } else {
        String::new()
    }
}

/// One `-s`/`-d`-style fragment per item; an empty slot yields one empty
/// fragment so the cartesian loop still emits a line.
fn address_fragments(
    items: &[&CompilerItem],
    flag: &str,
    range_flag: &str,
    rule_id: i64,
) -> Result<Vec<String>, CompileError> {
    if items.is_empty() {
        return Ok(vec![String::new()]);
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(address_fragment(item, flag, range_flag, rule_id)?);
    }
    Ok(out)
}

fn address_fragment(
    item: &CompilerItem,
    flag: &str,
    range_flag: &str,
    rule_id: i64,
) -> Result<String, CompileError> {
    let neg = negate_flag(item.negate);
    match item.obj_type {
        ObjectType::Address | ObjectType::OpenVpn => {
            let addr = require(&item.address, item, rule_id, "address")?;
            Ok(format!("{neg}{flag} {addr} "))
        }
        ObjectType::Network => {
            let addr = require(&item.address, item, rule_id, "address")?;
            let mask = require(&item.netmask, item, rule_id, "netmask")?;
            Ok(format!("{neg}{flag} {} ", cidr(addr, mask)))
        }
        ObjectType::Range => {
            let start = require(&item.range_start, item, rule_id, "range start")?;
            let end = require(&item.range_end, item, rule_id, "range end")?;
            Ok(format!("-m iprange {neg}{range_flag} {start}-{end} "))
        }
        ObjectType::FirewallInterface | ObjectType::HostInterface => {
            // Interface objects in address slots match by their address.
            let addr = require(&item.address, item, rule_id, "address")?;
            Ok(format!("{neg}{flag} {addr} "))
        }
        other => Err(CompileError::segment(
            rule_id,
            format!("object type {other:?} cannot be rendered in an address slot"),
        )),
    }
}

/// Netmask may arrive dotted (255.255.255.0) or as a /prefix. The network
/// address is truncated to the prefix so equivalent inputs render the same.
fn cidr(addr: &str, mask: &str) -> String {
    let prefix: Option<u8> = if let Some(p) = mask.strip_prefix('/') {
        p.parse().ok()
    } else if mask.contains('.') {
        mask.parse::<std::net::Ipv4Addr>()
            .ok()
            .map(|m| u32::from(m).count_ones() as u8)
    } else {
        mask.parse().ok()
    };

    match (addr.parse::<std::net::Ipv4Addr>(), prefix) {
        (Ok(ip), Some(p)) => match ipnet::Ipv4Net::new(ip, p) {
            Ok(net) => net.trunc().to_string(),
            Err(_) => format!("{addr}/{p}"),
        },
        (_, Some(p)) => format!("{addr}/{p}"),
        _ => format!("{addr}/{mask}"),
    }
}

/// Service fragments: TCP and UDP ports of a slot fold into one multiport
/// match each; ICMP and raw IP protocols get one fragment per item.
fn service_fragments(
    items: &[&CompilerItem],
    rule_id: i64,
) -> Result<Vec<String>, CompileError> {
    if items.is_empty() {
        return Ok(vec![String::new()]);
    }

    let mut out = Vec::new();
    let mut tcp_ports: Vec<String> = Vec::new();
    let mut udp_ports: Vec<String> = Vec::new();

    for item in items {
        match item.obj_type {
            ObjectType::Tcp | ObjectType::Udp => {
                let start = item.port_start.ok_or_else(|| {
                    CompileError::segment(
                        rule_id,
                        format!("service object {} has no port", item.entity_id),
                    )
                })?;
                let spec = match item.port_end {
                    Some(end) if end != start => format!("{start}:{end}"),
                    _ => start.to_string(),
                };
                if item.obj_type == ObjectType::Tcp {
                    tcp_ports.push(spec);
                } else {
                    udp_ports.push(spec);
                }
            }
            ObjectType::Icmp => {
                let spec = match (item.icmp_type, item.icmp_code) {
                    (Some(-1), _) | (None, _) => "any".to_string(),
                    (Some(t), Some(c)) if c >= 0 => format!("{t}/{c}"),
                    (Some(t), _) => t.to_string(),
                };
                out.push(format!("-p icmp -m icmp --icmp-type {spec} "));
            }
            ObjectType::IpService => {
                let proto = item.protocol.ok_or_else(|| {
                    CompileError::segment(
                        rule_id,
                        format!("IP service object {} has no protocol", item.entity_id),
                    )
                })?;
                out.push(format!("-p {proto} "));
            }
            other => {
                return Err(CompileError::segment(
                    rule_id,
                    format!("object type {other:?} cannot be rendered in a service slot"),
                ))
            }
        }
    }

    for (proto_name, ports) in [("tcp", tcp_ports), ("udp", udp_ports)] {
        match ports.len() {
            0 => {}
            1 => out.push(format!("-p {proto_name} --dport {} ", ports[0])),
            _ => out.push(format!(
                "-p {proto_name} -m multiport --dports {} ",
                ports.join(",")
            )),
        }
    }

    Ok(out)
}

/// NAT target suffix built from the translated slots; only SNAT/DNAT rule
/// types carry them.
fn translated_fragment(
    rule_type: PolicyRuleType,
    items: &[CompilerItem],
    rule_id: i64,
) -> Result<String, CompileError> {
    if !rule_type.is_nat() {
        return Ok(String::new());
    }

    let find = |p: RulePosition| items.iter().find(|i| i.position == p);

    let addr_item = match rule_type {
        PolicyRuleType::Snat => find(RulePosition::TranslatedSource),
        PolicyRuleType::Dnat => find(RulePosition::TranslatedDestination),
        _ => None,
    };
    let svc_item = find(RulePosition::TranslatedService);

    let Some(addr_item) = addr_item else {
        return Err(CompileError::segment(
            rule_id,
            format!("{} rule has no translated address", rule_type.table_name()),
        ));
    };

    let addr = require(&addr_item.address, addr_item, rule_id, "address")?;
    let port = match svc_item {
        Some(item) => {
            let start = item.port_start.ok_or_else(|| {
                CompileError::segment(
                    rule_id,
                    format!("translated service object {} has no port", item.entity_id),
                )
            })?;
            format!(":{start}")
        }
        None => String::new(),
    };

    let flag = match rule_type {
        PolicyRuleType::Snat => "--to-source",
        _ => "--to-destination",
    };
    Ok(format!(" {flag} {addr}{port}"))
}

fn require<'a>(
    field: &'a Option<String>,
    item: &CompilerItem,
    rule_id: i64,
    what: &str,
) -> Result<&'a str, CompileError> {
    field.as_deref().ok_or_else(|| {
        CompileError::segment(
            rule_id,
            format!("object {} ({}) has no {what}", item.entity_id, item.name),
        )
    })
}
