//! Renderers for the non-policy families: DHCP subnet stanzas, HAProxy
//! frontend/backend blocks, Keepalived VRRP instances and routing commands.
//! One stanza per rule; `cfg_text` passes through verbatim where present.

use super::error::CompileError;
use crate::assembler::{CompilerItem, RuleWithItems};
use crate::position::RulePosition;

fn find<'a>(
    data: &'a RuleWithItems<CompilerItem>,
    position: RulePosition,
) -> Option<&'a CompilerItem> {
    data.items.iter().find(|i| i.position == position)
}

fn address_of<'a>(
    data: &'a RuleWithItems<CompilerItem>,
    position: RulePosition,
    what: &str,
) -> Result<&'a str, CompileError> {
    let item = find(data, position).ok_or_else(|| {
        CompileError::segment(data.rule.id, format!("missing {what} reference"))
    })?;
    item.address.as_deref().ok_or_else(|| {
        CompileError::segment(
            data.rule.id,
            format!("{what} object {} has no address", item.entity_id),
        )
    })
}

fn comment_lines(comment: &Option<String>, prefix: &str) -> String {
    match comment {
        Some(c) => c
            .lines()
            .map(|l| format!("{prefix} {l}\n"))
            .collect::<String>(),
        None => String::new(),
    }
}

pub(crate) fn compile_dhcp_rule(
    data: &RuleWithItems<CompilerItem>,
) -> Result<String, CompileError> {
    let rule = &data.rule;
    let mut out = comment_lines(&rule.comment, "#");

    // Raw stanza passthrough for rules maintained as free text.
    if let Some(cfg) = rule.cfg_text.as_deref() {
        if data.items.is_empty() {
            out.push_str(cfg);
            if !cfg.ends_with('\n') {
                out.push('\n');
            }
            return Ok(out);
        }
    }
    if data.items.is_empty() {
        return Ok(out);
    }

    let network = find(data, RulePosition::Network).ok_or_else(|| {
        CompileError::segment(rule.id, "missing network reference")
    })?;
    let net_addr = network.address.as_deref().ok_or_else(|| {
        CompileError::segment(rule.id, format!("network object {} has no address", network.entity_id))
    })?;
    let netmask = network.netmask.as_deref().unwrap_or("255.255.255.0");

    out.push_str(&format!("subnet {net_addr} netmask {netmask} {{\n"));

    if let Some(range) = find(data, RulePosition::Range) {
        let (start, end) = match (&range.range_start, &range.range_end) {
            (Some(s), Some(e)) => (s.as_str(), e.as_str()),
            _ => {
                return Err(CompileError::segment(
                    rule.id,
                    format!("range object {} has no bounds", range.entity_id),
                ))
            }
        };
        out.push_str(&format!("    range {start} {end};\n"));
    }

    if find(data, RulePosition::Router).is_some() {
        let router = address_of(data, RulePosition::Router, "router")?;
        out.push_str(&format!("    option routers {router};\n"));
    }

    if let Some(max_lease) = rule.max_lease {
        out.push_str(&format!("    max-lease-time {max_lease};\n"));
    }

    if let Some(cfg) = rule.cfg_text.as_deref() {
        for line in cfg.lines() {
            out.push_str(&format!("    {line}\n"));
        }
    }

    out.push_str("}\n");
    Ok(out)
}

pub(crate) fn compile_haproxy_rule(
    data: &RuleWithItems<CompilerItem>,
) -> Result<String, CompileError> {
    let rule = &data.rule;
    let mut out = comment_lines(&rule.comment, "#");

    let frontend_ip = address_of(data, RulePosition::FrontendIp, "frontend ip")?;
    let frontend_port = port_of(data, RulePosition::FrontendPort, "frontend port")?;
    let backend_ip = address_of(data, RulePosition::BackendIp, "backend ip")?;
    let backend_port = port_of(data, RulePosition::BackendPort, "backend port")?;

    let mode = rule.style.as_deref().unwrap_or("tcp");

    out.push_str(&format!(
        "frontend f_{id}\n    mode {mode}\n    bind {frontend_ip}:{frontend_port}\n    default_backend b_{id}\n\n",
        id = rule.id
    ));
    out.push_str(&format!(
        "backend b_{id}\n    mode {mode}\n    server s_{id} {backend_ip}:{backend_port}\n",
        id = rule.id
    ));

    if let Some(cfg) = rule.cfg_text.as_deref() {
        for line in cfg.lines() {
            out.push_str(&format!("    {line}\n"));
        }
    }

    Ok(out)
}

fn port_of(
    data: &RuleWithItems<CompilerItem>,
    position: RulePosition,
    what: &str,
) -> Result<i64, CompileError> {
    let item = find(data, position).ok_or_else(|| {
        CompileError::segment(data.rule.id, format!("missing {what} reference"))
    })?;
    item.port_start.ok_or_else(|| {
        CompileError::segment(
            data.rule.id,
            format!("{what} object {} has no port", item.entity_id),
        )
    })
}

pub(crate) fn compile_keepalived_rule(
    data: &RuleWithItems<CompilerItem>,
) -> Result<String, CompileError> {
    let rule = &data.rule;
    let mut out = comment_lines(&rule.comment, "#");

    let vips: Vec<&CompilerItem> = data
        .items
        .iter()
        .filter(|i| i.position == RulePosition::VirtualIp)
        .collect();

    if vips.is_empty() {
        // Free-text instance definitions pass through unchanged.
        if let Some(cfg) = rule.cfg_text.as_deref() {
            out.push_str(cfg);
            if !cfg.ends_with('\n') {
                out.push('\n');
            }
        }
        return Ok(out);
    }

    out.push_str(&format!("vrrp_instance VI_{} {{\n", rule.id));
    if let Some(iface) = find(data, RulePosition::Interface) {
        out.push_str(&format!("    interface {}\n", iface.name));
    }
    if let Some(cfg) = rule.cfg_text.as_deref() {
        for line in cfg.lines() {
            out.push_str(&format!("    {line}\n"));
        }
    }
    out.push_str("    virtual_ipaddress {\n");
    for vip in vips {
        let addr = vip.address.as_deref().ok_or_else(|| {
            CompileError::segment(
                rule.id,
                format!("virtual ip object {} has no address", vip.entity_id),
            )
        })?;
        out.push_str(&format!("        {addr}\n"));
    }
    out.push_str("    }\n}\n");

    Ok(out)
}

pub(crate) fn compile_routing_rule(
    data: &RuleWithItems<CompilerItem>,
) -> Result<String, CompileError> {
    let rule = &data.rule;
    let mut out = comment_lines(&rule.comment, "#");

    let gateway = address_of(data, RulePosition::Gateway, "gateway")?;

    let destinations: Vec<&CompilerItem> = data
        .items
        .iter()
        .filter(|i| i.position == RulePosition::Destination)
        .collect();

    if destinations.is_empty() {
        out.push_str(&format!("$IP route add default via {gateway}\n"));
        return Ok(out);
    }

    for dest in destinations {
        let addr = dest.address.as_deref().ok_or_else(|| {
            CompileError::segment(
                rule.id,
                format!("destination object {} has no address", dest.entity_id),
            )
        })?;
        let dest_spec = match dest.netmask.as_deref() {
            Some(mask) if mask.starts_with('/') => format!("{addr}{mask}"),
            Some(mask) => format!("{addr}/{mask}"),
            None => addr.to_string(),
        };
        out.push_str(&format!("$IP route add {dest_spec} via {gateway}\n"));
    }

    Ok(out)
}
