use super::*;
use crate::assembler::{CompilerItem, RuleWithItems};
use crate::database::Rule;
use crate::position::{ObjectType, PolicyRuleType, RulePosition};
use crate::progress::{MemorySink, NullSink};
use crate::rules::RuleFamily;
use pretty_assertions::assert_eq;

fn test_rule(id: i64, family: RuleFamily, rule_type: Option<PolicyRuleType>) -> Rule {
    Rule {
        id,
        firewall: 1,
        family,
        rule_type,
        group_id: None,
        rule_order: id,
        active: true,
        special: 0,
        action: crate::database::ACTION_ACCEPT,
        comment: None,
        style: None,
        max_lease: None,
        cfg_text: None,
        mark_id: None,
        network_id: None,
        range_id: None,
        router_id: None,
        interface_id: None,
        frontend_ip: None,
        frontend_port: None,
        backend_ip: None,
        backend_port: None,
    }
}

fn address_item(entity_id: i64, position: RulePosition, address: &str, negate: bool) -> CompilerItem {
    CompilerItem {
        entity_id,
        obj_type: ObjectType::Address,
        position,
        negate,
        order: entity_id,
        name: format!("addr-{entity_id}"),
        address: Some(address.to_string()),
        netmask: None,
        range_start: None,
        range_end: None,
        protocol: None,
        port_start: None,
        port_end: None,
        icmp_type: None,
        icmp_code: None,
        mark_code: None,
    }
}

fn tcp_item(entity_id: i64, port: i64) -> CompilerItem {
    CompilerItem {
        entity_id,
        obj_type: ObjectType::Tcp,
        position: RulePosition::Service,
        negate: false,
        order: entity_id,
        name: format!("tcp-{port}"),
        address: None,
        netmask: None,
        range_start: None,
        range_end: None,
        protocol: Some(6),
        port_start: Some(port),
        port_end: Some(port),
        icmp_type: None,
        icmp_code: None,
        mark_code: None,
    }
}

fn with_items(rule: Rule, items: Vec<CompilerItem>) -> RuleWithItems<CompilerItem> {
    RuleWithItems { rule, items }
}

#[test]
fn tables_group_in_strict_sequence() {
    // Input order deliberately scrambled across the five tables.
    let batch: Vec<RuleWithItems<CompilerItem>> = [
        PolicyRuleType::Dnat,
        PolicyRuleType::Input,
        PolicyRuleType::Snat,
        PolicyRuleType::Forward,
        PolicyRuleType::Output,
    ]
    .into_iter()
    .enumerate()
    .map(|(i, t)| {
        let mut data = with_items(
            test_rule(i as i64 + 1, RuleFamily::Policy, Some(t)),
            vec![address_item(100 + i as i64, RulePosition::Source, "10.0.0.1", false)],
        );
        if t.is_nat() {
            let translated = match t {
                PolicyRuleType::Snat => RulePosition::TranslatedSource,
                _ => RulePosition::TranslatedDestination,
            };
            data.items
                .push(address_item(200 + i as i64, translated, "1.2.3.4", false));
        }
        data
    })
    .collect();

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments.iter().all(|s| s.error.is_none()));

    let tables: Vec<PolicyRuleType> = segments_by_table(&segments)
        .into_iter()
        .map(|(t, _)| t)
        .collect();
    assert_eq!(tables, PolicyRuleType::COMPILE_ORDER.to_vec());
}

#[test]
fn disabled_rule_is_skipped_in_multi_rule_batch() {
    let mut disabled = test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input));
    disabled.active = false;
    let batch = vec![
        with_items(
            disabled,
            vec![address_item(1, RulePosition::Source, "10.0.0.1", false)],
        ),
        with_items(
            test_rule(2, RuleFamily::Policy, Some(PolicyRuleType::Input)),
            vec![address_item(2, RulePosition::Source, "10.0.0.2", false)],
        ),
    ];

    let sink = MemorySink::new();
    let segments = PolicyCompiler::compile(&batch, &sink);

    assert_eq!(segments[0].cs, "");
    assert!(segments[1].cs.contains("10.0.0.2"));

    // Progress marks the disabled rule.
    let messages = sink.messages();
    assert!(messages[0].contains("[DISABLED]"));
    assert!(!messages[1].contains("[DISABLED]"));
}

#[test]
fn disabled_rule_still_renders_in_single_rule_preview() {
    let mut disabled = test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input));
    disabled.active = false;
    let batch = vec![with_items(
        disabled,
        vec![address_item(1, RulePosition::Source, "10.0.0.1", false)],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments[0].cs.contains("10.0.0.1"));
}

#[test]
fn multiple_services_fold_into_multiport() {
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input)),
        vec![tcp_item(1, 80), tcp_item(2, 443), tcp_item(3, 8080)],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert_eq!(segments[0].error, None);
    assert!(segments[0]
        .cs
        .contains("-p tcp -m multiport --dports 80,443,8080"));
}

#[test]
fn negated_source_renders_negation_operator() {
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input)),
        vec![address_item(1, RulePosition::Source, "10.0.0.1", true)],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments[0].cs.contains("! -s 10.0.0.1"));
}

#[test]
fn snat_renders_translated_source() {
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Snat)),
        vec![
            address_item(1, RulePosition::Source, "192.168.0.0", false),
            address_item(2, RulePosition::TranslatedSource, "203.0.113.1", false),
        ],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert_eq!(segments[0].error, None);
    let cs = &segments[0].cs;
    assert!(cs.contains("-t nat -A POSTROUTING"));
    assert!(cs.contains("-j SNAT --to-source 203.0.113.1"));
}

#[test]
fn segment_error_is_isolated_to_the_failing_rule() {
    // SNAT rule with no translated address fails; its neighbor compiles.
    let batch = vec![
        with_items(
            test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Snat)),
            vec![address_item(1, RulePosition::Source, "192.168.0.0", false)],
        ),
        with_items(
            test_rule(2, RuleFamily::Policy, Some(PolicyRuleType::Input)),
            vec![address_item(2, RulePosition::Source, "10.0.0.2", false)],
        ),
    ];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments[0].error.is_some());
    assert_eq!(segments[0].cs, "");
    assert_eq!(segments[1].error, None);
    assert!(segments[1].cs.contains("10.0.0.2"));
}

#[test]
fn invalid_position_for_rule_type_fails_that_rule() {
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input)),
        vec![address_item(1, RulePosition::TranslatedSource, "1.2.3.4", false)],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments[0].error.as_deref().unwrap().contains("not valid"));
}

#[test]
fn comment_only_rule_passes_through_as_comment() {
    let mut rule = test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input));
    rule.comment = Some("--- web tier ---".to_string());
    let batch = vec![with_items(rule, vec![])];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert_eq!(segments[0].cs, "# --- web tier ---\n");
}

#[test]
fn dhcp_rule_renders_subnet_stanza() {
    let mut rule = test_rule(7, RuleFamily::Dhcp, None);
    rule.max_lease = Some(86400);

    let network = CompilerItem {
        obj_type: ObjectType::Network,
        position: RulePosition::Network,
        netmask: Some("255.255.255.0".to_string()),
        address: Some("10.0.0.0".to_string()),
        ..address_item(1, RulePosition::Network, "10.0.0.0", false)
    };
    let range = CompilerItem {
        obj_type: ObjectType::Range,
        position: RulePosition::Range,
        address: None,
        range_start: Some("10.0.0.100".to_string()),
        range_end: Some("10.0.0.200".to_string()),
        ..address_item(2, RulePosition::Range, "", false)
    };
    let router = address_item(3, RulePosition::Router, "10.0.0.1", false);

    let segments =
        PolicyCompiler::compile(&[with_items(rule, vec![network, range, router])], &NullSink);

    let cs = &segments[0].cs;
    assert_eq!(segments[0].error, None);
    assert!(cs.contains("subnet 10.0.0.0 netmask 255.255.255.0 {"));
    assert!(cs.contains("range 10.0.0.100 10.0.0.200;"));
    assert!(cs.contains("option routers 10.0.0.1;"));
    assert!(cs.contains("max-lease-time 86400;"));
}

#[test]
fn haproxy_rule_renders_frontend_and_backend() {
    let mut rule = test_rule(9, RuleFamily::Haproxy, None);
    rule.style = Some("http".to_string());

    let items = vec![
        address_item(1, RulePosition::FrontendIp, "10.0.0.1", false),
        tcp_port_item(2, RulePosition::FrontendPort, 443),
        address_item(3, RulePosition::BackendIp, "10.0.1.1", false),
        tcp_port_item(4, RulePosition::BackendPort, 8443),
    ];

    let segments = PolicyCompiler::compile(&[with_items(rule, items)], &NullSink);
    let cs = &segments[0].cs;
    assert_eq!(segments[0].error, None);
    assert!(cs.contains("frontend f_9"));
    assert!(cs.contains("mode http"));
    assert!(cs.contains("bind 10.0.0.1:443"));
    assert!(cs.contains("backend b_9"));
    assert!(cs.contains("server s_9 10.0.1.1:8443"));
}

fn tcp_port_item(entity_id: i64, position: RulePosition, port: i64) -> CompilerItem {
    CompilerItem {
        position,
        ..tcp_item(entity_id, port)
    }
}

#[test]
fn range_source_renders_iprange_match() {
    let range = CompilerItem {
        obj_type: ObjectType::Range,
        address: None,
        range_start: Some("10.0.0.100".to_string()),
        range_end: Some("10.0.0.200".to_string()),
        ..address_item(1, RulePosition::Source, "", false)
    };
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input)),
        vec![range],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments[0]
        .cs
        .contains("-m iprange --src-range 10.0.0.100-10.0.0.200"));
}

#[test]
fn icmp_service_renders_type_and_code() {
    let icmp = CompilerItem {
        obj_type: ObjectType::Icmp,
        position: RulePosition::Service,
        protocol: Some(1),
        port_start: None,
        port_end: None,
        icmp_type: Some(8),
        icmp_code: Some(0),
        ..tcp_item(1, 0)
    };
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input)),
        vec![icmp],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert!(segments[0].cs.contains("-p icmp -m icmp --icmp-type 8/0"));
}

#[test]
fn mark_item_renders_mark_match() {
    let mark = CompilerItem {
        obj_type: ObjectType::Mark,
        position: RulePosition::Mark,
        address: None,
        mark_code: Some(7),
        ..address_item(1, RulePosition::Mark, "", false)
    };
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Forward)),
        vec![mark],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    assert_eq!(segments[0].error, None);
    assert!(segments[0].cs.contains("-m mark --mark 7"));
}

#[test]
fn network_masks_normalize_to_cidr() {
    let net = CompilerItem {
        obj_type: ObjectType::Network,
        address: Some("10.0.0.77".to_string()),
        netmask: Some("255.255.255.0".to_string()),
        ..address_item(1, RulePosition::Source, "", false)
    };
    let batch = vec![with_items(
        test_rule(1, RuleFamily::Policy, Some(PolicyRuleType::Input)),
        vec![net],
    )];

    let segments = PolicyCompiler::compile(&batch, &NullSink);
    // Host bits are truncated to the prefix.
    assert!(segments[0].cs.contains("-s 10.0.0.0/24"));
}

#[test]
fn routing_rule_renders_route_commands() {
    let rule = test_rule(3, RuleFamily::Routing, None);
    let gateway = address_item(1, RulePosition::Gateway, "192.168.0.1", false);
    let dest = CompilerItem {
        obj_type: ObjectType::Network,
        position: RulePosition::Destination,
        netmask: Some("/16".to_string()),
        ..address_item(2, RulePosition::Destination, "172.16.0.0", false)
    };

    let segments = PolicyCompiler::compile(&[with_items(rule, vec![gateway, dest])], &NullSink);
    assert_eq!(segments[0].error, None);
    assert!(segments[0]
        .cs
        .contains("$IP route add 172.16.0.0/16 via 192.168.0.1"));
}

#[test]
fn keepalived_rule_renders_vrrp_instance() {
    let mut rule = test_rule(4, RuleFamily::Keepalived, None);
    rule.cfg_text = Some("priority 100".to_string());
    let vip = address_item(1, RulePosition::VirtualIp, "10.0.0.254", false);

    let segments = PolicyCompiler::compile(&[with_items(rule, vec![vip])], &NullSink);
    let cs = &segments[0].cs;
    assert!(cs.contains("vrrp_instance VI_4 {"));
    assert!(cs.contains("priority 100"));
    assert!(cs.contains("        10.0.0.254"));
}
