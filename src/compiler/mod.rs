//! Streaming rule compiler.
//!
//! `PolicyCompiler::compile` turns assembled rules into per-rule text
//! segments, isolating render failures to the failing rule. `write_firewall_script`
//! assembles the full install script: header template, stateful preamble,
//! the five policy tables in strict sequence with banner framing, footer.

pub mod error;

mod iptables;
mod script;
mod service;

#[cfg(test)]
mod tests;

use crate::assembler::{CompilerItem, RuleWithItems};
use crate::position::PolicyRuleType;
use crate::progress::{ProgressPayload, ProgressSink};
use crate::rules::RuleFamily;
use error::CompileError;
use serde::Serialize;

pub use script::{write_firewall_script, ScriptConfig, ScriptOutput};

/// One unit of rendered configuration text: one rule, or one rule's failure.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledSegment {
    pub id: i64,
    pub active: bool,
    pub rule_type: Option<PolicyRuleType>,
    pub comment: Option<String>,
    pub cs: String,
    pub error: Option<String>,
}

pub struct PolicyCompiler;

impl PolicyCompiler {
    /// Compile a batch of assembled rules, one segment per rule, in the
    /// order given. A disabled rule renders empty unless it is the only rule
    /// in the batch (single-rule preview). A rule that fails to render gets
    /// its error recorded on the segment; the rest of the batch continues.
    pub fn compile(
        rules_data: &[RuleWithItems<CompilerItem>],
        progress: &dyn ProgressSink,
    ) -> Vec<CompiledSegment> {
        let single = rules_data.len() == 1;

        rules_data
            .iter()
            .enumerate()
            .map(|(index, data)| {
                let rule = &data.rule;
                progress.emit(ProgressPayload::rule(rule.id, index, !rule.active));

                let (cs, error) = if rule.active || single {
                    match render_rule(data) {
                        Ok(cs) => (cs, None),
                        Err(e) => (String::new(), Some(e.to_string())),
                    }
                } else {
                    (String::new(), None)
                };

                CompiledSegment {
                    id: rule.id,
                    active: rule.active,
                    rule_type: rule.rule_type,
                    comment: rule.comment.clone(),
                    cs,
                    error,
                }
            })
            .collect()
    }
}

fn render_rule(data: &RuleWithItems<CompilerItem>) -> Result<String, CompileError> {
    match data.rule.family {
        RuleFamily::Policy => iptables::compile_policy_rule(data),
        RuleFamily::Routing => service::compile_routing_rule(data),
        RuleFamily::Dhcp => service::compile_dhcp_rule(data),
        RuleFamily::Haproxy => service::compile_haproxy_rule(data),
        RuleFamily::Keepalived => service::compile_keepalived_rule(data),
    }
}

/// Group policy segments by table, in the strict INPUT, OUTPUT, FORWARD,
/// SNAT, DNAT sequence, regardless of input order. Segments without a type
/// are dropped.
pub fn segments_by_table(
    segments: &[CompiledSegment],
) -> Vec<(PolicyRuleType, Vec<&CompiledSegment>)> {
    PolicyRuleType::COMPILE_ORDER
        .iter()
        .map(|&table| {
            (
                table,
                segments
                    .iter()
                    .filter(|s| s.rule_type == Some(table))
                    .collect(),
            )
        })
        .collect()
}
