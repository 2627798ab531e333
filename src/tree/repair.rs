//! Tree consistency restoration.
//!
//! An idempotent multi-phase batch job over one tenant's `fwc_tree`: root
//! enforcement, ancestry validation, entity-backed node checks, firewall and
//! cluster subtree regeneration (with special-rule re-validation), folder
//! content pruning, host and standard-object resynchronization, orphan
//! sweep. Individual inconsistencies are corrected and reported, never
//! raised; only unrecoverable root loss aborts. Running the full sequence
//! twice on a healthy tree changes nothing.

use super::error::TreeError;
use super::{
    children_of, create_cluster_subtree, create_firewall_subtree, create_group_nodes,
    create_host_subtree, delete_subtree, new_node, node_by_id, root_nodes, ROOT_NODES,
};
use crate::database::error::DatabaseError;
use crate::database::{
    Firewall, IpObj, Rule, TreeNode, Tx, ACTION_ACCEPT, ACTION_DROP, SPECIAL_CATCH_ALL,
    SPECIAL_STATEFUL,
};
use crate::position::{ObjectType, Offset, PolicyRuleType};
use crate::progress::{ProgressPayload, ProgressSink};
use crate::rules::{self, CreateRule, RuleFamily};
use crate::Result;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Ancestry walks bail out after this many hops; a healthy tree is never
/// this deep, so exceeding it means a cycle or corruption.
const MAX_TREE_DEPTH: usize = 100;

/// Net effect of a repair run. A second run over a healthy tree reports all
/// zeros.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    pub deleted: u64,
    pub created: u64,
    pub repaired: u64,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    fn absorb(&mut self, other: RepairReport) {
        self.deleted += other.deleted;
        self.created += other.created;
        self.repaired += other.repaired;
    }
}

pub struct Repair<'a> {
    fwcloud: i64,
    progress: &'a dyn ProgressSink,
}

impl<'a> Repair<'a> {
    pub fn new(fwcloud: i64, progress: &'a dyn ProgressSink) -> Self {
        Self { fwcloud, progress }
    }

    fn notice(&self, message: impl Into<String>) {
        self.progress.emit(ProgressPayload::notice(message));
    }

    /// Run the full phase sequence in the documented order.
    pub async fn run(&self, tx: &mut Tx<'_>) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let (roots, r) = self.check_root_nodes(tx).await?;
        report.absorb(r);

        report.absorb(self.check_not_root_nodes(tx, &roots).await?);
        report.absorb(self.check_entity_nodes(tx).await?);

        let fdf = root_of(&roots, "FDF");
        let fdo = root_of(&roots, "FDO");
        let fds = root_of(&roots, "FDS");

        report.absorb(self.check_firewalls_in_tree(tx, &fdf).await?);
        report.absorb(self.check_clusters_in_tree(tx, &fdf).await?);
        report.absorb(self.check_firewalls_folders_content(tx, &fdf).await?);
        report.absorb(self.check_host_objects(tx, &fdo).await?);

        for (name, node_type, obj_type) in super::OBJECT_FOLDERS {
            report.absorb(
                self.check_non_std_ipobj(tx, &fdo, name, node_type, obj_type)
                    .await?,
            );
        }
        for (name, node_type, obj_type) in super::SERVICE_FOLDERS {
            report.absorb(
                self.check_non_std_ipobj(tx, &fds, name, node_type, obj_type)
                    .await?,
            );
        }
        report.absorb(
            self.check_non_std_ipobj_group(tx, &fdo, "Groups", "OIG", 20)
                .await?,
        );
        report.absorb(
            self.check_non_std_ipobj_group(tx, &fds, "Groups", "SOG", 21)
                .await?,
        );

        report.absorb(self.delete_orphan_nodes(tx).await?);

        debug!(?report, "tree repair finished");
        Ok(report)
    }

    /// Phase 1: exactly one of each canonical root; delete any other
    /// parentless node; null stray object back-references on roots.
    pub async fn check_root_nodes(
        &self,
        tx: &mut Tx<'_>,
    ) -> Result<(Vec<TreeNode>, RepairReport)> {
        let mut report = RepairReport::default();
        let nodes = root_nodes(tx, self.fwcloud).await?;

        let mut found: Vec<TreeNode> = Vec::new();
        for node in nodes {
            let canonical = ROOT_NODES
                .iter()
                .any(|&(name, node_type)| node.name == name && node.node_type == node_type);
            let duplicate = found
                .iter()
                .any(|f| f.name == node.name && f.node_type == node.node_type);

            if canonical && !duplicate {
                self.notice(format!("Root node found: {}", node.id));
                found.push(node);
            } else {
                self.notice(format!("Deleting invalid root node: {}", node.id));
                report.deleted += delete_subtree(tx, self.fwcloud, node.id).await?.len() as u64;
            }
        }

        let missing: Vec<&str> = ROOT_NODES
            .iter()
            .filter(|&&(name, node_type)| {
                !found
                    .iter()
                    .any(|f| f.name == name && f.node_type == node_type)
            })
            .map(|&(name, _)| name)
            .collect();
        if !missing.is_empty() {
            return Err(TreeError::RootNodesMissing {
                missing: missing.join(", "),
            }
            .into());
        }

        // Roots must not reference domain objects.
        if found.iter().any(|n| n.id_obj.is_some() || n.obj_type.is_some()) {
            self.notice("Repairing root nodes (clearing object references)");
            sqlx::query(
                "UPDATE fwc_tree SET id_obj = NULL, obj_type = NULL \
                 WHERE fwcloud = ? AND id_parent IS NULL",
            )
            .bind(self.fwcloud)
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::query("clearing root object refs", e))?;
            report.repaired += 1;
            for node in &mut found {
                node.id_obj = None;
                node.obj_type = None;
            }
        }

        Ok((found, report))
    }

    /// Phase 2: every non-root node's ancestor chain must terminate at one
    /// of the four roots, without cycles, within the depth bound.
    pub async fn check_not_root_nodes(
        &self,
        tx: &mut Tx<'_>,
        roots: &[TreeNode],
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let all = sqlx::query_as::<_, TreeNode>(
            "SELECT * FROM fwc_tree WHERE fwcloud = ? ORDER BY id",
        )
        .bind(self.fwcloud)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading all tree nodes", e))?;

        let parents: HashMap<i64, Option<i64>> =
            all.iter().map(|n| (n.id, n.id_parent)).collect();
        let root_ids: HashSet<i64> = roots.iter().map(|r| r.id).collect();
        let mut deleted: HashSet<i64> = HashSet::new();

        for node in all.iter().filter(|n| n.id_parent.is_some()) {
            if deleted.contains(&node.id) {
                continue;
            }

            let mut current = node.id;
            let mut hops = 0usize;
            let verdict = loop {
                let parent = match parents.get(&current) {
                    Some(p) => *p,
                    None => break Some("ancestor not found"),
                };
                match parent {
                    None => break None, // `current` is a root candidate
                    Some(p) => {
                        if deleted.contains(&p) || !parents.contains_key(&p) {
                            break Some("ancestor not found");
                        }
                        if p == node.id {
                            break Some("cycle detected");
                        }
                        hops += 1;
                        if hops > MAX_TREE_DEPTH {
                            break Some("ancestry too deep");
                        }
                        current = p;
                    }
                }
            };

            let reason = match verdict {
                Some(reason) => Some(reason),
                None if !root_ids.contains(&current) => Some("ancestry ends at unknown root"),
                None => None,
            };

            if let Some(reason) = reason {
                self.notice(format!("{reason}, deleting node: {}", node.id));
                for id in delete_subtree(tx, self.fwcloud, node.id).await? {
                    deleted.insert(id);
                    report.deleted += 1;
                }
            }
        }

        Ok(report)
    }

    /// Phase 3: FW/CL nodes must back-reference a live entity with the
    /// expected obj_type.
    pub async fn check_entity_nodes(&self, tx: &mut Tx<'_>) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let nodes = sqlx::query_as::<_, TreeNode>(
            "SELECT * FROM fwc_tree WHERE fwcloud = ? AND node_type IN ('FW', 'CL') ORDER BY id",
        )
        .bind(self.fwcloud)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading entity nodes", e))?;

        for node in nodes {
            if node_by_id(tx, node.id).await?.is_none() {
                continue; // removed along with an earlier bad sibling
            }
            if !self.entity_node_is_valid(tx, &node).await? {
                self.notice(format!(
                    "Referenced entity invalid, deleting node: {}",
                    node.id
                ));
                report.deleted += delete_subtree(tx, self.fwcloud, node.id).await?.len() as u64;
            }
        }

        Ok(report)
    }

    async fn entity_node_is_valid(&self, tx: &mut Tx<'_>, node: &TreeNode) -> Result<bool> {
        let Some(id_obj) = node.id_obj else {
            return Ok(false);
        };

        match node.node_type.as_str() {
            "FW" => {
                if node.obj_type != Some(ObjectType::Firewall.code()) {
                    return Ok(false);
                }
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM firewall WHERE fwcloud = ? AND id = ?",
                )
                .bind(self.fwcloud)
                .bind(id_obj)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| DatabaseError::query("checking firewall entity", e))?;
                Ok(count == 1)
            }
            "CL" => {
                if node.obj_type != Some(ObjectType::Cluster.code()) {
                    return Ok(false);
                }
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM cluster WHERE fwcloud = ? AND id = ?",
                )
                .bind(self.fwcloud)
                .bind(id_obj)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| DatabaseError::query("checking cluster entity", e))?;
                Ok(count == 1)
            }
            _ => Ok(true),
        }
    }

    /// Phase 4a: every standalone firewall should appear exactly once under
    /// the FIREWALLS tree. Zero nodes is logged and skipped; duplicates are
    /// removed and the subtree regenerated fresh. Special rules implied by
    /// the firewall options are re-validated either way.
    pub async fn check_firewalls_in_tree(
        &self,
        tx: &mut Tx<'_>,
        fdf_root: &TreeNode,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let firewalls = sqlx::query_as::<_, Firewall>(
            "SELECT id, fwcloud, cluster, fwmaster, name, options, status FROM firewall \
             WHERE fwcloud = ? AND cluster IS NULL ORDER BY id",
        )
        .bind(self.fwcloud)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading standalone firewalls", e))?;

        for fw in firewalls {
            report.absorb(self.regenerate_entity_tree(tx, fdf_root, "FW", fw.id, &fw.name).await?);
            report.absorb(check_special_rules(tx, &fw).await?);
        }

        Ok(report)
    }

    /// Phase 4b: same for clusters, keyed on the fwmaster member.
    pub async fn check_clusters_in_tree(
        &self,
        tx: &mut Tx<'_>,
        fdf_root: &TreeNode,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let clusters = sqlx::query_as::<_, (i64, String, i64)>(
            "SELECT c.id, c.name, f.id AS fwmaster_id FROM cluster c \
             INNER JOIN firewall f ON f.cluster = c.id \
             WHERE c.fwcloud = ? AND f.fwmaster = TRUE ORDER BY c.id",
        )
        .bind(self.fwcloud)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading clusters", e))?;

        for (cluster_id, name, fwmaster_id) in clusters {
            report.absorb(
                self.regenerate_entity_tree(tx, fdf_root, "CL", cluster_id, &name)
                    .await?,
            );
            let fwmaster = crate::database::firewall_by_id(tx, fwmaster_id).await?;
            report.absorb(check_special_rules(tx, &fwmaster).await?);
        }

        Ok(report)
    }

    async fn regenerate_entity_tree(
        &self,
        tx: &mut Tx<'_>,
        fdf_root: &TreeNode,
        node_type: &str,
        entity_id: i64,
        name: &str,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let nodes = sqlx::query_as::<_, TreeNode>(
            "SELECT * FROM fwc_tree WHERE fwcloud = ? AND id_obj = ? AND node_type = ? ORDER BY id",
        )
        .bind(self.fwcloud)
        .bind(entity_id)
        .bind(node_type)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading entity tree nodes", e))?;

        match nodes.len() {
            0 => {
                self.notice(format!("No node found for {node_type} {entity_id} ({name})"));
            }
            1 => {} // the common healthy case, leave it alone
            _ => {
                self.notice(format!(
                    "Found several nodes for {node_type} {entity_id} ({name}), regenerating"
                ));

                // Keep the original parent when it was a folder, else
                // re-root under FIREWALLS.
                let mut parent = fdf_root.id;
                if let Some(parent_id) = nodes[0].id_parent {
                    if let Some(parent_node) = node_by_id(tx, parent_id).await? {
                        if parent_node.node_type == "FDF" || parent_node.node_type == "FD" {
                            parent = parent_node.id;
                        }
                    }
                }

                for node in &nodes {
                    report.deleted +=
                        delete_subtree(tx, self.fwcloud, node.id).await?.len() as u64;
                }

                self.notice(format!("Regenerating tree for {node_type} {entity_id}"));
                match node_type {
                    "CL" => {
                        create_cluster_subtree(tx, self.fwcloud, parent, entity_id, name).await?;
                    }
                    _ => {
                        create_firewall_subtree(tx, self.fwcloud, parent, entity_id, name).await?;
                    }
                }
                report.created += 1;
            }
        }

        Ok(report)
    }

    /// Phase 5: folders under FIREWALLS may hold only folders, firewalls and
    /// clusters. Explicit worklist, no recursion.
    pub async fn check_firewalls_folders_content(
        &self,
        tx: &mut Tx<'_>,
        fdf_root: &TreeNode,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let mut worklist = vec![fdf_root.id];

        while let Some(folder_id) = worklist.pop() {
            for child in children_of(tx, self.fwcloud, folder_id).await? {
                match child.node_type.as_str() {
                    "FD" => {
                        self.notice(format!("Checking folder node: {}", child.id));
                        worklist.push(child.id);
                    }
                    "FW" | "CL" => {
                        if !self.entity_node_is_valid(tx, &child).await? {
                            self.notice(format!(
                                "Referenced entity not found, deleting node: {}",
                                child.id
                            ));
                            report.deleted +=
                                delete_subtree(tx, self.fwcloud, child.id).await?.len() as u64;
                        }
                    }
                    _ => {
                        self.notice(format!(
                            "Node type {} cannot live in a folder, deleting node: {}",
                            child.node_type, child.id
                        ));
                        report.deleted +=
                            delete_subtree(tx, self.fwcloud, child.id).await?.len() as u64;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Phase 6: exactly one canonical Hosts folder; its children must
    /// mirror the live HOST objects. Regenerated only on mismatch so a
    /// healthy tree is untouched.
    pub async fn check_host_objects(
        &self,
        tx: &mut Tx<'_>,
        fdo_root: &TreeNode,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let folders: Vec<TreeNode> = sqlx::query_as::<_, TreeNode>(
            "SELECT * FROM fwc_tree WHERE fwcloud = ? AND id_parent = ? \
             AND node_type = 'OIH' AND id_obj IS NULL AND obj_type = ?",
        )
        .bind(self.fwcloud)
        .bind(fdo_root.id)
        .bind(ObjectType::Host.code())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("locating hosts folder", e))?;

        if folders.len() != 1 {
            return Err(TreeError::HostsFolderMissing {
                found: folders.len(),
            }
            .into());
        }
        let folder = &folders[0];

        let hosts = sqlx::query_as::<_, IpObj>(
            "SELECT * FROM ipobj WHERE fwcloud = ? AND obj_type = ? ORDER BY id",
        )
        .bind(self.fwcloud)
        .bind(ObjectType::Host.code())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading hosts", e))?;

        let children = children_of(tx, self.fwcloud, folder.id).await?;
        let live_ids: HashSet<i64> = hosts.iter().map(|h| h.id).collect();
        let node_ids: HashSet<i64> = children.iter().filter_map(|c| c.id_obj).collect();

        if live_ids == node_ids && children.len() == live_ids.len() {
            return Ok(report);
        }

        self.notice("Regenerating host objects tree");
        for child in children {
            report.deleted += delete_subtree(tx, self.fwcloud, child.id).await?.len() as u64;
        }
        for host in &hosts {
            create_host_subtree(tx, self.fwcloud, folder.id, host).await?;
            report.created += 1;
        }

        Ok(report)
    }

    /// Phase 7a: one node per live non-standard object inside its standard
    /// folder; stale nodes pruned, missing ones created. Addresses that are
    /// really OpenVPN endpoint artifacts are skipped.
    pub async fn check_non_std_ipobj(
        &self,
        tx: &mut Tx<'_>,
        root: &TreeNode,
        folder_name: &str,
        node_type: &str,
        obj_type: i64,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let folder = self
            .ensure_folder(tx, root, folder_name, node_type, &mut report)
            .await?;

        let live: Vec<(i64, String)> = if obj_type == ObjectType::Address.code() {
            sqlx::query_as(
                "SELECT id, name FROM ipobj WHERE fwcloud = ? AND obj_type = ? \
                 AND interface_id IS NULL \
                 AND id NOT IN (SELECT ipobj FROM openvpn_opt WHERE name = 'ifconfig-push' \
                                AND ipobj IS NOT NULL) \
                 ORDER BY id",
            )
        } else {
            sqlx::query_as(
                "SELECT id, name FROM ipobj WHERE fwcloud = ? AND obj_type = ? \
                 AND interface_id IS NULL ORDER BY id",
            )
        }
        .bind(self.fwcloud)
        .bind(obj_type)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading non-standard objects", e))?;

        self.sync_folder_children(tx, folder, node_type, obj_type, &live, false, &mut report)
            .await?;

        Ok(report)
    }

    /// Phase 7b: same for object/service groups, including their member
    /// leaf nodes.
    pub async fn check_non_std_ipobj_group(
        &self,
        tx: &mut Tx<'_>,
        root: &TreeNode,
        folder_name: &str,
        node_type: &str,
        group_type: i64,
    ) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let folder = self
            .ensure_folder(tx, root, folder_name, node_type, &mut report)
            .await?;

        let live: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, name FROM ipobj_group WHERE fwcloud = ? AND group_type = ? ORDER BY id",
        )
        .bind(self.fwcloud)
        .bind(group_type)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading groups", e))?;

        self.sync_folder_children(tx, folder, node_type, group_type, &live, true, &mut report)
            .await?;

        Ok(report)
    }

    async fn ensure_folder(
        &self,
        tx: &mut Tx<'_>,
        root: &TreeNode,
        folder_name: &str,
        node_type: &str,
        report: &mut RepairReport,
    ) -> Result<i64> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM fwc_tree WHERE fwcloud = ? AND id_parent = ? \
             AND node_type = ? AND id_obj IS NULL LIMIT 1",
        )
        .bind(self.fwcloud)
        .bind(root.id)
        .bind(node_type)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("locating standard folder", e))?;

        match existing {
            Some(id) => Ok(id),
            None => {
                self.notice(format!("Creating missing standard folder: {folder_name}"));
                report.created += 1;
                new_node(tx, self.fwcloud, folder_name, Some(root.id), node_type, None, None).await
            }
        }
    }

    async fn sync_folder_children(
        &self,
        tx: &mut Tx<'_>,
        folder: i64,
        node_type: &str,
        obj_type: i64,
        live: &[(i64, String)],
        is_group: bool,
        report: &mut RepairReport,
    ) -> Result<()> {
        let children = children_of(tx, self.fwcloud, folder).await?;
        let live_ids: HashSet<i64> = live.iter().map(|(id, _)| *id).collect();

        for child in &children {
            let stale = match child.id_obj {
                Some(id_obj) => !live_ids.contains(&id_obj),
                None => true,
            };
            if stale {
                self.notice(format!(
                    "Referenced object not found, deleting node: {}",
                    child.id
                ));
                report.deleted += delete_subtree(tx, self.fwcloud, child.id).await?.len() as u64;
            }
        }

        let node_obj_ids: HashSet<i64> = children.iter().filter_map(|c| c.id_obj).collect();
        for (obj_id, name) in live {
            if !node_obj_ids.contains(obj_id) {
                let node =
                    new_node(tx, self.fwcloud, name, Some(folder), node_type, Some(*obj_id), Some(obj_type))
                        .await?;
                if is_group {
                    create_group_nodes(tx, self.fwcloud, node, *obj_id).await?;
                }
                report.created += 1;
            }
        }

        Ok(())
    }

    /// Phase 8: drop nodes whose parent id references nothing.
    pub async fn delete_orphan_nodes(&self, tx: &mut Tx<'_>) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let orphans: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM fwc_tree WHERE fwcloud = ? AND id_parent IS NOT NULL \
             AND id_parent NOT IN (SELECT id FROM fwc_tree)",
        )
        .bind(self.fwcloud)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("finding orphan nodes", e))?;

        if !orphans.is_empty() {
            self.notice(format!("Removing {} orphan nodes", orphans.len()));
            for id in orphans {
                // May already be gone as a descendant of an earlier orphan.
                report.deleted += delete_subtree(tx, self.fwcloud, id).await?.len() as u64;
            }
        }

        Ok(report)
    }
}

fn root_of(roots: &[TreeNode], node_type: &str) -> TreeNode {
    roots
        .iter()
        .find(|r| r.node_type == node_type)
        .cloned()
        .expect("check_root_nodes guarantees all four roots")
}

/// Re-validate the implicit rules a firewall's options imply: the catch-all
/// rule must close every filter chain, and the explicit stateful rule must
/// exist exactly when the firewall is NOT stateful (a stateful one gets the
/// preamble from the script writer instead).
pub async fn check_special_rules(tx: &mut Tx<'_>, fw: &Firewall) -> Result<RepairReport> {
    let mut report = RepairReport::default();

    for chain in [
        PolicyRuleType::Input,
        PolicyRuleType::Output,
        PolicyRuleType::Forward,
    ] {
        let chain_rules: Vec<Rule> = chain_policy_rules(tx, fw.id, chain).await?;

        let stateful_rules: Vec<&Rule> = chain_rules
            .iter()
            .filter(|r| r.special == SPECIAL_STATEFUL)
            .collect();

        if fw.is_stateful() {
            for rule in &stateful_rules {
                rules::remove_rule(tx, rule.id).await?;
                report.deleted += 1;
            }
        } else if stateful_rules.is_empty() {
            let created = rules::create(
                tx,
                CreateRule::builder()
                    .firewall(fw.id)
                    .family(RuleFamily::Policy)
                    .rule_type(chain)
                    .special(SPECIAL_STATEFUL)
                    .action(ACTION_ACCEPT)
                    .comment("Allow established and related connections".to_string())
                    .build(),
            )
            .await?;
            if let Some(first) = chain_rules.first() {
                rules::move_rules(tx, &[created.id], first.id, Offset::Above).await?;
            }
            report.created += 1;
        }

        // Refetch: the stateful fixes above may have renumbered the chain.
        let chain_rules = chain_policy_rules(tx, fw.id, chain).await?;
        let catch_all = chain_rules.iter().find(|r| r.special == SPECIAL_CATCH_ALL);
        match catch_all {
            None => {
                rules::create(
                    tx,
                    CreateRule::builder()
                        .firewall(fw.id)
                        .family(RuleFamily::Policy)
                        .rule_type(chain)
                        .special(SPECIAL_CATCH_ALL)
                        .action(ACTION_DROP)
                        .comment("Catch-all".to_string())
                        .build(),
                )
                .await?;
                report.created += 1;
            }
            Some(rule) => {
                let last = chain_rules.last().expect("chain has at least the catch-all");
                if rule.id != last.id {
                    rules::move_rules(tx, &[rule.id], last.id, Offset::Below).await?;
                    report.repaired += 1;
                }
            }
        }
    }

    Ok(report)
}

async fn chain_policy_rules(
    tx: &mut Tx<'_>,
    firewall: i64,
    chain: PolicyRuleType,
) -> Result<Vec<Rule>> {
    Ok(rules::rules_in_scope(
        tx,
        &rules::RuleScope {
            firewall,
            family: RuleFamily::Policy,
            group: None,
        },
    )
    .await?
    .into_iter()
    .filter(|r| r.rule_type == Some(chain))
    .collect())
}
