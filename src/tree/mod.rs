//! The hierarchical navigation index (`fwc_tree`) and its node operations.
//!
//! Every tenant owns exactly four root nodes (FIREWALLS, OBJECTS, SERVICES,
//! CA); domain entities hang below them via `id_obj`/`obj_type`
//! back-references. Subtree deletion runs on an explicit worklist so depth
//! is bounded by the heap, not the stack.

pub mod error;
pub mod repair;


use crate::database::error::DatabaseError;
use crate::database::{IpObj, TreeNode, Tx};
use crate::position::ObjectType;
use crate::Result;

pub use repair::{Repair, RepairReport};

/// The four canonical (name, node_type) root pairs.
pub const ROOT_NODES: [(&str, &str); 4] = [
    ("FIREWALLS", "FDF"),
    ("OBJECTS", "FDO"),
    ("SERVICES", "FDS"),
    ("CA", "FCA"),
];

/// Standard object folders under the OBJECTS root, (name, node_type,
/// object type code).
pub const OBJECT_FOLDERS: [(&str, &str, i64); 4] = [
    ("Addresses", "OIA", 5),
    ("Address Ranges", "OIR", 6),
    ("Networks", "OIN", 7),
    ("Marks", "MRK", 30),
];

/// Standard service folders under the SERVICES root.
pub const SERVICE_FOLDERS: [(&str, &str, i64); 4] = [
    ("IP", "SOI", 1),
    ("TCP", "SOT", 2),
    ("UDP", "SOU", 4),
    ("ICMP", "SOM", 3),
];

/// Insert a node as the last child of `parent`. Returns the new node id.
pub async fn new_node(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    name: &str,
    parent: Option<i64>,
    node_type: &str,
    id_obj: Option<i64>,
    obj_type: Option<i64>,
) -> Result<i64> {
    let max_order: Option<i64> = match parent {
        Some(p) => sqlx::query_scalar(
            "SELECT MAX(node_order) FROM fwc_tree WHERE fwcloud = ? AND id_parent = ?",
        )
        .bind(fwcloud)
        .bind(p)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading node order", e))?,
        None => sqlx::query_scalar(
            "SELECT MAX(node_order) FROM fwc_tree WHERE fwcloud = ? AND id_parent IS NULL",
        )
        .bind(fwcloud)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading node order", e))?,
    };

    let id = sqlx::query(
        "INSERT INTO fwc_tree (fwcloud, id_parent, name, node_type, node_order, id_obj, obj_type) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(fwcloud)
    .bind(parent)
    .bind(name)
    .bind(node_type)
    .bind(max_order.unwrap_or(0) + 1)
    .bind(id_obj)
    .bind(obj_type)
    .execute(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("inserting tree node", e))?
    .last_insert_rowid();

    Ok(id)
}

pub async fn node_by_id(tx: &mut Tx<'_>, id: i64) -> Result<Option<TreeNode>> {
    Ok(sqlx::query_as::<_, TreeNode>("SELECT * FROM fwc_tree WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading tree node", e))?)
}

pub async fn root_nodes(tx: &mut Tx<'_>, fwcloud: i64) -> Result<Vec<TreeNode>> {
    Ok(sqlx::query_as::<_, TreeNode>(
        "SELECT * FROM fwc_tree WHERE fwcloud = ? AND id_parent IS NULL ORDER BY node_order, id",
    )
    .bind(fwcloud)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading root nodes", e))?)
}

pub async fn children_of(tx: &mut Tx<'_>, fwcloud: i64, parent: i64) -> Result<Vec<TreeNode>> {
    Ok(sqlx::query_as::<_, TreeNode>(
        "SELECT * FROM fwc_tree WHERE fwcloud = ? AND id_parent = ? ORDER BY node_order, id",
    )
    .bind(fwcloud)
    .bind(parent)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading child nodes", e))?)
}

/// Delete a node and all its descendants. Worklist traversal; returns the
/// ids actually deleted.
pub async fn delete_subtree(tx: &mut Tx<'_>, fwcloud: i64, node_id: i64) -> Result<Vec<i64>> {
    let mut deleted = Vec::new();
    let mut worklist = vec![node_id];

    while let Some(id) = worklist.pop() {
        let child_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM fwc_tree WHERE fwcloud = ? AND id_parent = ?",
        )
        .bind(fwcloud)
        .bind(id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("loading subtree children", e))?;
        worklist.extend(child_ids);

        let rows = sqlx::query("DELETE FROM fwc_tree WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::query("deleting tree node", e))?
            .rows_affected();
        if rows > 0 {
            deleted.push(id);
        }
    }

    Ok(deleted)
}

/// Seed a tenant's tree: the four roots plus the standard object/service
/// folders, including the canonical Hosts and Groups folders.
pub async fn create_tenant_tree(tx: &mut Tx<'_>, fwcloud: i64) -> Result<()> {
    for (name, node_type) in ROOT_NODES {
        let root = new_node(tx, fwcloud, name, None, node_type, None, None).await?;

        if node_type == "FDO" {
            for (folder, folder_type, _) in OBJECT_FOLDERS {
                new_node(tx, fwcloud, folder, Some(root), folder_type, None, None).await?;
            }
            // The Hosts folder carries the HOST obj_type marker with no
            // object id; repair keys on this exact shape.
            new_node(
                tx,
                fwcloud,
                "Hosts",
                Some(root),
                "OIH",
                None,
                Some(ObjectType::Host.code()),
            )
            .await?;
            new_node(tx, fwcloud, "Groups", Some(root), "OIG", None, None).await?;
        }

        if node_type == "FDS" {
            for (folder, folder_type, _) in SERVICE_FOLDERS {
                new_node(tx, fwcloud, folder, Some(root), folder_type, None, None).await?;
            }
            new_node(tx, fwcloud, "Groups", Some(root), "SOG", None, None).await?;
        }
    }

    Ok(())
}

const FIREWALL_CHILDREN: [(&str, &str); 6] = [
    ("INPUT", "PI"),
    ("OUTPUT", "PO"),
    ("FORWARD", "PF"),
    ("SNAT", "NTS"),
    ("DNAT", "NTD"),
    ("Routing", "RR"),
];

/// Create a firewall's subtree: the FW node, its policy chain folders and
/// its interfaces (with their addresses) read from the live object table.
pub async fn create_firewall_subtree(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    parent: i64,
    firewall_id: i64,
    name: &str,
) -> Result<i64> {
    let fw_node = new_node(
        tx,
        fwcloud,
        name,
        Some(parent),
        "FW",
        Some(firewall_id),
        Some(ObjectType::Firewall.code()),
    )
    .await?;

    for (child_name, child_type) in FIREWALL_CHILDREN {
        new_node(tx, fwcloud, child_name, Some(fw_node), child_type, None, None).await?;
    }

    let ifaces_node = new_node(tx, fwcloud, "Interfaces", Some(fw_node), "IFF", None, None).await?;
    let interfaces = sqlx::query_as::<_, IpObj>(
        "SELECT * FROM ipobj WHERE fwcloud = ? AND firewall_id = ? AND obj_type = ? ORDER BY id",
    )
    .bind(fwcloud)
    .bind(firewall_id)
    .bind(ObjectType::FirewallInterface.code())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading firewall interfaces", e))?;

    for iface in interfaces {
        let iface_node = new_node(
            tx,
            fwcloud,
            &iface.name,
            Some(ifaces_node),
            "IFF",
            Some(iface.id),
            Some(iface.obj_type),
        )
        .await?;
        interface_addresses(tx, fwcloud, iface_node, iface.id).await?;
    }

    Ok(fw_node)
}

/// Create a cluster's subtree: the CL node, the shared policy folders and a
/// Nodes folder holding the member firewalls.
pub async fn create_cluster_subtree(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    parent: i64,
    cluster_id: i64,
    name: &str,
) -> Result<i64> {
    let cl_node = new_node(
        tx,
        fwcloud,
        name,
        Some(parent),
        "CL",
        Some(cluster_id),
        Some(ObjectType::Cluster.code()),
    )
    .await?;

    for (child_name, child_type) in FIREWALL_CHILDREN {
        new_node(tx, fwcloud, child_name, Some(cl_node), child_type, None, None).await?;
    }

    let nodes_folder = new_node(tx, fwcloud, "Nodes", Some(cl_node), "FCF", None, None).await?;
    let members = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, name FROM firewall WHERE fwcloud = ? AND cluster = ? ORDER BY id",
    )
    .bind(fwcloud)
    .bind(cluster_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading cluster members", e))?;

    for (member_id, member_name) in members {
        new_node(
            tx,
            fwcloud,
            &member_name,
            Some(nodes_folder),
            "FW",
            Some(member_id),
            Some(ObjectType::Firewall.code()),
        )
        .await?;
    }

    Ok(cl_node)
}

/// Create a host's subtree under the Hosts folder: the host node, one node
/// per interface and one per interface address.
pub async fn create_host_subtree(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    parent: i64,
    host: &IpObj,
) -> Result<i64> {
    let host_node = new_node(
        tx,
        fwcloud,
        &host.name,
        Some(parent),
        "OIH",
        Some(host.id),
        Some(ObjectType::Host.code()),
    )
    .await?;

    let interfaces = sqlx::query_as::<_, IpObj>(
        "SELECT * FROM ipobj WHERE host_id = ? ORDER BY id",
    )
    .bind(host.id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading host interfaces", e))?;

    for iface in interfaces {
        let iface_node = new_node(
            tx,
            fwcloud,
            &iface.name,
            Some(host_node),
            "IFH",
            Some(iface.id),
            Some(iface.obj_type),
        )
        .await?;
        interface_addresses(tx, fwcloud, iface_node, iface.id).await?;
    }

    Ok(host_node)
}

async fn interface_addresses(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    iface_node: i64,
    iface_id: i64,
) -> Result<()> {
    let addrs = sqlx::query_as::<_, IpObj>(
        "SELECT * FROM ipobj WHERE interface_id = ? ORDER BY id",
    )
    .bind(iface_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading interface addresses", e))?;

    for addr in addrs {
        new_node(
            tx,
            fwcloud,
            &addr.name,
            Some(iface_node),
            "OIA",
            Some(addr.id),
            Some(addr.obj_type),
        )
        .await?;
    }

    Ok(())
}

/// Node type used for a leaf object node of the given object type.
pub fn node_type_for_object(obj_type: i64) -> &'static str {
    match ObjectType::from_code(obj_type) {
        Some(ObjectType::IpService) => "SOI",
        Some(ObjectType::Tcp) => "SOT",
        Some(ObjectType::Icmp) => "SOM",
        Some(ObjectType::Udp) => "SOU",
        Some(ObjectType::Range) => "OIR",
        Some(ObjectType::Network) => "OIN",
        Some(ObjectType::Host) => "OIH",
        Some(ObjectType::Mark) => "MRK",
        _ => "OIA",
    }
}

/// Create the member leaf nodes of an object group node.
pub async fn create_group_nodes(
    tx: &mut Tx<'_>,
    fwcloud: i64,
    parent: i64,
    group_id: i64,
) -> Result<()> {
    let members = sqlx::query_as::<_, IpObj>(
        "SELECT o.* FROM ipobj o \
         INNER JOIN ipobj_group_member m ON m.ipobj_id = o.id \
         WHERE m.group_id = ? ORDER BY o.id",
    )
    .bind(group_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading group members", e))?;

    for member in members {
        new_node(
            tx,
            fwcloud,
            &member.name,
            Some(parent),
            node_type_for_object(member.obj_type),
            Some(member.id),
            Some(member.obj_type),
        )
        .await?;
    }

    Ok(())
}
