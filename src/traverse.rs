use std::collections::VecDeque;

use ahash::AHashSet;

use crate::{
    errors::EngineError,
    store::{GraphStore, StoredEdge},
};

/// All edges touching one node, split for projection in a single pass.
/// Direction is decided by comparing each edge's recorded start uid with
/// the node's own uid; type labels are never consulted, so
/// self-referencing types group correctly.
#[derive(Debug, Clone, Default)]
pub struct Neighborhood {
    /// Non-inline, non-merge edges starting at the node.
    pub outgoing: Vec<StoredEdge>,
    /// Non-merge edges ending at the node (inline ownership included).
    pub incoming: Vec<StoredEdge>,
    /// Inline edges starting at the node: its owned sub-entities.
    pub inline_children: Vec<StoredEdge>,
    /// Merge edges in either direction.
    pub merge: Vec<StoredEdge>,
}

pub fn neighborhood(store: &GraphStore, uid: &str) -> Result<Neighborhood, EngineError> {
    let mut hood = Neighborhood::default();
    for edge in store.edges_touching(uid)? {
        if edge.is_merge() {
            hood.merge.push(edge);
        } else if edge.from_uid == uid {
            if edge.inline {
                hood.inline_children.push(edge);
            } else {
                hood.outgoing.push(edge);
            }
        } else {
            hood.incoming.push(edge);
        }
    }
    Ok(hood)
}

/// Transitive closure over merge edges in either direction, excluding
/// `uid` itself. A chain A-B-C yields the same group from every member.
pub fn merge_group(store: &GraphStore, uid: &str) -> Result<Vec<String>, EngineError> {
    let mut visited: AHashSet<String> = AHashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut members = Vec::new();
    visited.insert(uid.to_string());
    queue.push_back(uid.to_string());
    while let Some(current) = queue.pop_front() {
        for edge in store.edges_touching(&current)? {
            if !edge.is_merge() {
                continue;
            }
            let other = edge.other_endpoint(&current).to_string();
            if visited.insert(other.clone()) {
                members.push(other.clone());
                queue.push_back(other);
            }
        }
    }
    members.sort();
    Ok(members)
}

/// True when the target of `edge_id` is referenced by some non-merge
/// inbound edge other than `edge_id` itself.
pub fn has_other_dependents(
    store: &GraphStore,
    uid: &str,
    edge_id: i64,
) -> Result<bool, EngineError> {
    for edge in store.edges_in(uid)? {
        if edge.id != edge_id && !edge.is_merge() {
            return Ok(true);
        }
    }
    Ok(false)
}
