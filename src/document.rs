use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::StoredNode;

/// Flat entity summary used for merge siblings and reference lists.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeSummary {
    pub uid: String,
    pub label: String,
    pub real_type: String,
    pub is_deleted: bool,
}

impl NodeSummary {
    pub fn of(node: &StoredNode) -> Self {
        Self {
            uid: node.uid.clone(),
            label: node.label.clone(),
            real_type: node.real_type.clone(),
            is_deleted: node.is_deleted,
        }
    }
}

/// One connected entity inside a relation group, annotated with the
/// properties carried by the edge itself.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelationTarget {
    pub uid: String,
    pub label: String,
    pub real_type: String,
    pub is_deleted: bool,
    pub deleted_and_has_dependent_nodes: bool,
    #[serde(rename = "relData", skip_serializing_if = "BTreeMap::is_empty")]
    pub rel_props: BTreeMap<String, serde_json::Value>,
}

/// Nested projection of one entity: scalar properties, relation groups,
/// inline sub-documents, and merge siblings when any exist.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Document {
    pub uid: String,
    pub real_type: String,
    pub label: String,
    pub is_deleted: bool,
    pub deleted_and_has_dependent_nodes: bool,
    pub created_by: String,
    pub created_when: DateTime<Utc>,
    pub modified_by: String,
    pub modified_when: DateTime<Utc>,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub relations: BTreeMap<String, Vec<RelationTarget>>,
    pub inline: BTreeMap<String, Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_items: Option<Vec<NodeSummary>>,
}

/// One row of a type-wide listing; merge partners folded into the entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListEntry {
    pub uid: String,
    pub label: String,
    pub real_type: String,
    pub is_deleted: bool,
    pub deleted_and_has_dependent_nodes: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merged_items: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeletedRef {
    pub uid: String,
}

/// Incremental-sync delta: entities touched after the cutoff and
/// tombstones recorded after it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncDelta {
    pub created_modified: Vec<ListEntry>,
    pub deleted: Vec<DeletedRef>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ListResult {
    Entries(Vec<ListEntry>),
    Sync(SyncDelta),
}
