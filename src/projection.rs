use std::collections::BTreeMap;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    document::{DeletedRef, Document, ListEntry, ListResult, NodeSummary, RelationTarget, SyncDelta},
    errors::EngineError,
    registry::{TextFilter, TypeRegistry},
    store::{GraphStore, StoredEdge, StoredNode},
    traverse,
};

/// Read-only projection of graph neighborhoods into nested documents.
pub struct ProjectionBuilder<'a> {
    registry: &'a TypeRegistry,
    store: &'a GraphStore,
}

impl<'a> ProjectionBuilder<'a> {
    pub fn new(registry: &'a TypeRegistry, store: &'a GraphStore) -> Self {
        Self { registry, store }
    }

    /// Projects one entity with its relation groups, inline sub-entities,
    /// and merge siblings. `NotFound` when no node of that uid exists
    /// within the type's subtype set.
    pub fn project_one(&self, type_name: &str, uid: &str) -> Result<Document, EngineError> {
        let node = self.node_of_type(type_name, uid)?;
        debug!("project_one {type_name} {uid}");
        self.build_document(&node, true)
    }

    /// Type-wide listing. Without arguments: one entry per merge group,
    /// ordered by (real_type, label). With `filter`: case-insensitive
    /// substring matching over labels, declared text-filter properties,
    /// and one hop to related labels. With `changed_since`: the
    /// incremental-sync delta of touched entities and tombstones.
    pub fn project_list(
        &self,
        type_name: &str,
        filter: Option<&str>,
        changed_since: Option<DateTime<Utc>>,
    ) -> Result<ListResult, EngineError> {
        let types = self.registry.concrete_subtypes_of(type_name)?;
        if let Some(needle) = filter {
            let mut entries = Vec::new();
            for node in self.store.nodes_of_types(&types)? {
                if self.matches_filter(&node, needle)? {
                    entries.push(self.list_entry(&node, Vec::new())?);
                }
            }
            return Ok(ListResult::Entries(entries));
        }
        if let Some(cutoff) = changed_since {
            let touched = self.store.nodes_modified_since(&types, cutoff)?;
            let created_modified = self.fold_merge_groups(touched)?;
            let all_subtypes = self.registry.subtypes_of(type_name)?;
            let deleted = self
                .store
                .tombstones_since(&all_subtypes, cutoff)?
                .into_iter()
                .map(|t| DeletedRef { uid: t.uid })
                .collect();
            return Ok(ListResult::Sync(SyncDelta {
                created_modified,
                deleted,
            }));
        }
        let nodes = self.store.nodes_of_types(&types)?;
        Ok(ListResult::Entries(self.fold_merge_groups(nodes)?))
    }

    /// Flat autocomplete summaries, no merge folding.
    pub fn project_reference_list(
        &self,
        type_name: &str,
    ) -> Result<Vec<NodeSummary>, EngineError> {
        let types = self.registry.concrete_subtypes_of(type_name)?;
        let mut summaries = Vec::new();
        for node in self.store.nodes_of_types(&types)? {
            summaries.push(NodeSummary::of(&node));
        }
        Ok(summaries)
    }
}

impl ProjectionBuilder<'_> {
    fn node_of_type(&self, type_name: &str, uid: &str) -> Result<StoredNode, EngineError> {
        let descriptor = self.registry.resolve(type_name)?;
        match self.store.try_get_node(uid)? {
            Some(node) if descriptor.subtypes.contains(&node.real_type) => Ok(node),
            _ => Err(EngineError::not_found(format!(
                "<{type_name} uid={uid}> not found"
            ))),
        }
    }

    /// One traversal pass: direct edges grouped by name (incoming under
    /// the recorded reverse name), inline children expanded as nested
    /// documents, merge siblings attached at the top level only.
    fn build_document(
        &self,
        node: &StoredNode,
        expand_merge: bool,
    ) -> Result<Document, EngineError> {
        let hood = traverse::neighborhood(self.store, &node.uid)?;

        let mut relations: BTreeMap<String, Vec<RelationTarget>> = BTreeMap::new();
        for edge in &hood.outgoing {
            let target = self.relation_target(edge, &edge.to_uid)?;
            relations.entry(edge.name.clone()).or_default().push(target);
        }
        for edge in &hood.incoming {
            let target = self.relation_target(edge, &edge.from_uid)?;
            relations
                .entry(edge.reverse_name.clone())
                .or_default()
                .push(target);
        }

        let mut inline = BTreeMap::new();
        for edge in &hood.inline_children {
            let child = self.store.get_node(&edge.to_uid)?;
            inline.insert(edge.name.clone(), self.build_document(&child, false)?);
        }

        let merged_items = if expand_merge {
            let group = traverse::merge_group(self.store, &node.uid)?;
            if group.is_empty() {
                None
            } else {
                Some(self.summaries_of(&group)?)
            }
        } else {
            None
        };

        Ok(Document {
            uid: node.uid.clone(),
            real_type: node.real_type.clone(),
            label: node.label.clone(),
            is_deleted: node.is_deleted,
            deleted_and_has_dependent_nodes: node.is_deleted
                && self.store.has_dependents(&node.uid)?,
            created_by: node.created_by.clone(),
            created_when: node.created_when,
            modified_by: node.modified_by.clone(),
            modified_when: node.modified_when,
            properties: props_as_map(&node.props),
            relations,
            inline,
            merged_items,
        })
    }

    fn relation_target(
        &self,
        edge: &StoredEdge,
        target_uid: &str,
    ) -> Result<RelationTarget, EngineError> {
        let target = self.store.get_node(target_uid)?;
        let flagged = target.is_deleted
            && traverse::has_other_dependents(self.store, target_uid, edge.id)?;
        Ok(RelationTarget {
            uid: target.uid,
            label: target.label,
            real_type: target.real_type,
            is_deleted: target.is_deleted,
            deleted_and_has_dependent_nodes: flagged,
            rel_props: props_as_map(&edge.props),
        })
    }

    /// Dedup key for listings is the merge group, not the uid: the first
    /// member in ordering is primary, the rest fold into merged_items.
    fn fold_merge_groups(&self, nodes: Vec<StoredNode>) -> Result<Vec<ListEntry>, EngineError> {
        let mut consumed: AHashSet<String> = AHashSet::new();
        let mut entries = Vec::new();
        for node in nodes {
            if consumed.contains(&node.uid) {
                continue;
            }
            let group = traverse::merge_group(self.store, &node.uid)?;
            for member in &group {
                consumed.insert(member.clone());
            }
            let merged = self.summaries_of(&group)?;
            entries.push(self.list_entry(&node, merged)?);
        }
        Ok(entries)
    }

    fn list_entry(
        &self,
        node: &StoredNode,
        merged_items: Vec<NodeSummary>,
    ) -> Result<ListEntry, EngineError> {
        Ok(ListEntry {
            uid: node.uid.clone(),
            label: node.label.clone(),
            real_type: node.real_type.clone(),
            is_deleted: node.is_deleted,
            deleted_and_has_dependent_nodes: node.is_deleted
                && self.store.has_dependents(&node.uid)?,
            merged_items,
        })
    }

    fn summaries_of(&self, uids: &[String]) -> Result<Vec<NodeSummary>, EngineError> {
        let mut summaries = Vec::new();
        for uid in uids {
            summaries.push(NodeSummary::of(&self.store.get_node(uid)?));
        }
        Ok(summaries)
    }

    /// Union of label, declared text-filter properties, and one hop to a
    /// directly related node's label; all case-insensitive substring.
    fn matches_filter(&self, node: &StoredNode, needle: &str) -> Result<bool, EngineError> {
        let needle = needle.to_lowercase();
        if node.label.to_lowercase().contains(&needle) {
            return Ok(true);
        }
        let descriptor = self.registry.resolve(&node.real_type)?;
        for filter in &descriptor.text_filters {
            match filter {
                TextFilter::Property(field) => {
                    if let Some(value) = node.props.get(field) {
                        if let Some(text) = value.as_str() {
                            if text.to_lowercase().contains(&needle) {
                                return Ok(true);
                            }
                        }
                    }
                }
                TextFilter::RelatedLabel => {
                    for edge in self.store.edges_touching(&node.uid)? {
                        let other = edge.other_endpoint(&node.uid);
                        let related = self.store.get_node(other)?;
                        if related.label.to_lowercase().contains(&needle) {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }
}

fn props_as_map(props: &serde_json::Value) -> BTreeMap<String, serde_json::Value> {
    match props.as_object() {
        Some(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        None => BTreeMap::new(),
    }
}
