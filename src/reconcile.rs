use std::collections::BTreeMap;

use ahash::AHashSet;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::EngineError,
    registry::{Cardinality, PropertyKind, RelationDef, TypeDescriptor, TypeRegistry},
    store::{GraphStore, StoredNode},
};

/// Reference to an existing target within a relation group, optionally
/// carrying properties for the edge itself.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RelationRef {
    pub uid: String,
    #[serde(default, rename = "relData")]
    pub props: BTreeMap<String, serde_json::Value>,
}

impl RelationRef {
    pub fn to(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, name: &str, value: serde_json::Value) -> Self {
        self.props.insert(name.to_string(), value);
        self
    }
}

/// Inline sub-entity payload: the declared subtype plus its own
/// properties and relation references, one level deep.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InlinePayload {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<RelationRef>>,
}

impl InlinePayload {
    pub fn of(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_relation(mut self, name: &str, refs: Vec<RelationRef>) -> Self {
        self.relations.insert(name.to_string(), refs);
        self
    }
}

/// Partial document accepted by create and update. Only fields declared
/// on the entity type are accepted; anything else is a validation error.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct WritePayload {
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<RelationRef>>,
    #[serde(default)]
    pub inline: BTreeMap<String, InlinePayload>,
}

impl WritePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_label(self, label: &str) -> Self {
        self.with_property("label", serde_json::Value::String(label.to_string()))
    }

    pub fn with_relation(mut self, name: &str, refs: Vec<RelationRef>) -> Self {
        self.relations.insert(name.to_string(), refs);
        self
    }

    pub fn with_inline(mut self, name: &str, payload: InlinePayload) -> Self {
        self.inline.insert(name.to_string(), payload);
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Created {
    pub uid: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Updated {
    pub uid: String,
}

/// Turns partial documents into the minimal set of graph mutations,
/// honoring cardinality, ownership, and audit stamping. Every public
/// operation runs in one storage transaction.
pub struct Reconciler<'a> {
    registry: &'a TypeRegistry,
    store: &'a GraphStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(registry: &'a TypeRegistry, store: &'a GraphStore) -> Self {
        Self { registry, store }
    }

    pub fn create(
        &self,
        type_name: &str,
        payload: &WritePayload,
        actor: &str,
    ) -> Result<Created, EngineError> {
        self.store
            .with_transaction(|_| self.create_in_txn(type_name, payload, actor))
    }

    pub fn update(
        &self,
        type_name: &str,
        uid: &str,
        payload: &WritePayload,
        actor: &str,
    ) -> Result<Updated, EngineError> {
        self.store
            .with_transaction(|_| self.update_in_txn(type_name, uid, payload, actor))
    }

    /// Hard-deletes inline-owned descendants whose types exist only as
    /// inline targets, depth-first. Runs in the caller's transaction.
    pub fn delete_owned_descendants(&self, uid: &str) -> Result<(), EngineError> {
        for edge in self.store.edges_touching(uid)? {
            if edge.from_uid != uid || !edge.inline {
                continue;
            }
            let Some(child) = self.store.try_get_node(&edge.to_uid)? else {
                continue;
            };
            if self.registry.resolve(&child.real_type)?.inline_only {
                self.delete_owned_descendants(&child.uid)?;
                self.store.delete_node(&child.uid)?;
            }
        }
        Ok(())
    }
}

impl Reconciler<'_> {
    fn create_in_txn(
        &self,
        type_name: &str,
        payload: &WritePayload,
        actor: &str,
    ) -> Result<Created, EngineError> {
        let descriptor = self.registry.resolve(type_name)?;
        if descriptor.is_abstract {
            return Err(EngineError::validation(format!(
                "cannot create instance of abstract type {type_name}"
            )));
        }
        validate_payload(descriptor, payload)?;
        check_required_properties(descriptor, payload)?;
        check_relation_floors(descriptor, payload)?;

        let now = Utc::now();
        let uid = new_uid();
        let label = payload_label(payload).unwrap_or_default();
        self.store.insert_node(&StoredNode {
            uid: uid.clone(),
            real_type: type_name.to_string(),
            label: label.clone(),
            is_deleted: false,
            created_by: actor.to_string(),
            created_when: now,
            modified_by: actor.to_string(),
            modified_when: now,
            props: property_bag(descriptor, payload, None),
        })?;

        for (name, refs) in &payload.relations {
            let rel = relation_of(descriptor, name)?;
            self.connect_fresh(&uid, rel, refs)?;
        }
        for (field, inline_payload) in &payload.inline {
            let rel = inline_relation_of(descriptor, field)?;
            let child_uid = self.create_inline_node(rel, inline_payload, actor)?;
            self.store
                .insert_edge(&uid, &child_uid, field, &rel.reverse_name, true, &empty_props())?;
        }

        info!("created {type_name} {uid}");
        Ok(Created { uid, label })
    }

    fn update_in_txn(
        &self,
        type_name: &str,
        uid: &str,
        payload: &WritePayload,
        actor: &str,
    ) -> Result<Updated, EngineError> {
        let descriptor = self.registry.resolve(type_name)?;
        let node = self.node_of_type(descriptor, uid)?;
        validate_payload(descriptor, payload)?;

        let now = Utc::now();
        let label = payload_label(payload).unwrap_or_else(|| node.label.clone());
        let props = property_bag(descriptor, payload, Some(&node.props));
        self.store.update_node(uid, &label, &props, actor, now)?;

        for (name, refs) in &payload.relations {
            let rel = relation_of(descriptor, name)?;
            self.apply_relation_delta(uid, rel, refs)?;
        }
        for (field, inline_payload) in &payload.inline {
            let rel = inline_relation_of(descriptor, field)?;
            self.apply_inline_delta(uid, field, rel, inline_payload, actor)?;
        }

        debug!("updated {type_name} {uid}");
        Ok(Updated {
            uid: uid.to_string(),
        })
    }

    fn node_of_type(
        &self,
        descriptor: &TypeDescriptor,
        uid: &str,
    ) -> Result<StoredNode, EngineError> {
        match self.store.try_get_node(uid)? {
            Some(node) if descriptor.subtypes.contains(&node.real_type) => Ok(node),
            _ => Err(EngineError::not_found(format!(
                "<{} uid={uid}> not found",
                descriptor.name
            ))),
        }
    }

    /// Connects every reference of a fresh (unconnected) relation group.
    fn connect_fresh(
        &self,
        uid: &str,
        rel: &RelationDef,
        refs: &[RelationRef],
    ) -> Result<(), EngineError> {
        let take = if rel.cardinality.at_most_one() {
            refs.len().min(1)
        } else {
            refs.len()
        };
        for reference in &refs[..take] {
            self.connect_checked(uid, rel, reference)?;
        }
        Ok(())
    }

    fn connect_checked(
        &self,
        uid: &str,
        rel: &RelationDef,
        reference: &RelationRef,
    ) -> Result<(), EngineError> {
        self.checked_target(rel, reference)?;
        self.store.insert_edge(
            uid,
            &reference.uid,
            &rel.name,
            &rel.reverse_name,
            false,
            &props_to_value(&reference.props),
        )?;
        Ok(())
    }

    fn checked_target(
        &self,
        rel: &RelationDef,
        reference: &RelationRef,
    ) -> Result<StoredNode, EngineError> {
        let target = self.store.get_node(&reference.uid).map_err(|_| {
            EngineError::not_found(format!(
                "relation {} target {} does not resolve",
                rel.name, reference.uid
            ))
        })?;
        let allowed = self.registry.subtypes_of(&rel.target_type)?;
        if !allowed.contains(&target.real_type) {
            return Err(EngineError::validation(format!(
                "relation {} expects {} but {} is a {}",
                rel.name, rel.target_type, reference.uid, target.real_type
            )));
        }
        Ok(target)
    }

    /// Applies one relation group's delta according to its cardinality.
    fn apply_relation_delta(
        &self,
        uid: &str,
        rel: &RelationDef,
        refs: &[RelationRef],
    ) -> Result<(), EngineError> {
        let existing = self.store.edges_out_named(uid, &rel.name)?;
        match rel.cardinality {
            // Never disconnect first: the floor must hold mid-transaction.
            Cardinality::ExactlyOne => {
                let Some(reference) = refs.first() else {
                    return Err(EngineError::cardinality(format!(
                        "relation {} requires exactly one target",
                        rel.name
                    )));
                };
                self.checked_target(rel, reference)?;
                let props = props_to_value(&reference.props);
                if let Some(edge) = existing.iter().find(|e| e.to_uid == reference.uid) {
                    self.store.update_edge_props(edge.id, &props)?;
                } else if let Some(edge) = existing.first() {
                    self.store.repoint_edge(edge.id, &reference.uid, &props)?;
                } else {
                    self.connect_checked(uid, rel, reference)?;
                }
            }
            // Connect-or-update first, disconnect leftovers after, so the
            // group never transiently drops below one target.
            Cardinality::OneOrMore => {
                if refs.is_empty() {
                    return Err(EngineError::cardinality(format!(
                        "relation {} requires at least one target",
                        rel.name
                    )));
                }
                let mut kept: AHashSet<&str> = AHashSet::new();
                for reference in refs {
                    kept.insert(reference.uid.as_str());
                    let props = props_to_value(&reference.props);
                    if let Some(edge) = existing.iter().find(|e| e.to_uid == reference.uid) {
                        self.store.update_edge_props(edge.id, &props)?;
                    } else {
                        self.connect_checked(uid, rel, reference)?;
                    }
                }
                for edge in &existing {
                    if !kept.contains(edge.to_uid.as_str()) {
                        self.store.delete_edge(edge.id)?;
                    }
                }
            }
            // Floor is zero: drop everything and reconnect fresh.
            Cardinality::ZeroOrOne | Cardinality::ZeroOrMore => {
                for edge in &existing {
                    self.store.delete_edge(edge.id)?;
                }
                self.connect_fresh(uid, rel, refs)?;
            }
        }
        Ok(())
    }

    /// Inline fields hold at most one owned target. Same declared subtype:
    /// mutate in place. Different subtype: create the replacement, repoint
    /// the inline edge, and drop the old target only when its type exists
    /// solely as an inline target.
    fn apply_inline_delta(
        &self,
        owner_uid: &str,
        field: &str,
        rel: &RelationDef,
        payload: &InlinePayload,
        actor: &str,
    ) -> Result<(), EngineError> {
        let existing = self.store.edges_out_named(owner_uid, field)?;
        let Some(edge) = existing.first() else {
            let child_uid = self.create_inline_node(rel, payload, actor)?;
            self.store.insert_edge(
                owner_uid,
                &child_uid,
                field,
                &rel.reverse_name,
                true,
                &empty_props(),
            )?;
            return Ok(());
        };

        let current = self.store.get_node(&edge.to_uid)?;
        if current.real_type == payload.type_name {
            let descriptor = self.checked_inline_type(rel, payload)?;
            let as_write = inline_as_write(payload);
            validate_payload(descriptor, &as_write)?;
            let label = payload_label(&as_write).unwrap_or_else(|| current.label.clone());
            let props = property_bag(descriptor, &as_write, Some(&current.props));
            self.store
                .update_node(&current.uid, &label, &props, actor, Utc::now())?;
            for (name, refs) in &as_write.relations {
                let child_rel = relation_of(descriptor, name)?;
                self.apply_relation_delta(&current.uid, child_rel, refs)?;
            }
        } else {
            let child_uid = self.create_inline_node(rel, payload, actor)?;
            self.store.repoint_edge(edge.id, &child_uid, &empty_props())?;
            if self.registry.resolve(&current.real_type)?.inline_only {
                self.delete_owned_descendants(&current.uid)?;
                self.store.delete_node(&current.uid)?;
            }
        }
        Ok(())
    }

    /// Creates the owned node for an inline field, applying the same
    /// create logic to its own relations. Returns the new uid.
    fn create_inline_node(
        &self,
        rel: &RelationDef,
        payload: &InlinePayload,
        actor: &str,
    ) -> Result<String, EngineError> {
        let descriptor = self.checked_inline_type(rel, payload)?;
        let as_write = inline_as_write(payload);
        validate_payload(descriptor, &as_write)?;
        check_required_properties(descriptor, &as_write)?;
        check_relation_floors(descriptor, &as_write)?;

        let now = Utc::now();
        let uid = new_uid();
        self.store.insert_node(&StoredNode {
            uid: uid.clone(),
            real_type: payload.type_name.clone(),
            label: payload_label(&as_write).unwrap_or_default(),
            is_deleted: false,
            created_by: actor.to_string(),
            created_when: now,
            modified_by: actor.to_string(),
            modified_when: now,
            props: property_bag(descriptor, &as_write, None),
        })?;
        for (name, refs) in &as_write.relations {
            let child_rel = relation_of(descriptor, name)?;
            self.connect_fresh(&uid, child_rel, refs)?;
        }
        Ok(uid)
    }

    fn checked_inline_type(
        &self,
        rel: &RelationDef,
        payload: &InlinePayload,
    ) -> Result<&TypeDescriptor, EngineError> {
        let allowed = self.registry.subtypes_of(&rel.target_type)?;
        if !allowed.contains(&payload.type_name) {
            return Err(EngineError::validation(format!(
                "inline field {} expects a {} but payload declares {}",
                rel.name, rel.target_type, payload.type_name
            )));
        }
        let descriptor = self.registry.resolve(&payload.type_name)?;
        if descriptor.is_abstract {
            return Err(EngineError::validation(format!(
                "inline field {} cannot hold abstract type {}",
                rel.name, payload.type_name
            )));
        }
        Ok(descriptor)
    }
}

fn new_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

fn empty_props() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn props_to_value(props: &BTreeMap<String, serde_json::Value>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (k, v) in props {
        map.insert(k.clone(), v.clone());
    }
    serde_json::Value::Object(map)
}

fn payload_label(payload: &WritePayload) -> Option<String> {
    payload
        .properties
        .get("label")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn inline_as_write(payload: &InlinePayload) -> WritePayload {
    WritePayload {
        properties: payload.properties.clone(),
        relations: payload.relations.clone(),
        inline: BTreeMap::new(),
    }
}

fn relation_of<'d>(
    descriptor: &'d TypeDescriptor,
    name: &str,
) -> Result<&'d RelationDef, EngineError> {
    descriptor.relation(name).ok_or_else(|| {
        EngineError::validation(format!(
            "{} does not declare relation {name}",
            descriptor.name
        ))
    })
}

fn inline_relation_of<'d>(
    descriptor: &'d TypeDescriptor,
    name: &str,
) -> Result<&'d RelationDef, EngineError> {
    descriptor.inline_relation(name).ok_or_else(|| {
        EngineError::validation(format!(
            "{} does not declare inline field {name}",
            descriptor.name
        ))
    })
}

/// Rejects any field not declared on the type and any value that does
/// not match the declared kind. Creation audit fields are reserved and
/// therefore always rejected.
fn validate_payload(
    descriptor: &TypeDescriptor,
    payload: &WritePayload,
) -> Result<(), EngineError> {
    for (name, value) in &payload.properties {
        if name == "label" {
            if !value.is_null() && !value.is_string() {
                return Err(EngineError::validation("label must be a string"));
            }
            continue;
        }
        let Some(def) = descriptor.properties.get(name) else {
            return Err(EngineError::validation(format!(
                "{} does not declare property {name}",
                descriptor.name
            )));
        };
        validate_value(name, def.kind, value)?;
    }
    for (name, refs) in &payload.relations {
        let rel = relation_of(descriptor, name)?;
        for reference in refs {
            for (prop_name, value) in &reference.props {
                let Some(kind) = rel.props.get(prop_name) else {
                    return Err(EngineError::validation(format!(
                        "relation {name} does not declare property {prop_name}"
                    )));
                };
                validate_value(prop_name, *kind, value)?;
            }
        }
    }
    for name in payload.inline.keys() {
        inline_relation_of(descriptor, name)?;
    }
    Ok(())
}

fn check_required_properties(
    descriptor: &TypeDescriptor,
    payload: &WritePayload,
) -> Result<(), EngineError> {
    for (name, def) in &descriptor.properties {
        if def.required && payload.properties.get(name).is_none_or(|v| v.is_null()) {
            return Err(EngineError::validation(format!(
                "{} requires property {name}",
                descriptor.name
            )));
        }
    }
    Ok(())
}

fn check_relation_floors(
    descriptor: &TypeDescriptor,
    payload: &WritePayload,
) -> Result<(), EngineError> {
    for (name, rel) in &descriptor.relations {
        let provided = payload.relations.get(name).map_or(0, Vec::len);
        if provided < rel.cardinality.floor() {
            return Err(EngineError::cardinality(format!(
                "relation {name} requires at least {} target(s)",
                rel.cardinality.floor()
            )));
        }
    }
    Ok(())
}

fn validate_value(
    name: &str,
    kind: PropertyKind,
    value: &serde_json::Value,
) -> Result<(), EngineError> {
    if value.is_null() {
        return Ok(());
    }
    let ok = match kind {
        PropertyKind::String => value.is_string(),
        PropertyKind::Integer => value.is_i64() || value.is_u64(),
        PropertyKind::Float => value.is_number(),
        PropertyKind::Boolean => value.is_boolean(),
        PropertyKind::Email => value.as_str().is_some_and(|s| s.contains('@')),
        PropertyKind::Date => value
            .as_str()
            .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        PropertyKind::DateTime => value
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
    };
    if ok {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "property {name} does not match declared kind {kind:?}"
        )))
    }
}

/// Merges validated payload properties over the existing bag, dropping
/// entries set to null. The label lives in its own column, not here.
fn property_bag(
    descriptor: &TypeDescriptor,
    payload: &WritePayload,
    existing: Option<&serde_json::Value>,
) -> serde_json::Value {
    let mut map = match existing.and_then(|v| v.as_object()) {
        Some(obj) => obj.clone(),
        None => serde_json::Map::new(),
    };
    for (name, value) in &payload.properties {
        if name == "label" || !descriptor.properties.contains_key(name) {
            continue;
        }
        if value.is_null() {
            map.remove(name);
        } else {
            map.insert(name.clone(), value.clone());
        }
    }
    serde_json::Value::Object(map)
}
