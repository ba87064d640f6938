use chrono::Utc;
use log::info;
use serde::Serialize;

use crate::{
    errors::EngineError,
    reconcile::Reconciler,
    registry::TypeRegistry,
    store::{GraphStore, MERGE_EDGE_NAME, StoredNode, Tombstone},
};

/// Outcome of a delete request. `Pending` means the entity was only
/// soft-deleted because other entities still reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteOutcome {
    Pending,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreOutcome {
    Restored,
    AlreadyLive,
}

/// Decides soft- versus hard-delete from dependent references, records
/// tombstones for sync clients, and handles restore.
pub struct LifecycleManager<'a> {
    registry: &'a TypeRegistry,
    store: &'a GraphStore,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(registry: &'a TypeRegistry, store: &'a GraphStore) -> Self {
        Self { registry, store }
    }

    /// Soft-deletes when any other entity still references the node
    /// through a non-merge inbound edge; otherwise hard-deletes it along
    /// with its inline-owned descendants and writes a tombstone.
    pub fn delete(&self, type_name: &str, uid: &str) -> Result<DeleteOutcome, EngineError> {
        self.store.with_transaction(|store| {
            let node = self.node_of_type(type_name, uid)?;
            if store.has_dependents(uid)? {
                if !node.is_deleted {
                    store.set_deleted(uid, true, Utc::now())?;
                }
                info!("delete {type_name} {uid}: pending removal of dependent references");
                return Ok(DeleteOutcome::Pending);
            }
            let reconciler = Reconciler::new(self.registry, store);
            reconciler.delete_owned_descendants(uid)?;
            store.insert_tombstone(&Tombstone {
                uid: uid.to_string(),
                entity_type: node.real_type.clone(),
                deleted_when: Utc::now(),
            })?;
            store.delete_node(uid)?;
            info!("deleted {type_name} {uid}");
            Ok(DeleteOutcome::Deleted)
        })
    }

    /// Clears the soft-delete flag; idempotent when already live.
    pub fn restore(&self, type_name: &str, uid: &str) -> Result<RestoreOutcome, EngineError> {
        self.store.with_transaction(|store| {
            let node = self.node_of_type(type_name, uid)?;
            if !node.is_deleted {
                return Ok(RestoreOutcome::AlreadyLive);
            }
            store.set_deleted(uid, false, Utc::now())?;
            info!("restored {type_name} {uid}");
            Ok(RestoreOutcome::Restored)
        })
    }

    /// Links two entities of the same type family as duplicates of one
    /// real-world referent. Idempotent; reversible via `unmerge`.
    pub fn merge(&self, type_name: &str, uid: &str, other_uid: &str) -> Result<(), EngineError> {
        self.store.with_transaction(|store| {
            if uid == other_uid {
                return Err(EngineError::validation("cannot merge an entity with itself"));
            }
            self.node_of_type(type_name, uid)?;
            self.node_of_type(type_name, other_uid)?;
            for edge in store.edges_touching(uid)? {
                if edge.is_merge() && edge.other_endpoint(uid) == other_uid {
                    return Ok(());
                }
            }
            store.insert_edge(
                uid,
                other_uid,
                MERGE_EDGE_NAME,
                MERGE_EDGE_NAME,
                false,
                &serde_json::Value::Object(serde_json::Map::new()),
            )?;
            info!("merged {type_name} {uid} with {other_uid}");
            Ok(())
        })
    }

    /// Removes any same-as edge directly linking the two entities.
    pub fn unmerge(&self, type_name: &str, uid: &str, other_uid: &str) -> Result<(), EngineError> {
        self.store.with_transaction(|store| {
            self.node_of_type(type_name, uid)?;
            for edge in store.edges_touching(uid)? {
                if edge.is_merge() && edge.other_endpoint(uid) == other_uid {
                    store.delete_edge(edge.id)?;
                }
            }
            info!("unmerged {type_name} {uid} from {other_uid}");
            Ok(())
        })
    }

    fn node_of_type(&self, type_name: &str, uid: &str) -> Result<StoredNode, EngineError> {
        let descriptor = self.registry.resolve(type_name)?;
        match self.store.try_get_node(uid)? {
            Some(node) if descriptor.subtypes.contains(&node.real_type) => Ok(node),
            _ => Err(EngineError::not_found(format!(
                "<{type_name} uid={uid}> not found"
            ))),
        }
    }
}
