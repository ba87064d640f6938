//! Graph projection and reconciliation engine for a typed research
//! database: entities and cardinality-constrained relations stored in
//! SQLite, projected into nested documents and reconciled back from
//! partial documents.

pub mod cache;
pub mod document;
pub mod errors;
pub mod lifecycle;
pub mod projection;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod store;
pub mod traverse;

pub use crate::document::{
    DeletedRef, Document, ListEntry, ListResult, NodeSummary, RelationTarget, SyncDelta,
};
pub use crate::errors::EngineError;
pub use crate::lifecycle::{DeleteOutcome, LifecycleManager, RestoreOutcome};
pub use crate::projection::ProjectionBuilder;
pub use crate::reconcile::{Created, InlinePayload, Reconciler, RelationRef, Updated, WritePayload};
pub use crate::registry::{
    Cardinality, PropertyKind, TypeRegistry, TypeRegistryBuilder, TypeSpec,
};
pub use crate::store::{GraphStore, MERGE_EDGE_NAME, StoredEdge, StoredNode, Tombstone};
