use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::{cache::EdgeCache, errors::EngineError, schema::ensure_schema};

/// Reserved edge name linking duplicate entities into a merge group.
pub const MERGE_EDGE_NAME: &str = "SAME_AS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredNode {
    pub uid: String,
    pub real_type: String,
    pub label: String,
    pub is_deleted: bool,
    pub created_by: String,
    pub created_when: DateTime<Utc>,
    pub modified_by: String,
    pub modified_when: DateTime<Utc>,
    pub props: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEdge {
    pub id: i64,
    pub from_uid: String,
    pub to_uid: String,
    pub name: String,
    pub reverse_name: String,
    pub inline: bool,
    pub props: serde_json::Value,
}

impl StoredEdge {
    pub fn is_merge(&self) -> bool {
        self.name == MERGE_EDGE_NAME
    }

    /// The endpoint opposite to `uid`. Direction is decided by comparing
    /// the recorded start uid, never by node type.
    pub fn other_endpoint<'a>(&'a self, uid: &str) -> &'a str {
        if self.from_uid == uid {
            &self.to_uid
        } else {
            &self.from_uid
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tombstone {
    pub uid: String,
    pub entity_type: String,
    pub deleted_when: DateTime<Utc>,
}

pub struct GraphStore {
    conn: Connection,
    edge_cache: EdgeCache,
}

impl GraphStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let conn = Connection::open(path).map_err(|e| EngineError::storage(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn =
            Connection::open_in_memory().map_err(|e| EngineError::storage(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Runs `f` inside a single SQLite transaction. The transaction is
    /// committed only when `f` returns `Ok`; any error rolls back every
    /// write made inside it.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&GraphStore) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let txn = self
            .conn
            .unchecked_transaction()
            .map_err(|e| EngineError::storage(e.to_string()))?;
        match f(self) {
            Ok(value) => {
                txn.commit()
                    .map_err(|e| EngineError::storage(e.to_string()))?;
                Ok(value)
            }
            Err(err) => {
                // Dropping the transaction rolls it back; a cached edge list
                // may reflect the aborted writes, so flush it.
                drop(txn);
                self.edge_cache.clear();
                Err(err)
            }
        }
    }

    pub fn insert_node(&self, node: &StoredNode) -> Result<(), EngineError> {
        let props = serde_json::to_string(&node.props)
            .map_err(|e| EngineError::storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO nodes(uid, real_type, label, is_deleted, created_by, created_when, \
                 modified_by, modified_when, props) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    node.uid,
                    node.real_type,
                    node.label,
                    node.is_deleted as i64,
                    node.created_by,
                    node.created_when.to_rfc3339(),
                    node.modified_by,
                    node.modified_when.to_rfc3339(),
                    props,
                ],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        Ok(())
    }

    pub fn get_node(&self, uid: &str) -> Result<StoredNode, EngineError> {
        self.try_get_node(uid)?
            .ok_or_else(|| EngineError::not_found(format!("node {uid}")))
    }

    pub fn try_get_node(&self, uid: &str) -> Result<Option<StoredNode>, EngineError> {
        self.conn
            .query_row(
                "SELECT uid, real_type, label, is_deleted, created_by, created_when, \
                 modified_by, modified_when, props FROM nodes WHERE uid=?1",
                params![uid],
                row_to_node,
            )
            .optional()
            .map_err(|e| EngineError::storage(e.to_string()))
    }

    pub fn node_exists(&self, uid: &str) -> Result<bool, EngineError> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM nodes WHERE uid=?1", params![uid], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| EngineError::storage(e.to_string()))?;
        Ok(found.is_some())
    }

    /// Rewrites label and scalar properties, refreshing the modified stamp.
    pub fn update_node(
        &self,
        uid: &str,
        label: &str,
        props: &serde_json::Value,
        modified_by: &str,
        modified_when: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let props =
            serde_json::to_string(props).map_err(|e| EngineError::storage(e.to_string()))?;
        let affected = self
            .conn
            .execute(
                "UPDATE nodes SET label=?1, props=?2, modified_by=?3, modified_when=?4 WHERE uid=?5",
                params![label, props, modified_by, modified_when.to_rfc3339(), uid],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("node {uid}")));
        }
        Ok(())
    }

    pub fn set_deleted(
        &self,
        uid: &str,
        deleted: bool,
        modified_when: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let affected = self
            .conn
            .execute(
                "UPDATE nodes SET is_deleted=?1, modified_when=?2 WHERE uid=?3",
                params![deleted as i64, modified_when.to_rfc3339(), uid],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("node {uid}")));
        }
        Ok(())
    }

    /// Removes the node and every edge touching it.
    pub fn delete_node(&self, uid: &str) -> Result<(), EngineError> {
        let affected = self
            .conn
            .execute("DELETE FROM nodes WHERE uid=?1", params![uid])
            .map_err(|e| EngineError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("node {uid}")));
        }
        self.conn
            .execute(
                "DELETE FROM edges WHERE from_uid=?1 OR to_uid=?1",
                params![uid],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        self.edge_cache.clear();
        Ok(())
    }

    pub fn insert_edge(
        &self,
        from_uid: &str,
        to_uid: &str,
        name: &str,
        reverse_name: &str,
        inline: bool,
        props: &serde_json::Value,
    ) -> Result<i64, EngineError> {
        if !self.node_exists(from_uid)? || !self.node_exists(to_uid)? {
            return Err(EngineError::not_found(
                "edge endpoints must reference existing nodes",
            ));
        }
        let props =
            serde_json::to_string(props).map_err(|e| EngineError::storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO edges(from_uid, to_uid, name, reverse_name, inline, props) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![from_uid, to_uid, name, reverse_name, inline as i64, props],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        self.edge_cache.clear();
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_edge_props(
        &self,
        edge_id: i64,
        props: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let props =
            serde_json::to_string(props).map_err(|e| EngineError::storage(e.to_string()))?;
        let affected = self
            .conn
            .execute(
                "UPDATE edges SET props=?1 WHERE id=?2",
                params![props, edge_id],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("edge {edge_id}")));
        }
        self.edge_cache.clear();
        Ok(())
    }

    /// Reattaches an existing edge to a new target, keeping its identity.
    /// Used for exactly-one reconnects and inline replacement, where the
    /// edge must never be fully absent mid-transaction.
    pub fn repoint_edge(
        &self,
        edge_id: i64,
        new_to_uid: &str,
        props: &serde_json::Value,
    ) -> Result<(), EngineError> {
        if !self.node_exists(new_to_uid)? {
            return Err(EngineError::not_found(format!("node {new_to_uid}")));
        }
        let props =
            serde_json::to_string(props).map_err(|e| EngineError::storage(e.to_string()))?;
        let affected = self
            .conn
            .execute(
                "UPDATE edges SET to_uid=?1, props=?2 WHERE id=?3",
                params![new_to_uid, props, edge_id],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("edge {edge_id}")));
        }
        self.edge_cache.clear();
        Ok(())
    }

    pub fn delete_edge(&self, edge_id: i64) -> Result<(), EngineError> {
        let affected = self
            .conn
            .execute("DELETE FROM edges WHERE id=?1", params![edge_id])
            .map_err(|e| EngineError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("edge {edge_id}")));
        }
        self.edge_cache.clear();
        Ok(())
    }

    /// All edges with `uid` as either endpoint, cached until the next write.
    pub fn edges_touching(&self, uid: &str) -> Result<Vec<StoredEdge>, EngineError> {
        if let Some(cached) = self.edge_cache.get(uid) {
            return Ok(cached);
        }
        let edges = self.collect_edges(
            "SELECT id, from_uid, to_uid, name, reverse_name, inline, props \
             FROM edges WHERE from_uid=?1 OR to_uid=?1 ORDER BY id",
            params![uid],
        )?;
        self.edge_cache.insert(uid, edges.clone());
        Ok(edges)
    }

    pub fn edges_out_named(&self, uid: &str, name: &str) -> Result<Vec<StoredEdge>, EngineError> {
        self.collect_edges(
            "SELECT id, from_uid, to_uid, name, reverse_name, inline, props \
             FROM edges WHERE from_uid=?1 AND name=?2 ORDER BY id",
            params![uid, name],
        )
    }

    pub fn edges_in(&self, uid: &str) -> Result<Vec<StoredEdge>, EngineError> {
        self.collect_edges(
            "SELECT id, from_uid, to_uid, name, reverse_name, inline, props \
             FROM edges WHERE to_uid=?1 ORDER BY id",
            params![uid],
        )
    }

    /// True when some other node references `uid` through a non-merge edge.
    pub fn has_dependents(&self, uid: &str) -> Result<bool, EngineError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM edges WHERE to_uid=?1 AND name<>?2 LIMIT 1",
                params![uid, MERGE_EDGE_NAME],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngineError::storage(e.to_string()))?;
        Ok(found.is_some())
    }

    /// All nodes whose real_type is in `types`, ordered by (real_type, label).
    pub fn nodes_of_types(&self, types: &[String]) -> Result<Vec<StoredNode>, EngineError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT uid, real_type, label, is_deleted, created_by, created_when, \
             modified_by, modified_when, props FROM nodes WHERE real_type IN ({}) \
             ORDER BY real_type, label, uid",
            placeholders(types.len())
        );
        self.collect_nodes(&sql, types)
    }

    pub fn nodes_modified_since(
        &self,
        types: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredNode>, EngineError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT uid, real_type, label, is_deleted, created_by, created_when, \
             modified_by, modified_when, props FROM nodes WHERE real_type IN ({}) \
             AND modified_when > ?{} ORDER BY real_type, label, uid",
            placeholders(types.len()),
            types.len() + 1
        );
        let mut args: Vec<String> = types.to_vec();
        args.push(cutoff.to_rfc3339());
        self.collect_nodes(&sql, &args)
    }

    pub fn insert_tombstone(&self, tombstone: &Tombstone) -> Result<(), EngineError> {
        self.conn
            .execute(
                "INSERT INTO tombstones(uid, entity_type, deleted_when) VALUES(?1, ?2, ?3)",
                params![
                    tombstone.uid,
                    tombstone.entity_type,
                    tombstone.deleted_when.to_rfc3339(),
                ],
            )
            .map_err(|e| EngineError::storage(e.to_string()))?;
        Ok(())
    }

    pub fn tombstones_since(
        &self,
        types: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Tombstone>, EngineError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT uid, entity_type, deleted_when FROM tombstones \
             WHERE entity_type IN ({}) AND deleted_when > ?{} ORDER BY deleted_when, uid",
            placeholders(types.len()),
            types.len() + 1
        );
        let mut args: Vec<String> = types.to_vec();
        args.push(cutoff.to_rfc3339());
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| EngineError::storage(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let when: String = row.get(2)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, when))
            })
            .map_err(|e| EngineError::storage(e.to_string()))?;
        let mut tombstones = Vec::new();
        for row in rows {
            let (uid, entity_type, when) =
                row.map_err(|e| EngineError::storage(e.to_string()))?;
            tombstones.push(Tombstone {
                uid,
                entity_type,
                deleted_when: parse_timestamp(&when)?,
            });
        }
        Ok(tombstones)
    }
}

impl GraphStore {
    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            edge_cache: EdgeCache::new(),
        }
    }

    fn collect_edges(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<StoredEdge>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| EngineError::storage(e.to_string()))?;
        let rows = stmt
            .query_map(args, row_to_edge)
            .map_err(|e| EngineError::storage(e.to_string()))?;
        let mut edges = Vec::new();
        for edge in rows {
            edges.push(edge.map_err(|e| EngineError::storage(e.to_string()))?);
        }
        Ok(edges)
    }

    fn collect_nodes(&self, sql: &str, args: &[String]) -> Result<Vec<StoredNode>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| EngineError::storage(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), row_to_node)
            .map_err(|e| EngineError::storage(e.to_string()))?;
        let mut nodes = Vec::new();
        for node in rows {
            nodes.push(node.map_err(|e| EngineError::storage(e.to_string()))?);
        }
        Ok(nodes)
    }
}

fn placeholders(count: usize) -> String {
    let mut out = String::new();
    for i in 1..=count {
        if i > 1 {
            out.push_str(", ");
        }
        out.push('?');
        out.push_str(&i.to_string());
    }
    out
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| EngineError::storage(format!("bad timestamp {raw:?}: {e}")))
}

fn row_to_node(row: &rusqlite::Row<'_>) -> Result<StoredNode, rusqlite::Error> {
    let created_when: String = row.get(5)?;
    let modified_when: String = row.get(7)?;
    let props: String = row.get(8)?;
    let props: serde_json::Value = serde_json::from_str(&props).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            props.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;
    Ok(StoredNode {
        uid: row.get(0)?,
        real_type: row.get(1)?,
        label: row.get(2)?,
        is_deleted: row.get::<_, i64>(3)? != 0,
        created_by: row.get(4)?,
        created_when: timestamp_column(&created_when)?,
        modified_by: row.get(6)?,
        modified_when: timestamp_column(&modified_when)?,
        props,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> Result<StoredEdge, rusqlite::Error> {
    let props: String = row.get(6)?;
    let props: serde_json::Value = serde_json::from_str(&props).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            props.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;
    Ok(StoredEdge {
        id: row.get(0)?,
        from_uid: row.get(1)?,
        to_uid: row.get(2)?,
        name: row.get(3)?,
        reverse_name: row.get(4)?,
        inline: row.get::<_, i64>(5)? != 0,
        props,
    })
}

fn timestamp_column(raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                raw.len(),
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
