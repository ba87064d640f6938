use rusqlite::Connection;

use crate::errors::EngineError;

pub fn ensure_schema(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS nodes (
            uid           TEXT PRIMARY KEY,
            real_type     TEXT NOT NULL,
            label         TEXT NOT NULL,
            is_deleted    INTEGER NOT NULL DEFAULT 0,
            created_by    TEXT NOT NULL,
            created_when  TEXT NOT NULL,
            modified_by   TEXT NOT NULL,
            modified_when TEXT NOT NULL,
            props         TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS edges (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            from_uid     TEXT NOT NULL,
            to_uid       TEXT NOT NULL,
            name         TEXT NOT NULL,
            reverse_name TEXT NOT NULL,
            inline       INTEGER NOT NULL DEFAULT 0,
            props        TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tombstones (
            uid          TEXT NOT NULL,
            entity_type  TEXT NOT NULL,
            deleted_when TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_real_type ON nodes(real_type, label);
        CREATE INDEX IF NOT EXISTS idx_nodes_modified ON nodes(modified_when);
        CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_uid);
        CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_uid);
        CREATE INDEX IF NOT EXISTS idx_edges_name ON edges(name);
        CREATE INDEX IF NOT EXISTS idx_tombstones_type ON tombstones(entity_type, deleted_when);
        "#,
    )
    .map_err(|e| EngineError::storage(e.to_string()))?;
    Ok(())
}
