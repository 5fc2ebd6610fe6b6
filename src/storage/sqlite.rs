use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::StorageWriter;
use crate::error::AgentResult;
use crate::models::metadata::MetadataSnapshot;

/// One captured request waiting for (or past) synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub created_at: String,
    pub client_ip: String,
    pub payload: serde_json::Value,
}

/// Local store for request metadata recorded in lite mode or as a fallback
/// when detection is unavailable.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`. `":memory:"` is accepted.
    pub fn open(path: &str) -> AgentResult<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = Connection::open(path)?;
        if path != ":memory:" {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS request_metadata (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at    TEXT NOT NULL,
                client_ip     TEXT NOT NULL,
                payload_json  TEXT NOT NULL,
                synchronized  INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_request_metadata_pending
                ON request_metadata (synchronized, id);
            ",
        )?;

        info!(path = path, "metadata storage opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, snapshot: &MetadataSnapshot) -> AgentResult<i64> {
        let payload = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO request_metadata (created_at, client_ip, payload_json)
             VALUES (?1, ?2, ?3)",
            params![snapshot.request_created_at, snapshot.client_ip(), payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Oldest unsynchronized records first.
    pub fn pending(&self, limit: usize) -> AgentResult<Vec<StoredRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, client_ip, payload_json FROM request_metadata
             WHERE synchronized = 0 ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, created_at, client_ip, payload_json)| -> AgentResult<StoredRecord> {
                Ok(StoredRecord {
                    id,
                    created_at,
                    client_ip,
                    payload: serde_json::from_str(&payload_json)?,
                })
            })
            .collect()
    }

    pub fn mark_synchronized(&self, ids: &[i64]) -> AgentResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE request_metadata SET synchronized = 1 WHERE id IN ({})",
                placeholders
            ),
            params_from_iter(ids.iter()),
        )?;
        Ok(updated)
    }

    pub fn purge_synchronized(&self) -> AgentResult<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM request_metadata WHERE synchronized = 1", [])?;
        if removed > 0 {
            debug!(removed = removed, "purged synchronized metadata");
        }
        Ok(removed)
    }

    pub fn pending_count(&self) -> AgentResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM request_metadata WHERE synchronized = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[async_trait]
impl StorageWriter for SqliteStorage {
    async fn persist(&self, snapshot: &MetadataSnapshot) -> AgentResult<()> {
        let id = self.insert(snapshot)?;
        debug!(id = id, ip = snapshot.client_ip(), "metadata persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::fixtures;

    #[test]
    fn insert_and_read_back_pending() {
        let store = SqliteStorage::open(":memory:").unwrap();
        let first = store.insert(&fixtures::snapshot("203.0.113.1")).unwrap();
        let second = store.insert(&fixtures::snapshot("203.0.113.2")).unwrap();
        assert!(second > first);

        let pending = store.pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].client_ip, "203.0.113.1");
        assert_eq!(
            pending[1].payload["payload"]["data"]["client_information"]["ip"],
            "203.0.113.2"
        );

        assert_eq!(store.pending(1).unwrap().len(), 1);
    }

    #[test]
    fn synchronized_rows_leave_pending_and_are_purged() {
        let store = SqliteStorage::open(":memory:").unwrap();
        let ids: Vec<i64> = (0..3)
            .map(|i| store.insert(&fixtures::snapshot(&format!("10.0.0.{}", i))).unwrap())
            .collect();

        assert_eq!(store.mark_synchronized(&ids[..2]).unwrap(), 2);
        assert_eq!(store.mark_synchronized(&[]).unwrap(), 0);
        assert_eq!(store.pending_count().unwrap(), 1);

        assert_eq!(store.purge_synchronized().unwrap(), 2);
        let pending = store.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[2]);
    }

    #[tokio::test]
    async fn persist_through_trait() {
        let store = SqliteStorage::open(":memory:").unwrap();
        store.persist(&fixtures::snapshot("198.51.100.4")).await.unwrap();
        assert_eq!(store.pending_count().unwrap(), 1);
    }
}
