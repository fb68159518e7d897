//! Topology registry: durable list of commissioned leaves

use async_trait::async_trait;
use leafmesh_common::{
    now_epoch_secs, Database, Error, LeafRouter, LeafStatus, NodeId, Result,
};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

#[async_trait]
pub trait TopologyRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<LeafRouter>>;

    async fn get(&self, node_id: NodeId) -> Result<Option<LeafRouter>>;

    async fn get_by_address(&self, address: &str) -> Result<Option<LeafRouter>>;

    /// Insert, or update in place when `address` is already registered. The
    /// stored node id and creation time of an existing entry win.
    async fn upsert(&self, leaf: LeafRouter) -> Result<LeafRouter>;

    /// Put back a previously stored entry verbatim
    async fn restore(&self, leaf: &LeafRouter) -> Result<()>;

    async fn delete_by_address(&self, address: &str) -> Result<bool>;

    /// Move a leaf to a new address, keeping its identity
    async fn relocate(&self, node_id: NodeId, new_address: &str) -> Result<LeafRouter>;

    /// Cache the outcome of the latest health refresh
    async fn update_health(
        &self,
        node_id: NodeId,
        status: LeafStatus,
        version: Option<&str>,
    ) -> Result<()>;
}

/// `TopologyRegistry` in the shared SQLite database
#[derive(Clone)]
pub struct SqliteTopologyRegistry {
    db: Database,
}

const LEAF_COLUMNS: &str = "node_id, address, api_token, status, version, created_at, updated_at";

fn row_to_leaf(row: &rusqlite::Row) -> rusqlite::Result<LeafRouter> {
    let node_id: String = row.get(0)?;
    let node_id = node_id.parse::<NodeId>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(LeafRouter {
        node_id,
        address: row.get(1)?,
        api_token: row.get(2)?,
        status: row.get::<_, String>(3)?.parse().unwrap_or_default(),
        version: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl SqliteTopologyRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query_one(&self, clause: &str, key: &str) -> Result<Option<LeafRouter>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let leaf = conn
            .query_row(
                &format!("SELECT {} FROM leaf_routers WHERE {} = ?1", LEAF_COLUMNS, clause),
                params![key],
                row_to_leaf,
            )
            .optional()?;
        Ok(leaf)
    }
}

#[async_trait]
impl TopologyRegistry for SqliteTopologyRegistry {
    async fn list(&self) -> Result<Vec<LeafRouter>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM leaf_routers ORDER BY created_at, address",
            LEAF_COLUMNS
        ))?;
        let leaves = stmt
            .query_map([], row_to_leaf)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(leaves)
    }

    async fn get(&self, node_id: NodeId) -> Result<Option<LeafRouter>> {
        self.query_one("node_id", &node_id.to_string())
    }

    async fn get_by_address(&self, address: &str) -> Result<Option<LeafRouter>> {
        self.query_one("address", address)
    }

    async fn upsert(&self, leaf: LeafRouter) -> Result<LeafRouter> {
        let now = now_epoch_secs();
        {
            let conn = self.db.connection();
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO leaf_routers (node_id, address, api_token, status, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(address) DO UPDATE SET api_token = excluded.api_token, updated_at = excluded.updated_at",
                params![
                    leaf.node_id.to_string(),
                    leaf.address,
                    leaf.api_token,
                    leaf.status.as_key(),
                    leaf.version,
                    now
                ],
            )?;
        }

        debug!("Upserted leaf {}", leaf.address);
        self.query_one("address", &leaf.address)?
            .ok_or_else(|| Error::Internal(format!("leaf {} vanished after upsert", leaf.address)))
    }

    async fn restore(&self, leaf: &LeafRouter) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO leaf_routers (node_id, address, api_token, status, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                leaf.node_id.to_string(),
                leaf.address,
                leaf.api_token,
                leaf.status.as_key(),
                leaf.version,
                leaf.created_at,
                leaf.updated_at
            ],
        )?;
        Ok(())
    }

    async fn delete_by_address(&self, address: &str) -> Result<bool> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let removed = conn.execute("DELETE FROM leaf_routers WHERE address = ?1", params![address])?;
        if removed > 0 {
            info!("Removed leaf {} from registry", address);
        }
        Ok(removed > 0)
    }

    async fn relocate(&self, node_id: NodeId, new_address: &str) -> Result<LeafRouter> {
        if let Some(other) = self.query_one("address", new_address)? {
            if other.node_id != node_id {
                return Err(Error::AlreadyExists {
                    kind: "leaf".to_string(),
                    id: new_address.to_string(),
                });
            }
        }

        let updated = {
            let conn = self.db.connection();
            let conn = conn.lock();
            conn.execute(
                "UPDATE leaf_routers SET address = ?1, updated_at = ?2 WHERE node_id = ?3",
                params![new_address, now_epoch_secs(), node_id.to_string()],
            )?
        };
        if updated == 0 {
            return Err(Error::not_found("leaf", node_id.to_string()));
        }

        info!("Relocated leaf {} to {}", node_id, new_address);
        self.query_one("node_id", &node_id.to_string())?
            .ok_or_else(|| Error::not_found("leaf", node_id.to_string()))
    }

    async fn update_health(
        &self,
        node_id: NodeId,
        status: LeafStatus,
        version: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        // A failed probe keeps the last known version for display
        conn.execute(
            "UPDATE leaf_routers SET status = ?1, version = COALESCE(?2, version) WHERE node_id = ?3",
            params![status.as_key(), version, node_id.to_string()],
        )?;
        Ok(())
    }
}
