use std::path::Path;

use tracing::info;
use turso::{Builder, Connection, Database};

use crate::error::WardenError;

/// Durable `host -> block_until` ledger backing the auth-failure state
/// machine. Rows survive proxy restarts; the supervisor deletes the file on
/// final cleanup.
///
/// Writers follow a remove-then-put discipline to avoid accumulating rows,
/// but readers tolerate duplicates by taking the latest `block_until`.
pub struct BlockStore {
    db: Database,
}

impl BlockStore {
    /// Open (or create) the block store and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self, WardenError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| WardenError::Database(format!("Failed to create DB directory: {e}")))?;
        }

        let path_str = path.to_str().unwrap_or("proxy.db");
        let db = Builder::new_local(path_str)
            .build()
            .await
            .map_err(|e| WardenError::Database(format!("Failed to open database: {e}")))?;

        let store = Self { db };
        let conn = store.conn().await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_errors (host TEXT NOT NULL, block_until INTEGER NOT NULL)",
            (),
        )
        .await
        .map_err(|e| WardenError::Database(format!("Failed to create auth_errors table: {e}")))?;

        info!("Block store initialized at {}", path_str);
        Ok(store)
    }

    /// Connection with the busy timeout applied. Connections are cheap and
    /// handed out per operation so request handlers never share one.
    async fn conn(&self) -> Result<Connection, WardenError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| WardenError::Database(format!("Failed to connect: {e}")))?;
        conn.execute("PRAGMA busy_timeout = 10000", ())
            .await
            .map_err(|e| WardenError::Database(format!("Failed to set busy timeout: {e}")))?;
        Ok(conn)
    }

    /// Latest `block_until` recorded for a host, if any.
    pub async fn get(&self, host: &str) -> Result<Option<i64>, WardenError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                "SELECT block_until FROM auth_errors WHERE host = ? ORDER BY block_until DESC LIMIT 1",
                [host],
            )
            .await
            .map_err(|e| WardenError::Database(format!("Failed to read block record: {e}")))?;
        let block_until = rows
            .next()
            .await
            .map_err(|e| WardenError::Database(format!("Failed to read block row: {e}")))?
            .and_then(|row| row.get::<i64>(0).ok());
        Ok(block_until)
    }

    /// Insert a block record. Callers remove first to avoid duplicates.
    pub async fn put(&self, host: &str, block_until: i64) -> Result<(), WardenError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO auth_errors (host, block_until) VALUES (?, ?)",
            (host, block_until),
        )
        .await
        .map_err(|e| WardenError::Database(format!("Failed to insert block record: {e}")))?;
        Ok(())
    }

    /// Delete every record for a host.
    pub async fn remove(&self, host: &str) -> Result<(), WardenError> {
        let conn = self.conn().await?;
        conn.execute("DELETE FROM auth_errors WHERE host = ?", [host])
            .await
            .map_err(|e| WardenError::Database(format!("Failed to remove block records: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, BlockStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(&dir.path().join("blocks.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_remove_round_trip() {
        let (_dir, store) = temp_store().await;
        assert_eq!(store.get("1.2.3.4").await.unwrap(), None);

        store.put("1.2.3.4", 1_700_000_000).await.unwrap();
        assert_eq!(store.get("1.2.3.4").await.unwrap(), Some(1_700_000_000));

        store.remove("1.2.3.4").await.unwrap();
        assert_eq!(store.get("1.2.3.4").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_rows_resolve_to_latest() {
        let (_dir, store) = temp_store().await;
        store.put("10.0.0.9", 100).await.unwrap();
        store.put("10.0.0.9", 300).await.unwrap();
        store.put("10.0.0.9", 200).await.unwrap();
        assert_eq!(store.get("10.0.0.9").await.unwrap(), Some(300));
    }

    #[tokio::test]
    async fn test_remove_is_per_host() {
        let (_dir, store) = temp_store().await;
        store.put("a", 1).await.unwrap();
        store.put("b", 2).await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(2));
    }
}
