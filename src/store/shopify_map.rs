//! SKU to storefront product cache.
//!
//! Entries go stale after a TTL; the storefront-push step refreshes them
//! from the live storefront on a miss.

use crate::errors::StoreError;
use crate::store::{now_ms, Db};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopifyMapping {
    pub sku: String,
    pub product_id: String,
    pub handle: Option<String>,
    pub synced_at: i64,
}

pub struct ShopifyMapStore {
    conn: Arc<Mutex<Connection>>,
}

impl ShopifyMapStore {
    pub fn new(db: Db) -> Self {
        Self { conn: db.handle() }
    }

    /// Entry younger than `ttl_ms`, or None (absent or stale).
    pub fn fresh(&self, sku: &str, ttl_ms: i64) -> Result<Option<ShopifyMapping>, StoreError> {
        let cutoff = now_ms() - ttl_ms;
        let conn = self.conn.lock();
        let mapping = conn
            .query_row(
                "SELECT sku, product_id, handle, synced_at FROM shopify_map
                 WHERE sku = ?1 AND synced_at >= ?2",
                params![sku, cutoff],
                map_row,
            )
            .optional()?;
        Ok(mapping)
    }

    pub fn upsert(
        &self,
        sku: &str,
        product_id: &str,
        handle: Option<&str>,
    ) -> Result<ShopifyMapping, StoreError> {
        let now = now_ms();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO shopify_map (sku, product_id, handle, synced_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(sku) DO UPDATE SET
                product_id = excluded.product_id,
                handle = excluded.handle,
                synced_at = excluded.synced_at",
            params![sku, product_id, handle, now],
        )?;
        Ok(ShopifyMapping {
            sku: sku.to_string(),
            product_id: product_id.to_string(),
            handle: handle.map(str::to_string),
            synced_at: now,
        })
    }

    /// Explicit refresh: drop the entry so the next lookup hits the
    /// storefront.
    pub fn invalidate(&self, sku: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM shopify_map WHERE sku = ?1", params![sku])?;
        Ok(())
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShopifyMapping> {
    Ok(ShopifyMapping {
        sku: row.get(0)?,
        product_id: row.get(1)?,
        handle: row.get(2)?,
        synced_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{migrations, Db};

    fn store() -> ShopifyMapStore {
        let db = Db::in_memory().unwrap();
        db.migrate(&migrations::embedded()).unwrap();
        ShopifyMapStore::new(db)
    }

    #[test]
    fn upsert_and_fresh() {
        let s = store();
        assert!(s.fresh("SKU-1", 60_000).unwrap().is_none());

        s.upsert("SKU-1", "gid://shopify/Product/42", Some("bottle-42"))
            .unwrap();
        let hit = s.fresh("SKU-1", 60_000).unwrap().unwrap();
        assert_eq!(hit.product_id, "gid://shopify/Product/42");
        assert_eq!(hit.handle.as_deref(), Some("bottle-42"));

        // Zero TTL means everything is stale.
        assert!(s.fresh("SKU-1", -1).unwrap().is_none());
    }

    #[test]
    fn upsert_replaces() {
        let s = store();
        s.upsert("SKU-1", "gid://shopify/Product/42", None).unwrap();
        s.upsert("SKU-1", "gid://shopify/Product/43", Some("h"))
            .unwrap();
        let hit = s.fresh("SKU-1", 60_000).unwrap().unwrap();
        assert_eq!(hit.product_id, "gid://shopify/Product/43");
    }

    #[test]
    fn invalidate_removes() {
        let s = store();
        s.upsert("SKU-1", "gid://shopify/Product/42", None).unwrap();
        s.invalidate("SKU-1").unwrap();
        assert!(s.fresh("SKU-1", 60_000).unwrap().is_none());
    }
}
