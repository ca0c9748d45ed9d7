//! Numbered-migration runner.
//!
//! Schema changes ship as `NNN_name.sql` files applied in numeric order.
//! Each pending file runs in its own transaction together with the
//! version bump, so a failure aborts startup without partial application.
//! The persisted version lives in the `metadata` table.

use crate::errors::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const MIGRATION_VERSION_KEY: &str = "migration_version";

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub sql: String,
}

/// The migrations shipped with the binary, used when no migrations
/// directory exists on disk (container images).
pub fn embedded() -> Vec<Migration> {
    let files: [(u32, &str, &str); 5] = [
        (1, "init", include_str!("../../migrations/001_init.sql")),
        (
            2,
            "shopify_map",
            include_str!("../../migrations/002_shopify_map.sql"),
        ),
        (
            3,
            "background_templates",
            include_str!("../../migrations/003_background_templates.sql"),
        ),
        (
            4,
            "custom_prompts",
            include_str!("../../migrations/004_custom_prompts.sql"),
        ),
        (
            5,
            "legacy_statuses",
            include_str!("../../migrations/005_legacy_statuses.sql"),
        ),
    ];
    files
        .into_iter()
        .map(|(version, name, sql)| Migration {
            version,
            name: name.to_string(),
            sql: sql.to_string(),
        })
        .collect()
}

/// Load `NNN_name.sql` files from a directory. Non-SQL files are ignored;
/// a `.sql` file without a numeric prefix is an error, as is a duplicate
/// version.
pub fn load_dir(dir: &Path) -> Result<Vec<Migration>, StoreError> {
    let mut migrations = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let file_name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_string(),
            None => continue,
        };
        let (prefix, rest) = file_name
            .split_once('_')
            .unwrap_or((file_name.as_str(), ""));
        let version: u32 = prefix.parse().map_err(|_| {
            StoreError::Migration(format!(
                "migration file {:?} has no numeric prefix",
                path.file_name().unwrap_or_default()
            ))
        })?;
        let sql = std::fs::read_to_string(&path)?;
        migrations.push(Migration {
            version,
            name: rest.to_string(),
            sql,
        });
    }
    migrations.sort_by_key(|m| m.version);
    for pair in migrations.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(StoreError::Migration(format!(
                "duplicate migration version {}",
                pair[0].version
            )));
        }
    }
    Ok(migrations)
}

/// Apply every migration with a version greater than the persisted one.
/// Returns how many were applied.
pub fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    let mut current = current_version(conn)?;
    let mut applied = 0usize;

    let mut sorted: Vec<&Migration> = migrations.iter().collect();
    sorted.sort_by_key(|m| m.version);

    for migration in sorted {
        if migration.version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            StoreError::Migration(format!(
                "migration {} ({}) failed: {}",
                migration.version, migration.name, e
            ))
        })?;
        tx.execute(
            "INSERT INTO metadata (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![
                MIGRATION_VERSION_KEY,
                migration.version.to_string(),
                crate::store::now_ms()
            ],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, name = %migration.name, "Applied migration");
        current = migration.version;
        applied += 1;
    }

    Ok(applied)
}

pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![MIGRATION_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}
