//! Durable persistence: a single embedded SQLite database shared by all
//! stores, opened in WAL mode behind a mutex-guarded connection.

pub mod job_store;
pub mod migrations;
pub mod prompts;
pub mod settings;
pub mod shopify_map;
pub mod templates;

pub use job_store::{JobFilter, JobStore, LeaseGuard};
pub use prompts::{CustomPrompt, PromptStore};
pub use settings::{
    AiCompositorChoice, Gravity, OutputFormat, SettingsStore, SharpSettings, WorkflowPreference,
};
pub use shopify_map::{ShopifyMapStore, ShopifyMapping};
pub use templates::{Template, TemplateAsset, TemplateStatus, TemplateStore};

use crate::errors::StoreError;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared database handle. Cheap to clone; all stores serialize on the
/// same connection mutex.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn handle(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Apply pending migrations; returns the number applied.
    pub fn migrate(&self, migrations: &[migrations::Migration]) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        migrations::apply(&conn, migrations)
    }
}

/// All persistent stores over one database.
pub struct Stores {
    pub jobs: JobStore,
    pub settings: SettingsStore,
    pub shopify_map: ShopifyMapStore,
    pub templates: TemplateStore,
    pub prompts: PromptStore,
}

impl Stores {
    pub fn new(db: &Db) -> Self {
        Self {
            jobs: JobStore::new(db.clone()),
            settings: SettingsStore::new(db.clone()),
            shopify_map: ShopifyMapStore::new(db.clone()),
            templates: TemplateStore::new(db.clone()),
            prompts: PromptStore::new(db.clone()),
        }
    }
}
