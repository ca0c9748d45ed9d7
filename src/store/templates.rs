//! Background template registry: a reusable background set produced once
//! and referenced by many jobs. Templates are created `generating`, go
//! `active` when their variants land, `failed` on provider error, and
//! `archived` on soft delete.

use crate::errors::StoreError;
use crate::store::{now_ms, Db};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Generating,
    Active,
    Archived,
    Failed,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(Self::Generating),
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub status: TemplateStatus,
    pub prompt: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAsset {
    pub id: String,
    pub template_id: String,
    pub s3_key: String,
    pub width: u32,
    pub height: u32,
    pub selected: bool,
    pub position: u32,
}

pub struct TemplateStore {
    conn: Arc<Mutex<Connection>>,
}

impl TemplateStore {
    pub fn new(db: Db) -> Self {
        Self { conn: db.handle() }
    }

    pub fn create(&self, name: &str, prompt: &str) -> Result<Template, StoreError> {
        let now = now_ms();
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO background_templates (id, name, status, prompt, created_at, updated_at)
             VALUES (?1, ?2, 'generating', ?3, ?4, ?4)",
            params![id, name, prompt, now],
        )?;
        Ok(Template {
            id,
            name: name.to_string(),
            status: TemplateStatus::Generating,
            prompt: prompt.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Template>, StoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, name, status, prompt, created_at, updated_at
                 FROM background_templates WHERE id = ?1",
                params![id],
                template_row,
            )
            .optional()?;
        raw.transpose()
    }

    pub fn list(&self, include_archived: bool) -> Result<Vec<Template>, StoreError> {
        let sql = if include_archived {
            "SELECT id, name, status, prompt, created_at, updated_at
             FROM background_templates ORDER BY created_at DESC"
        } else {
            "SELECT id, name, status, prompt, created_at, updated_at
             FROM background_templates WHERE status != 'archived' ORDER BY created_at DESC"
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<Result<Template, StoreError>> = stmt
            .query_map([], template_row)?
            .collect::<Result<_, _>>()?;
        rows.into_iter().collect()
    }

    pub fn set_status(&self, id: &str, status: TemplateStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE background_templates SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_ms()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Soft delete.
    pub fn archive(&self, id: &str) -> Result<(), StoreError> {
        self.set_status(id, TemplateStatus::Archived)
    }

    pub fn add_asset(
        &self,
        template_id: &str,
        s3_key: &str,
        width: u32,
        height: u32,
        position: u32,
    ) -> Result<TemplateAsset, StoreError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO template_assets (id, template_id, s3_key, width, height, selected, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![id, template_id, s3_key, width, height, position, now_ms()],
        )?;
        Ok(TemplateAsset {
            id,
            template_id: template_id.to_string(),
            s3_key: s3_key.to_string(),
            width,
            height,
            selected: false,
            position,
        })
    }

    pub fn set_asset_selected(&self, asset_id: &str, selected: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE template_assets SET selected = ?2 WHERE id = ?1",
            params![asset_id, selected as i64],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(asset_id.to_string()));
        }
        Ok(())
    }

    pub fn assets(&self, template_id: &str) -> Result<Vec<TemplateAsset>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, template_id, s3_key, width, height, selected, position
             FROM template_assets WHERE template_id = ?1 ORDER BY position ASC",
        )?;
        let rows: Vec<TemplateAsset> = stmt
            .query_map(params![template_id], asset_row)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Selected asset keys of an active template, in position order.
    /// Empty when the template is missing, not active, or has no
    /// selection.
    pub fn selected_asset_keys(&self, template_id: &str) -> Result<Vec<String>, StoreError> {
        let Some(template) = self.get(template_id)? else {
            return Ok(Vec::new());
        };
        if template.status != TemplateStatus::Active {
            return Ok(Vec::new());
        }
        Ok(self
            .assets(template_id)?
            .into_iter()
            .filter(|a| a.selected)
            .map(|a| a.s3_key)
            .collect())
    }
}

fn template_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Template, StoreError>> {
    let id: String = row.get(0)?;
    let status_raw: String = row.get(2)?;
    let status = match TemplateStatus::parse(&status_raw) {
        Some(s) => s,
        None => {
            return Ok(Err(StoreError::Corrupt {
                id,
                detail: format!("unknown template status {:?}", status_raw),
            }))
        }
    };
    Ok(Ok(Template {
        id,
        name: row.get(1)?,
        status,
        prompt: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    }))
}

fn asset_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateAsset> {
    Ok(TemplateAsset {
        id: row.get(0)?,
        template_id: row.get(1)?,
        s3_key: row.get(2)?,
        width: row.get::<_, i64>(3)? as u32,
        height: row.get::<_, i64>(4)? as u32,
        selected: row.get::<_, i64>(5)? != 0,
        position: row.get::<_, i64>(6)? as u32,
    })
}
