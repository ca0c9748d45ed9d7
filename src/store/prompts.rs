//! Named prompt texts for background generation. Exactly one prompt is
//! the default; the default is protected from edit and delete, and the
//! only way to demote it is promoting another.

use crate::errors::StoreError;
use crate::store::{now_ms, Db};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPrompt {
    pub id: String,
    pub name: String,
    pub text: String,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct PromptStore {
    conn: Arc<Mutex<Connection>>,
}

impl PromptStore {
    pub fn new(db: Db) -> Self {
        Self { conn: db.handle() }
    }

    pub fn list(&self) -> Result<Vec<CustomPrompt>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, text, is_default, created_at, updated_at
             FROM custom_prompts ORDER BY is_default DESC, created_at ASC",
        )?;
        let rows: Vec<CustomPrompt> = stmt.query_map([], prompt_row)?.collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn get(&self, id: &str) -> Result<Option<CustomPrompt>, StoreError> {
        let conn = self.conn.lock();
        let prompt = conn
            .query_row(
                "SELECT id, name, text, is_default, created_at, updated_at
                 FROM custom_prompts WHERE id = ?1",
                params![id],
                prompt_row,
            )
            .optional()?;
        Ok(prompt)
    }

    pub fn get_default(&self) -> Result<Option<CustomPrompt>, StoreError> {
        let conn = self.conn.lock();
        let prompt = conn
            .query_row(
                "SELECT id, name, text, is_default, created_at, updated_at
                 FROM custom_prompts WHERE is_default = 1 LIMIT 1",
                [],
                prompt_row,
            )
            .optional()?;
        Ok(prompt)
    }

    pub fn create(&self, name: &str, text: &str) -> Result<CustomPrompt, StoreError> {
        let now = now_ms();
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO custom_prompts (id, name, text, is_default, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, name, text, now],
        )?;
        Ok(CustomPrompt {
            id,
            name: name.to_string(),
            text: text.to_string(),
            is_default: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Non-default prompts only.
    pub fn update(&self, id: &str, name: &str, text: &str) -> Result<CustomPrompt, StoreError> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE custom_prompts SET name = ?2, text = ?3, updated_at = ?4
             WHERE id = ?1 AND is_default = 0",
            params![id, name, text, now_ms()],
        )?;
        drop(conn);
        if affected == 0 {
            return match self.get(id)? {
                Some(_) => Err(StoreError::InvalidInput(
                    "the default prompt cannot be edited".to_string(),
                )),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }
        self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Non-default prompts only.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM custom_prompts WHERE id = ?1 AND is_default = 0",
            params![id],
        )?;
        drop(conn);
        if affected == 0 {
            return match self.get(id)? {
                Some(_) => Err(StoreError::InvalidInput(
                    "the default prompt cannot be deleted".to_string(),
                )),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }
        Ok(())
    }

    /// Promote a prompt to default, demoting the previous one in the same
    /// transaction.
    pub fn set_default(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM custom_prompts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let now = now_ms();
        tx.execute(
            "UPDATE custom_prompts SET is_default = 0, updated_at = ?1 WHERE is_default = 1",
            params![now],
        )?;
        tx.execute(
            "UPDATE custom_prompts SET is_default = 1, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn prompt_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CustomPrompt> {
    Ok(CustomPrompt {
        id: row.get(0)?,
        name: row.get(1)?,
        text: row.get(2)?,
        is_default: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{migrations, Db};

    fn store() -> PromptStore {
        let db = Db::in_memory().unwrap();
        db.migrate(&migrations::embedded()).unwrap();
        PromptStore::new(db)
    }

    #[test]
    fn migration_seeds_a_default() {
        let s = store();
        let default = s.get_default().unwrap().expect("seeded default");
        assert!(default.is_default);
        assert_eq!(default.id, "prompt-default");
    }

    #[test]
    fn default_is_protected() {
        let s = store();
        assert!(s.update("prompt-default", "x", "y").is_err());
        assert!(s.delete("prompt-default").is_err());
        assert!(s.get("prompt-default").unwrap().is_some());
    }

    #[test]
    fn non_default_prompts_are_editable_and_deletable() {
        let s = store();
        let p = s.create("Festive", "snowy pine backdrop, warm bokeh").unwrap();
        let updated = s.update(&p.id, "Festive v2", "snowy pine, gold bokeh").unwrap();
        assert_eq!(updated.name, "Festive v2");
        s.delete(&p.id).unwrap();
        assert!(s.get(&p.id).unwrap().is_none());
    }

    #[test]
    fn set_default_swaps_exactly_one() {
        let s = store();
        let p = s.create("Festive", "snow").unwrap();
        s.set_default(&p.id).unwrap();

        let defaults: Vec<CustomPrompt> = s
            .list()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, p.id);

        // The old default is now editable.
        assert!(s.update("prompt-default", "Studio", "new text").is_ok());
    }

    #[test]
    fn set_default_unknown_id() {
        let s = store();
        assert!(matches!(
            s.set_default("missing"),
            Err(StoreError::NotFound(_))
        ));
    }
}
