//! Runtime-tunable settings over the key/value table, with typed
//! accessors so callers never touch raw strings. Unset keys fall back to
//! defaults; invalid stored values are rejected on write, defaulted on
//! read.

use crate::errors::StoreError;
use crate::store::{now_ms, Db};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const KEY_WORKFLOW_PREFERENCE: &str = "workflow_preference";
pub const KEY_AI_COMPOSITOR: &str = "ai_compositor";
pub const KEY_SHARP_WORKFLOW: &str = "sharp_workflow";
pub const KEY_SHARP_SETTINGS: &str = "sharp_settings";
pub const KEY_ACTIVE_BACKGROUND_TEMPLATE: &str = "active_background_template";
pub const KEY_SELECTED_PROMPT_ID: &str = "selected_prompt_id";
pub const KEY_BACKGROUND_VARIANT_COUNT: &str = "background_variant_count";

/// Which background/composite strategy the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPreference {
    CutoutComposite,
    SeedreamEdit,
}

impl Default for WorkflowPreference {
    fn default() -> Self {
        Self::CutoutComposite
    }
}

impl WorkflowPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CutoutComposite => "cutout_composite",
            Self::SeedreamEdit => "seedream_edit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cutout_composite" => Some(Self::CutoutComposite),
            "seedream_edit" => Some(Self::SeedreamEdit),
            _ => None,
        }
    }
}

/// Which AI compositor runs, if any. `None` means deterministic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiCompositorChoice {
    None,
    Freepik,
    Nanobanana,
}

impl Default for AiCompositorChoice {
    fn default() -> Self {
        Self::None
    }
}

impl AiCompositorChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Freepik => "freepik",
            Self::Nanobanana => "nanobanana",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "freepik" => Some(Self::Freepik),
            "nanobanana" => Some(Self::Nanobanana),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn ext(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gravity {
    #[serde(rename = "n")]
    North,
    #[serde(rename = "s")]
    South,
    #[serde(rename = "e")]
    East,
    #[serde(rename = "w")]
    West,
    #[serde(rename = "center")]
    Center,
}

/// Parameters for the deterministic compositor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SharpSettings {
    pub bottle_height_percent: f64,
    pub quality: u8,
    pub format: OutputFormat,
    pub gravity: Gravity,
    pub sharpen: f64,
    pub gamma: f64,
}

impl Default for SharpSettings {
    fn default() -> Self {
        Self {
            bottle_height_percent: 0.8,
            quality: 85,
            format: OutputFormat::Jpeg,
            gravity: Gravity::South,
            sharpen: 0.0,
            gamma: 1.0,
        }
    }
}

impl SharpSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.1..=1.0).contains(&self.bottle_height_percent) {
            return Err(format!(
                "bottle_height_percent {} outside [0.1, 1.0]",
                self.bottle_height_percent
            ));
        }
        if !(60..=100).contains(&self.quality) {
            return Err(format!("quality {} outside [60, 100]", self.quality));
        }
        if self.sharpen < 0.0 || !self.sharpen.is_finite() {
            return Err(format!("sharpen {} must be >= 0", self.sharpen));
        }
        if !(0.5..=3.0).contains(&self.gamma) {
            return Err(format!("gamma {} outside [0.5, 3.0]", self.gamma));
        }
        Ok(())
    }
}

pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsStore {
    pub fn new(db: Db) -> Self {
        Self { conn: db.handle() }
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    pub fn workflow_preference(&self) -> Result<WorkflowPreference, StoreError> {
        Ok(self
            .get_raw(KEY_WORKFLOW_PREFERENCE)?
            .and_then(|v| WorkflowPreference::parse(&v))
            .unwrap_or_default())
    }

    pub fn set_workflow_preference(&self, pref: WorkflowPreference) -> Result<(), StoreError> {
        self.set_raw(KEY_WORKFLOW_PREFERENCE, pref.as_str())
    }

    pub fn ai_compositor(&self) -> Result<AiCompositorChoice, StoreError> {
        Ok(self
            .get_raw(KEY_AI_COMPOSITOR)?
            .and_then(|v| AiCompositorChoice::parse(&v))
            .unwrap_or_default())
    }

    pub fn set_ai_compositor(&self, choice: AiCompositorChoice) -> Result<(), StoreError> {
        self.set_raw(KEY_AI_COMPOSITOR, choice.as_str())
    }

    /// True forces the deterministic compositor regardless of AI choice.
    pub fn sharp_workflow(&self) -> Result<bool, StoreError> {
        Ok(self
            .get_raw(KEY_SHARP_WORKFLOW)?
            .map(|v| matches!(v.as_str(), "1" | "true"))
            .unwrap_or(false))
    }

    pub fn set_sharp_workflow(&self, enabled: bool) -> Result<(), StoreError> {
        self.set_raw(KEY_SHARP_WORKFLOW, if enabled { "true" } else { "false" })
    }

    pub fn sharp_settings(&self) -> Result<SharpSettings, StoreError> {
        Ok(self
            .get_raw(KEY_SHARP_SETTINGS)?
            .and_then(|v| serde_json::from_str(&v).ok())
            .unwrap_or_default())
    }

    pub fn set_sharp_settings(&self, settings: &SharpSettings) -> Result<(), StoreError> {
        settings.validate().map_err(StoreError::InvalidInput)?;
        self.set_raw(KEY_SHARP_SETTINGS, &serde_json::to_string(settings)?)
    }

    /// Empty string means no active template; never NULL.
    pub fn active_background_template(&self) -> Result<String, StoreError> {
        Ok(self
            .get_raw(KEY_ACTIVE_BACKGROUND_TEMPLATE)?
            .unwrap_or_default())
    }

    pub fn set_active_background_template(&self, template_id: &str) -> Result<(), StoreError> {
        self.set_raw(KEY_ACTIVE_BACKGROUND_TEMPLATE, template_id)
    }

    pub fn selected_prompt_id(&self) -> Result<String, StoreError> {
        Ok(self.get_raw(KEY_SELECTED_PROMPT_ID)?.unwrap_or_default())
    }

    pub fn set_selected_prompt_id(&self, prompt_id: &str) -> Result<(), StoreError> {
        self.set_raw(KEY_SELECTED_PROMPT_ID, prompt_id)
    }

    /// Generated background variants per job, clamped to [1, 6].
    pub fn background_variant_count(&self) -> Result<u32, StoreError> {
        Ok(self
            .get_raw(KEY_BACKGROUND_VARIANT_COUNT)?
            .and_then(|v| v.parse::<u32>().ok())
            .map(|n| n.clamp(1, 6))
            .unwrap_or(3))
    }

    pub fn set_background_variant_count(&self, count: u32) -> Result<(), StoreError> {
        if !(1..=6).contains(&count) {
            return Err(StoreError::InvalidInput(format!(
                "background_variant_count {} outside [1, 6]",
                count
            )));
        }
        self.set_raw(KEY_BACKGROUND_VARIANT_COUNT, &count.to_string())
    }
}
