// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AlulaError, Result};

/// Integration domain, used in unique ids and discovery identifiers.
pub const DOMAIN: &str = "alula";

/// Persisted credentials for one configured account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    /// Lower-cased username; at most one entry per unique id
    pub unique_id: String,
    pub title: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub data: EntryData,
    pub created_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl ConfigEntry {
    pub fn new(username: &str, password: &str, refresh_token: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: format!("{:x}", now.timestamp_nanos_opt().unwrap_or_default()),
            unique_id: unique_id_for(username),
            title: format!("Cove Security ({username})"),
            version: default_version(),
            data: EntryData {
                username: username.to_string(),
                password: password.to_string(),
                refresh_token,
            },
            created_at: now,
        }
    }
}

/// Unique id for an account: the trimmed, lower-cased username.
pub fn unique_id_for(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Where config entries live between runs.
#[async_trait]
pub trait ConfigEntryStore: Send + Sync {
    async fn entries(&self) -> Result<Vec<ConfigEntry>>;

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<ConfigEntry>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .find(|e| e.unique_id == unique_id))
    }

    /// Persist a new entry unless one with the same unique id exists.
    /// Returns whether the entry was added.
    async fn add(&self, entry: ConfigEntry) -> Result<bool>;

    /// Replace the entry with the same entry id. Unknown ids are an error.
    async fn update(&self, entry: &ConfigEntry) -> Result<()>;

    /// Remove an entry; returns whether it existed.
    async fn remove(&self, entry_id: &str) -> Result<bool>;
}

fn replace_entry(entries: &mut [ConfigEntry], entry: &ConfigEntry) -> Result<()> {
    match entries.iter_mut().find(|e| e.entry_id == entry.entry_id) {
        Some(slot) => {
            *slot = entry.clone();
            Ok(())
        }
        None => Err(AlulaError::invalid_response(format!(
            "unknown config entry {}",
            entry.entry_id
        ))),
    }
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: Mutex<Vec<ConfigEntry>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigEntryStore for MemoryEntryStore {
    async fn entries(&self) -> Result<Vec<ConfigEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn add(&self, entry: ConfigEntry) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.unique_id == entry.unique_id) {
            return Ok(false);
        }
        entries.push(entry);
        Ok(true)
    }

    async fn update(&self, entry: &ConfigEntry) -> Result<()> {
        replace_entry(&mut self.entries.lock().await, entry)
    }

    async fn remove(&self, entry_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.entry_id != entry_id);
        Ok(entries.len() != before)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EntryFile {
    #[serde(default)]
    entries: Vec<ConfigEntry>,
}

/// JSON file store. Writes go to a temporary sibling and are renamed into place.
#[derive(Debug)]
pub struct FileEntryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileEntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<EntryFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(EntryFile::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file: &EntryFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} config entries to {}", file.entries.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ConfigEntryStore for FileEntryStore {
    async fn entries(&self) -> Result<Vec<ConfigEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.entries)
    }

    async fn add(&self, entry: ConfigEntry) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        if file.entries.iter().any(|e| e.unique_id == entry.unique_id) {
            debug!("Config entry for {} already stored", entry.unique_id);
            return Ok(false);
        }
        info!("Persisting config entry {} ({})", entry.entry_id, entry.title);
        file.entries.push(entry);
        self.write(&file).await?;
        Ok(true)
    }

    async fn update(&self, entry: &ConfigEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        replace_entry(&mut file.entries, entry)?;
        self.write(&file).await
    }

    async fn remove(&self, entry_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let before = file.entries.len();
        file.entries.retain(|e| e.entry_id != entry_id);
        let removed = file.entries.len() != before;
        if removed {
            self.write(&file).await?;
        }
        Ok(removed)
    }
}
