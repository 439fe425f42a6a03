// src/storage/fs.rs
//! Filesystem backend
//!
//! Layout under the storage root:
//!
//! ```text
//! history/{channel}/{runtime_version}/{platform}.json     newest-first JSON array
//! directives/{channel}/{runtime_version}/{platform}.json  pending directive
//! objects/{hash[0:2]}/{hash[2:]}                          asset bytes
//! types/{hash[0:2]}/{hash[2:]}                            asset content type
//! ```
//!
//! Asset hashes are limited to `[A-Za-z0-9_-]` (hex or base64url digests),
//! at least three characters long. Channels and runtime versions must be
//! single path segments. Reads treat anything else as absent; writes
//! reject it.
//!
//! Every file is written to a temp path and renamed into place. History
//! read-modify-write cycles for one key run under that key's async mutex,
//! so concurrent publishes to the same key are linearized.

use super::{push_head, sort_status, RolledBack, StoredAsset, UpdateStore, DEFAULT_ASSET_BASE_URL};
use crate::error::{Error, Result};
use crate::model::{DeploymentKey, Platform, StatusEntry, Update};
use crate::protocol::Directive;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const HISTORY_AREA: &str = "history";
const DIRECTIVES_AREA: &str = "directives";
const OBJECTS_AREA: &str = "objects";
const TYPES_AREA: &str = "types";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Distinguishes temp files of concurrent writers to the same path
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Durable store rooted at a directory
pub struct FileStore {
    root: PathBuf,
    asset_base_url: String,
    locks: DashMap<DeploymentKey, Arc<Mutex<()>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_asset_base_url(root, DEFAULT_ASSET_BASE_URL)
    }

    /// Asset URLs become `{base}/{hash}`
    pub fn with_asset_base_url(root: impl Into<PathBuf>, base: &str) -> Self {
        Self {
            root: root.into(),
            asset_base_url: base.trim_end_matches('/').to_string(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_lock(&self, key: &DeploymentKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    fn key_path(&self, area: &str, key: &DeploymentKey) -> Result<PathBuf> {
        check_segment("channel", &key.channel)?;
        check_segment("runtime version", &key.runtime_version)?;
        Ok(self
            .root
            .join(area)
            .join(&key.channel)
            .join(&key.runtime_version)
            .join(format!("{}.json", key.platform)))
    }

    /// Two-level asset path: {area}/{hash[0:2]}/{hash[2:]}
    fn asset_path(&self, area: &str, hash: &str) -> Result<PathBuf> {
        check_hash(hash)?;
        let (prefix, rest) = hash.split_at(2);
        Ok(self.root.join(area).join(prefix).join(rest))
    }

    async fn read_history(&self, key: &DeploymentKey) -> Result<Vec<Update>> {
        let Ok(path) = self.key_path(HISTORY_AREA, key) else {
            return Ok(Vec::new());
        };
        Ok(read_json(&path).await?.unwrap_or_default())
    }

    async fn write_history(&self, key: &DeploymentKey, history: &[Update]) -> Result<()> {
        let path = self.key_path(HISTORY_AREA, key)?;
        write_json_atomic(&path, history).await
    }

    async fn clear_directive(&self, key: &DeploymentKey) -> Result<()> {
        match self.key_path(DIRECTIVES_AREA, key) {
            Ok(path) => remove_if_exists(&path).await,
            Err(_) => Ok(()),
        }
    }
}

/// Reject anything that could escape its directory
fn check_segment(what: &str, value: &str) -> Result<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::validation(format!("invalid {what}: {value:?}")));
    }
    Ok(())
}

fn check_hash(hash: &str) -> Result<()> {
    let valid = hash.len() >= 3
        && hash
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        return Err(Error::validation(format!(
            "invalid asset hash {hash:?} (expected at least 3 of A-Z a-z 0-9 - _)"
        )));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Storage(format!("corrupt file {}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut temp = path.as_os_str().to_os_string();
    temp.push(format!(".{}.{}.tmp", std::process::id(), seq));
    let temp = PathBuf::from(temp);
    tokio::fs::write(&temp, data).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Subdirectory names of `dir`; missing directory yields nothing
async fn list_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        if entry.metadata().await?.is_dir()
            && let Some(name) = file_name.to_str()
        {
            out.push((name.to_string(), entry.path()));
        }
    }
    Ok(out)
}

#[async_trait]
impl UpdateStore for FileStore {
    async fn latest(&self, key: &DeploymentKey) -> Result<Option<Update>> {
        Ok(self.read_history(key).await?.into_iter().next())
    }

    async fn publish(&self, key: &DeploymentKey, update: Update) -> Result<()> {
        self.check_key(key)?;
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut history = self.read_history(key).await?;
        debug!("Publishing {} to {} ({} prior entries)", update.id(), key, history.len());
        push_head(&mut history, update)?;
        self.write_history(key, &history).await?;
        self.clear_directive(key).await
    }

    async fn set_rollout(&self, key: &DeploymentKey, update_id: &str, percentage: u8) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut history = self.read_history(key).await?;
        match history.first_mut() {
            Some(head) if head.id() == update_id => {
                head.rollout_percentage = percentage.min(100);
                head.updated_at = Utc::now();
            }
            _ => return Ok(()),
        }
        self.write_history(key, &history).await
    }

    async fn rollback(&self, key: &DeploymentKey) -> Result<Option<RolledBack>> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut history = self.read_history(key).await?;
        if history.len() < 2 {
            return Ok(None);
        }
        let removed = history.remove(0);
        self.write_history(key, &history).await?;
        Ok(history
            .into_iter()
            .next()
            .map(|active| RolledBack { removed, active }))
    }

    async fn history(&self, key: &DeploymentKey, limit: usize) -> Result<Vec<Update>> {
        let mut history = self.read_history(key).await?;
        history.truncate(limit);
        Ok(history)
    }

    async fn list_all(&self) -> Result<Vec<StatusEntry>> {
        let mut entries = Vec::new();

        for (channel, channel_dir) in list_dirs(&self.root.join(HISTORY_AREA)).await? {
            for (runtime_version, runtime_dir) in list_dirs(&channel_dir).await? {
                for platform in [Platform::Ios, Platform::Android] {
                    let path = runtime_dir.join(format!("{platform}.json"));
                    let history: Vec<Update> = read_json(&path).await?.unwrap_or_default();
                    if let Some(head) = history.into_iter().next() {
                        let key = DeploymentKey::new(channel.clone(), runtime_version.clone(), platform);
                        entries.push(StatusEntry::new(&key, head));
                    }
                }
            }
        }

        sort_status(&mut entries);
        Ok(entries)
    }

    async fn store_asset(&self, hash: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let object = self.asset_path(OBJECTS_AREA, hash)?;
        let content_type_path = self.asset_path(TYPES_AREA, hash)?;
        // Type first: a visible object always has its type
        write_atomic(&content_type_path, content_type.as_bytes()).await?;
        write_atomic(&object, &bytes).await
    }

    async fn asset_url(&self, hash: &str) -> Result<Option<String>> {
        let Ok(path) = self.asset_path(OBJECTS_AREA, hash) else {
            return Ok(None);
        };
        let exists = tokio::fs::try_exists(&path).await?;
        Ok(exists.then(|| format!("{}/{}", self.asset_base_url, hash)))
    }

    async fn read_asset(&self, hash: &str) -> Result<Option<StoredAsset>> {
        let (Ok(object), Ok(content_type_path)) = (
            self.asset_path(OBJECTS_AREA, hash),
            self.asset_path(TYPES_AREA, hash),
        ) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&object).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let content_type = match tokio::fs::read_to_string(&content_type_path).await {
            Ok(ct) => ct,
            Err(e) if e.kind() == ErrorKind::NotFound => FALLBACK_CONTENT_TYPE.to_string(),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(StoredAsset { bytes, content_type }))
    }

    async fn set_directive(&self, key: &DeploymentKey, directive: Option<Directive>) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        match directive {
            Some(directive) => {
                let path = self.key_path(DIRECTIVES_AREA, key)?;
                write_json_atomic(&path, &directive).await
            }
            None => self.clear_directive(key).await,
        }
    }

    async fn directive(&self, key: &DeploymentKey) -> Result<Option<Directive>> {
        let Ok(path) = self.key_path(DIRECTIVES_AREA, key) else {
            return Ok(None);
        };
        read_json(&path).await
    }

    fn check_key(&self, key: &DeploymentKey) -> Result<()> {
        self.key_path(HISTORY_AREA, key).map(|_| ())
    }

    fn check_asset_hash(&self, hash: &str) -> Result<()> {
        check_hash(hash)
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
