// src/storage/memory.rs
//! In-memory backend for tests and local development
//!
//! History and the pending directive of a key share one DashMap entry, so
//! each mutation runs under a single entry guard and writers to the same
//! key are serialized by the shard lock. No await happens while a guard is
//! held.

use super::{push_head, sort_status, RolledBack, StoredAsset, UpdateStore, DEFAULT_ASSET_BASE_URL};
use crate::error::Result;
use crate::model::{DeploymentKey, StatusEntry, Update};
use crate::protocol::Directive;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// Everything stored for one deployment key
#[derive(Default)]
struct KeyState {
    history: Vec<Update>,
    directive: Option<Directive>,
}

/// Volatile update store
pub struct MemoryStore {
    keys: DashMap<DeploymentKey, KeyState>,
    assets: DashMap<String, StoredAsset>,
    asset_base_url: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_asset_base_url(DEFAULT_ASSET_BASE_URL)
    }

    /// Asset URLs become `{base}/{hash}`
    pub fn with_asset_base_url(base: &str) -> Self {
        Self {
            keys: DashMap::new(),
            assets: DashMap::new(),
            asset_base_url: base.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateStore for MemoryStore {
    async fn latest(&self, key: &DeploymentKey) -> Result<Option<Update>> {
        Ok(self
            .keys
            .get(key)
            .and_then(|state| state.history.first().cloned()))
    }

    async fn publish(&self, key: &DeploymentKey, update: Update) -> Result<()> {
        let mut state = self.keys.entry(key.clone()).or_default();
        push_head(&mut state.history, update)?;
        state.directive = None;
        Ok(())
    }

    async fn set_rollout(&self, key: &DeploymentKey, update_id: &str, percentage: u8) -> Result<()> {
        if let Some(mut state) = self.keys.get_mut(key)
            && let Some(head) = state.history.first_mut()
            && head.id() == update_id
        {
            head.rollout_percentage = percentage.min(100);
            head.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn rollback(&self, key: &DeploymentKey) -> Result<Option<RolledBack>> {
        let Some(mut state) = self.keys.get_mut(key) else {
            return Ok(None);
        };
        if state.history.len() < 2 {
            return Ok(None);
        }
        let removed = state.history.remove(0);
        Ok(state
            .history
            .first()
            .cloned()
            .map(|active| RolledBack { removed, active }))
    }

    async fn history(&self, key: &DeploymentKey, limit: usize) -> Result<Vec<Update>> {
        Ok(self
            .keys
            .get(key)
            .map(|state| state.history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_all(&self) -> Result<Vec<StatusEntry>> {
        let mut entries: Vec<StatusEntry> = self
            .keys
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .history
                    .first()
                    .map(|head| StatusEntry::new(entry.key(), head.clone()))
            })
            .collect();
        sort_status(&mut entries);
        Ok(entries)
    }

    async fn store_asset(&self, hash: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.assets.insert(
            hash.to_string(),
            StoredAsset {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn asset_url(&self, hash: &str) -> Result<Option<String>> {
        Ok(self
            .assets
            .contains_key(hash)
            .then(|| format!("{}/{}", self.asset_base_url, hash)))
    }

    async fn read_asset(&self, hash: &str) -> Result<Option<StoredAsset>> {
        Ok(self.assets.get(hash).map(|asset| asset.value().clone()))
    }

    async fn set_directive(&self, key: &DeploymentKey, directive: Option<Directive>) -> Result<()> {
        match directive {
            Some(directive) => {
                self.keys.entry(key.clone()).or_default().directive = Some(directive);
            }
            None => {
                if let Some(mut state) = self.keys.get_mut(key) {
                    state.directive = None;
                }
            }
        }
        Ok(())
    }

    async fn directive(&self, key: &DeploymentKey) -> Result<Option<Directive>> {
        Ok(self.keys.get(key).and_then(|state| state.directive.clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
