// src/storage/mod.rs
//! Storage backends for update history and assets
//!
//! The engine and the admin API only see [`UpdateStore`]. Backends decide
//! how history and assets are laid out, but every backend must:
//! - keep history newest-first, capped at [`HISTORY_CAP`] entries
//! - serialize writers per deployment key so two concurrent publishes never
//!   both become head or corrupt the ordering
//! - reject a publish whose update id is already in the key's history
//! - treat a missing key as "no update", never as an error, including keys
//!   and hashes the backend cannot represent; only writes reject those
//!
//! Reads may be slightly stale; clients poll.

mod fs;
mod memory;

pub use fs::FileStore;
pub use memory::MemoryStore;

use crate::error::{Error, Result};
use crate::model::{DeploymentKey, StatusEntry, Update};
use crate::protocol::Directive;
use async_trait::async_trait;
use chrono::Utc;

/// Maximum number of updates retained per deployment key
pub const HISTORY_CAP: usize = 50;

/// History slice size when the caller does not ask for one
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Default public prefix under which backends expose raw asset bytes
pub const DEFAULT_ASSET_BASE_URL: &str = "/objects";

/// Raw asset content as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Outcome of a successful rollback
#[derive(Debug, Clone, PartialEq)]
pub struct RolledBack {
    /// The head that was dropped
    pub removed: Update,
    /// The new head
    pub active: Update,
}

/// Durable keyed storage for update history and content-addressed assets
#[async_trait]
pub trait UpdateStore: Send + Sync {
    /// Current update (head of history) for a key
    async fn latest(&self, key: &DeploymentKey) -> Result<Option<Update>>;

    /// Push an update as the new head, dropping entries beyond the cap.
    /// Clears any pending directive for the key.
    ///
    /// Fails with `Validation` when the update id is already in the key's
    /// history; nothing is written in that case.
    async fn publish(&self, key: &DeploymentKey, update: Update) -> Result<()>;

    /// Change the rollout percentage of the head, if its id matches.
    /// A mismatch or an empty key is a silent no-op.
    async fn set_rollout(&self, key: &DeploymentKey, update_id: &str, percentage: u8) -> Result<()>;

    /// Pop the head, returning it together with the new head.
    ///
    /// Returns `None` without touching anything when fewer than two
    /// entries exist.
    async fn rollback(&self, key: &DeploymentKey) -> Result<Option<RolledBack>>;

    /// Newest-first history, at most `limit` entries
    async fn history(&self, key: &DeploymentKey, limit: usize) -> Result<Vec<Update>>;

    /// Current update of every key with a non-empty history
    async fn list_all(&self) -> Result<Vec<StatusEntry>>;

    /// Store asset bytes under their hash; re-storing overwrites
    async fn store_asset(&self, hash: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Public location of an asset, `None` if never stored
    async fn asset_url(&self, hash: &str) -> Result<Option<String>>;

    /// Raw asset bytes and content type
    async fn read_asset(&self, hash: &str) -> Result<Option<StoredAsset>>;

    /// Set or clear the operator-forced directive for a key
    async fn set_directive(&self, key: &DeploymentKey, directive: Option<Directive>) -> Result<()>;

    /// Pending directive for a key
    async fn directive(&self, key: &DeploymentKey) -> Result<Option<Directive>>;

    /// Copy the current update of `from` into `to` at full rollout.
    ///
    /// Returns the promoted copy, or `None` (and writes nothing) when
    /// `from` has no current update.
    async fn promote(&self, from: &DeploymentKey, to: &DeploymentKey) -> Result<Option<Update>> {
        let Some(source) = self.latest(from).await? else {
            return Ok(None);
        };
        let copy = promoted_copy(source);
        self.publish(to, copy.clone()).await?;
        Ok(Some(copy))
    }

    /// Check that the backend can write under `key`
    fn check_key(&self, _key: &DeploymentKey) -> Result<()> {
        Ok(())
    }

    /// Check that the backend can store an asset under `hash`
    fn check_asset_hash(&self, _hash: &str) -> Result<()> {
        Ok(())
    }

    /// Human-readable backend name for logging
    fn name(&self) -> &str;
}

/// Insert `update` at the head of `history` and enforce the cap
///
/// Leaves `history` untouched when the id is already present.
pub(crate) fn push_head(history: &mut Vec<Update>, update: Update) -> Result<()> {
    if history.iter().any(|u| u.id() == update.id()) {
        return Err(duplicate_update(update.id()));
    }
    history.insert(0, update);
    history.truncate(HISTORY_CAP);
    Ok(())
}

pub(crate) fn duplicate_update(id: &str) -> Error {
    Error::validation(format!("update {id} already exists in history"))
}

/// Copy of an update as it lands in a promotion target
pub(crate) fn promoted_copy(mut update: Update) -> Update {
    update.rollout_percentage = 100;
    update.updated_at = Utc::now();
    update
}

/// Stable ordering for status listings: platform, channel, runtime version
pub(crate) fn sort_status(entries: &mut [StatusEntry]) {
    entries.sort_by(|a, b| {
        a.platform
            .cmp(&b.platform)
            .then_with(|| a.channel.cmp(&b.channel))
            .then_with(|| a.runtime_version.cmp(&b.runtime_version))
    });
}
