// src/admin.rs
//! Operator mutations over the update store
//!
//! Every operation is one validated storage call followed, on success, by
//! exactly one event. Validation happens before any storage access, so a
//! rejected request leaves state untouched. Authorization is enforced by
//! the HTTP layer, not here.

use crate::error::{Error, Result};
use crate::events::{Event, EventDispatcher};
use crate::model::{DeploymentKey, Manifest, Platform, StatusEntry, Update, DEFAULT_CHANNEL};
use crate::protocol::Directive;
use crate::storage::{duplicate_update, RolledBack, UpdateStore, DEFAULT_HISTORY_LIMIT, HISTORY_CAP};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const DEFAULT_ASSET_CONTENT_TYPE: &str = "application/octet-stream";

/// Asset bytes uploaded alongside a publish
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineAsset {
    pub hash: String,
    pub base64: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub manifest: Manifest,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub rollout_percentage: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub assets: Vec<InlineAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    #[serde(default)]
    pub from_channel: Option<String>,
    #[serde(default)]
    pub to_channel: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutRequest {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub update_id: Option<String>,
    #[serde(default)]
    pub percentage: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Query of `GET /admin/updates`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// What to do with a key's pending directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveKind {
    RollBackToEmbedded,
    NoUpdateAvailable,
    Clear,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveRequest {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    pub kind: DirectiveKind,
    /// Commit time for `rollBackToEmbedded`; defaults to now
    #[serde(default)]
    pub commit_time: Option<DateTime<Utc>>,
}

/// JSON acknowledgment of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_update_id: Option<String>,
}

impl Ack {
    fn ok() -> Self {
        Self {
            ok: true,
            update_id: None,
            active_update_id: None,
        }
    }

    fn with_update(update_id: &str) -> Self {
        Self {
            update_id: Some(update_id.to_string()),
            ..Self::ok()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateList {
    pub updates: Vec<Update>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusList {
    pub deployments: Vec<StatusEntry>,
}

/// Build a deployment key from loosely typed request fields
fn deployment_key(
    channel: Option<&str>,
    runtime_version: Option<&str>,
    platform: Option<&str>,
) -> Result<DeploymentKey> {
    let (Some(runtime_version), Some(platform)) = (
        runtime_version.filter(|v| !v.is_empty()),
        platform.filter(|v| !v.is_empty()),
    ) else {
        return Err(Error::validation("missing runtimeVersion or platform"));
    };
    let platform: Platform = platform.parse()?;
    let channel = channel.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_CHANNEL);
    Ok(DeploymentKey::new(channel, runtime_version, platform))
}

fn percentage(value: i64) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| Error::validation(format!("percentage must be between 0 and 100, got {value}")))
}

/// Admin operations over a store
#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn UpdateStore>,
    events: EventDispatcher,
}

impl AdminService {
    pub fn new(store: Arc<dyn UpdateStore>, events: EventDispatcher) -> Self {
        Self { store, events }
    }

    /// Store inline assets, then publish the update as the new head
    pub async fn publish(&self, request: PublishRequest) -> Result<Ack> {
        let key = deployment_key(
            request.channel.as_deref(),
            request.runtime_version.as_deref(),
            request.platform.as_deref(),
        )?;
        if request.manifest.id.is_empty() {
            return Err(Error::validation("manifest id must not be empty"));
        }
        let rollout = percentage(request.rollout_percentage.unwrap_or(100))?;
        self.store.check_key(&key)?;

        // Validate and decode everything up front so a bad asset stores nothing
        let mut assets = Vec::with_capacity(request.assets.len());
        for asset in request.assets {
            if asset.hash.is_empty() {
                return Err(Error::validation("asset hash must not be empty"));
            }
            self.store.check_asset_hash(&asset.hash)?;
            let bytes = BASE64
                .decode(asset.base64.as_bytes())
                .map_err(|e| Error::validation(format!("invalid base64 for asset {}: {}", asset.hash, e)))?;
            let content_type = asset
                .content_type
                .unwrap_or_else(|| DEFAULT_ASSET_CONTENT_TYPE.to_string());
            assets.push((asset.hash, bytes, content_type));
        }

        // The store rechecks under its key lock; this only avoids orphan assets
        let history = self.store.history(&key, HISTORY_CAP).await?;
        if history.iter().any(|u| u.id() == request.manifest.id) {
            return Err(duplicate_update(&request.manifest.id));
        }

        for (hash, bytes, content_type) in assets {
            self.store.store_asset(&hash, bytes, &content_type).await?;
        }

        let mut update = Update::new(request.manifest)
            .with_rollout(rollout)
            .with_critical(request.critical);
        if let Some(message) = request.message {
            update = update.with_message(message);
        }
        let update_id = update.id().to_string();

        self.store.publish(&key, update).await?;
        info!("Published {} to {} at {}%", update_id, key, rollout);

        self.events.dispatch(Event::UpdatePublished {
            update_id: update_id.clone(),
            channel: key.channel,
            runtime_version: key.runtime_version,
            platform: key.platform,
        });
        Ok(Ack::with_update(&update_id))
    }

    /// Copy the source channel's current update into the target channel
    pub async fn promote(&self, request: PromoteRequest) -> Result<Ack> {
        let Some(to_channel) = request.to_channel.filter(|c| !c.is_empty()) else {
            return Err(Error::validation("missing fromChannel or toChannel"));
        };
        let Some(from_channel) = request.from_channel.filter(|c| !c.is_empty()) else {
            return Err(Error::validation("missing fromChannel or toChannel"));
        };
        if from_channel == to_channel {
            return Err(Error::validation("fromChannel and toChannel must differ"));
        }
        let from = deployment_key(
            Some(&from_channel),
            request.runtime_version.as_deref(),
            request.platform.as_deref(),
        )?;
        let to = from.with_channel(to_channel);

        let Some(promoted) = self.store.promote(&from, &to).await? else {
            return Err(Error::not_found("No update found in source channel"));
        };
        info!("Promoted {} from {} to {}", promoted.id(), from, to);

        self.events.dispatch(Event::UpdatePromoted {
            update_id: promoted.id().to_string(),
            from_channel: from.channel,
            to_channel: to.channel,
        });
        Ok(Ack::with_update(promoted.id()))
    }

    /// Change the head's rollout percentage; a non-head id is a no-op
    pub async fn rollout(&self, request: RolloutRequest) -> Result<Ack> {
        let key = deployment_key(
            request.channel.as_deref(),
            request.runtime_version.as_deref(),
            request.platform.as_deref(),
        )?;
        let Some(update_id) = request.update_id.filter(|id| !id.is_empty()) else {
            return Err(Error::validation("missing updateId"));
        };
        let Some(requested) = request.percentage else {
            return Err(Error::validation("missing percentage"));
        };
        let percentage = percentage(requested)?;

        self.store.set_rollout(&key, &update_id, percentage).await?;
        info!("Rollout of {} on {} set to {}%", update_id, key, percentage);

        self.events.dispatch(Event::RolloutChanged {
            update_id,
            percentage,
        });
        Ok(Ack::ok())
    }

    /// Drop the head; the previous update becomes active
    pub async fn rollback(&self, request: RollbackRequest) -> Result<Ack> {
        let key = deployment_key(
            request.channel.as_deref(),
            request.runtime_version.as_deref(),
            request.platform.as_deref(),
        )?;

        let Some(RolledBack { removed, active }) = self.store.rollback(&key).await? else {
            return Err(Error::not_found("No previous update to roll back to"));
        };
        let rolled_back_id = removed.id().to_string();
        info!("Rolled back {} on {}, {} is active", rolled_back_id, key, active.id());

        self.events.dispatch(Event::UpdateRolledBack {
            channel: key.channel,
            rolled_back_id,
            active_update_id: active.id().to_string(),
        });
        Ok(Ack {
            active_update_id: Some(active.id().to_string()),
            ..Ack::ok()
        })
    }

    /// Newest-first history for one key
    pub async fn list_updates(&self, query: ListQuery) -> Result<UpdateList> {
        let key = deployment_key(
            query.channel.as_deref(),
            query.runtime_version.as_deref(),
            query.platform.as_deref(),
        )?;
        let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(HISTORY_CAP);
        let updates = self.store.history(&key, limit).await?;
        Ok(UpdateList { updates })
    }

    /// Current update of every deployment key
    pub async fn status(&self) -> Result<StatusList> {
        Ok(StatusList {
            deployments: self.store.list_all().await?,
        })
    }

    /// Set or clear the directive served to protocol 1 clients
    pub async fn set_directive(&self, request: DirectiveRequest) -> Result<Ack> {
        let key = deployment_key(
            request.channel.as_deref(),
            request.runtime_version.as_deref(),
            request.platform.as_deref(),
        )?;
        let directive = match request.kind {
            DirectiveKind::RollBackToEmbedded => Some(Directive::roll_back_to_embedded(
                request.commit_time.unwrap_or_else(Utc::now),
            )),
            DirectiveKind::NoUpdateAvailable => Some(Directive::NoUpdateAvailable),
            DirectiveKind::Clear => None,
        };

        self.store.set_directive(&key, directive.clone()).await?;
        match &directive {
            Some(d) => info!("Directive for {} set to {}", key, d.to_json()),
            None => info!("Directive for {} cleared", key),
        }

        self.events.dispatch(Event::DirectiveChanged {
            channel: key.channel,
            runtime_version: key.runtime_version,
            platform: key.platform,
            directive,
        });
        Ok(Ack::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::channel_dispatcher;
    use crate::model::fixtures;
    use crate::storage::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn service() -> (AdminService, Arc<MemoryStore>, UnboundedReceiver<Event>) {
        let store = Arc::new(MemoryStore::new());
        let (events, rx) = channel_dispatcher();
        (AdminService::new(store.clone(), events), store, rx)
    }

    fn publish_request(id: &str) -> PublishRequest {
        PublishRequest {
            manifest: fixtures::manifest(id),
            channel: None,
            runtime_version: Some("1.0.0".to_string()),
            platform: Some("ios".to_string()),
            rollout_percentage: None,
            message: None,
            critical: false,
            assets: Vec::new(),
        }
    }

    fn rollback_request() -> RollbackRequest {
        RollbackRequest {
            channel: None,
            runtime_version: Some("1.0.0".to_string()),
            platform: Some("ios".to_string()),
        }
    }

    fn rollout_request(update_id: &str, percentage: i64) -> RolloutRequest {
        RolloutRequest {
            channel: None,
            runtime_version: Some("1.0.0".to_string()),
            platform: Some("ios".to_string()),
            update_id: Some(update_id.to_string()),
            percentage: Some(percentage),
        }
    }

    #[tokio::test]
    async fn test_publish_stores_assets_and_emits() {
        let (admin, store, mut rx) = service();
        let mut request = publish_request("u1");
        request.message = Some("first".to_string());
        request.assets.push(InlineAsset {
            hash: "abc123".to_string(),
            base64: BASE64.encode(b"console.log(1)"),
            content_type: Some("application/javascript".to_string()),
        });

        let ack = admin.publish(request).await.unwrap();
        assert_eq!(ack.update_id.as_deref(), Some("u1"));

        let head = store.latest(&fixtures::ios_key()).await.unwrap().unwrap();
        assert_eq!(head.id(), "u1");
        assert_eq!(head.rollout_percentage, 100);
        assert_eq!(head.message.as_deref(), Some("first"));
        let asset = store.read_asset("abc123").await.unwrap().unwrap();
        assert_eq!(asset.bytes, b"console.log(1)");

        match rx.recv().await.unwrap() {
            Event::UpdatePublished { update_id, channel, .. } => {
                assert_eq!(update_id, "u1");
                assert_eq!(channel, "default");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_rejects_bad_input_without_writes() {
        let (admin, store, mut rx) = service();

        let mut bad_asset = publish_request("u1");
        bad_asset.assets.push(InlineAsset {
            hash: "good".to_string(),
            base64: BASE64.encode(b"ok"),
            content_type: None,
        });
        bad_asset.assets.push(InlineAsset {
            hash: "bad".to_string(),
            base64: "%%%".to_string(),
            content_type: None,
        });
        assert_eq!(admin.publish(bad_asset).await.unwrap_err().status_code(), 400);
        assert!(store.read_asset("good").await.unwrap().is_none());

        let mut bad_rollout = publish_request("u1");
        bad_rollout.rollout_percentage = Some(101);
        assert_eq!(admin.publish(bad_rollout).await.unwrap_err().status_code(), 400);

        let mut no_platform = publish_request("u1");
        no_platform.platform = None;
        assert_eq!(admin.publish(no_platform).await.unwrap_err().status_code(), 400);

        assert_eq!(admin.publish(publish_request("")).await.unwrap_err().status_code(), 400);

        assert!(store.latest(&fixtures::ios_key()).await.unwrap().is_none());
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_checks_hashes_against_backend_before_writing() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(crate::storage::FileStore::new(dir.path()));
        let (events, mut rx) = channel_dispatcher();
        let admin = AdminService::new(store.clone(), events);

        let mut request = publish_request("u1");
        request.assets.push(InlineAsset {
            hash: "goodhash".to_string(),
            base64: BASE64.encode(b"ok"),
            content_type: None,
        });
        request.assets.push(InlineAsset {
            hash: "ab".to_string(),
            base64: BASE64.encode(b"short"),
            content_type: None,
        });
        assert_eq!(admin.publish(request).await.unwrap_err().status_code(), 400);
        assert!(store.read_asset("goodhash").await.unwrap().is_none());
        assert!(!dir.path().join("objects").exists());

        let mut request = publish_request("u1");
        request.channel = Some("..".to_string());
        request.assets.push(InlineAsset {
            hash: "goodhash".to_string(),
            base64: BASE64.encode(b"ok"),
            content_type: None,
        });
        assert_eq!(admin.publish(request).await.unwrap_err().status_code(), 400);
        assert!(!dir.path().join("objects").exists());

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_duplicate_id_is_rejected() {
        let (admin, store, mut rx) = service();
        admin.publish(publish_request("u1")).await.unwrap();
        rx.recv().await.unwrap();

        let mut again = publish_request("u1");
        again.message = Some("changed".to_string());
        again.assets.push(InlineAsset {
            hash: "newasset".to_string(),
            base64: BASE64.encode(b"x"),
            content_type: None,
        });
        let err = admin.publish(again).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(store.read_asset("newasset").await.unwrap().is_none());

        let history = store.history(&fixtures::ios_key(), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].message.is_none());

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_promote_empty_source_is_404() {
        let (admin, store, mut rx) = service();
        let request = PromoteRequest {
            from_channel: Some("staging".to_string()),
            to_channel: Some("production".to_string()),
            runtime_version: Some("1.0.0".to_string()),
            platform: Some("ios".to_string()),
        };
        let err = admin.promote(request).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let target = fixtures::ios_key().with_channel("production");
        assert!(store.latest(&target).await.unwrap().is_none());
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_promote_copies_at_full_rollout() {
        let (admin, store, mut rx) = service();
        let mut request = publish_request("u1");
        request.channel = Some("staging".to_string());
        request.rollout_percentage = Some(10);
        admin.publish(request).await.unwrap();
        rx.recv().await.unwrap();

        let ack = admin
            .promote(PromoteRequest {
                from_channel: Some("staging".to_string()),
                to_channel: Some("production".to_string()),
                runtime_version: Some("1.0.0".to_string()),
                platform: Some("ios".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(ack.update_id.as_deref(), Some("u1"));

        let head = store
            .latest(&fixtures::ios_key().with_channel("production"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.rollout_percentage, 100);
        assert!(matches!(rx.recv().await.unwrap(), Event::UpdatePromoted { .. }));
    }

    #[tokio::test]
    async fn test_rollout_validation_and_mismatch() {
        let (admin, store, _rx) = service();
        let mut request = publish_request("u1");
        request.rollout_percentage = Some(20);
        admin.publish(request).await.unwrap();

        assert_eq!(admin.rollout(rollout_request("u1", 101)).await.unwrap_err().status_code(), 400);
        assert_eq!(admin.rollout(rollout_request("u1", -1)).await.unwrap_err().status_code(), 400);

        admin.rollout(rollout_request("other", 90)).await.unwrap();
        let head = store.latest(&fixtures::ios_key()).await.unwrap().unwrap();
        assert_eq!(head.rollout_percentage, 20);

        admin.rollout(rollout_request("u1", 90)).await.unwrap();
        let head = store.latest(&fixtures::ios_key()).await.unwrap().unwrap();
        assert_eq!(head.rollout_percentage, 90);
    }

    #[tokio::test]
    async fn test_rollback() {
        let (admin, store, mut rx) = service();
        admin.publish(publish_request("u1")).await.unwrap();
        rx.recv().await.unwrap();

        let err = admin.rollback(rollback_request()).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(store.latest(&fixtures::ios_key()).await.unwrap().unwrap().id(), "u1");

        admin.publish(publish_request("u2")).await.unwrap();
        rx.recv().await.unwrap();
        let ack = admin.rollback(rollback_request()).await.unwrap();
        assert_eq!(ack.active_update_id.as_deref(), Some("u1"));

        match rx.recv().await.unwrap() {
            Event::UpdateRolledBack { rolled_back_id, active_update_id, .. } => {
                assert_eq!(rolled_back_id, "u2");
                assert_eq!(active_update_id, "u1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_updates_limits() {
        let (admin, _store, _rx) = service();
        for i in 0..30 {
            admin.publish(publish_request(&format!("u{i}"))).await.unwrap();
        }

        let query = ListQuery {
            runtime_version: Some("1.0.0".to_string()),
            platform: Some("ios".to_string()),
            ..Default::default()
        };
        let list = admin.list_updates(query.clone()).await.unwrap();
        assert_eq!(list.updates.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(list.updates[0].id(), "u29");

        let list = admin
            .list_updates(ListQuery {
                limit: Some(5),
                ..query.clone()
            })
            .await
            .unwrap();
        assert_eq!(list.updates.len(), 5);

        let list = admin
            .list_updates(ListQuery {
                limit: Some(500),
                ..query
            })
            .await
            .unwrap();
        assert_eq!(list.updates.len(), 30);

        let err = admin.list_updates(ListQuery::default()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_directive_set_and_clear() {
        let (admin, store, mut rx) = service();
        let request = |kind| DirectiveRequest {
            channel: None,
            runtime_version: Some("1.0.0".to_string()),
            platform: Some("ios".to_string()),
            kind,
            commit_time: None,
        };

        admin.set_directive(request(DirectiveKind::NoUpdateAvailable)).await.unwrap();
        assert_eq!(
            store.directive(&fixtures::ios_key()).await.unwrap(),
            Some(Directive::NoUpdateAvailable)
        );
        assert!(matches!(rx.recv().await.unwrap(), Event::DirectiveChanged { directive: Some(_), .. }));

        admin.set_directive(request(DirectiveKind::Clear)).await.unwrap();
        assert!(store.directive(&fixtures::ios_key()).await.unwrap().is_none());
        assert!(matches!(rx.recv().await.unwrap(), Event::DirectiveChanged { directive: None, .. }));
    }

    #[tokio::test]
    async fn test_status_lists_heads() {
        let (admin, _store, _rx) = service();
        admin.publish(publish_request("u1")).await.unwrap();
        admin.publish(publish_request("u2")).await.unwrap();
        let status = admin.status().await.unwrap();
        assert_eq!(status.deployments.len(), 1);
        assert_eq!(status.deployments[0].update.id(), "u2");
    }
}
