// src/events.rs
//! Outcome events and best-effort delivery
//!
//! The engine and admin API describe what happened as an [`Event`] and hand
//! it to the [`EventDispatcher`], which spawns delivery on a detached task.
//! A slow or failing sink never delays or fails a response: errors are
//! logged at debug level and dropped, with no retry and no queue.

use crate::model::{Platform, RequestContext};
use crate::protocol::Directive;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One engine or admin outcome
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    ManifestRequest {
        context: RequestContext,
        served: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        update_id: Option<String>,
    },
    AssetRequest {
        hash: String,
        found: bool,
    },
    UpdatePublished {
        update_id: String,
        channel: String,
        runtime_version: String,
        platform: Platform,
    },
    UpdatePromoted {
        update_id: String,
        from_channel: String,
        to_channel: String,
    },
    RolloutChanged {
        update_id: String,
        percentage: u8,
    },
    UpdateRolledBack {
        channel: String,
        rolled_back_id: String,
        active_update_id: String,
    },
    DirectiveChanged {
        channel: String,
        runtime_version: String,
        platform: Platform,
        directive: Option<Directive>,
    },
}

impl Event {
    /// Short name matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestRequest { .. } => "manifest_request",
            Self::AssetRequest { .. } => "asset_request",
            Self::UpdatePublished { .. } => "update_published",
            Self::UpdatePromoted { .. } => "update_promoted",
            Self::RolloutChanged { .. } => "rollout_changed",
            Self::UpdateRolledBack { .. } => "update_rolled_back",
            Self::DirectiveChanged { .. } => "directive_changed",
        }
    }
}

/// Destination for events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &Event) -> anyhow::Result<()>;
}

/// Fire-and-forget event delivery
#[derive(Clone, Default)]
pub struct EventDispatcher {
    sink: Option<Arc<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Dispatcher that drops everything
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Deliver `event` on a detached task; never blocks, never fails
    pub fn dispatch(&self, event: Event) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, dropping {} event", event.kind());
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = sink.emit(&event).await {
                debug!("Event sink failed for {}: {}", event.kind(), e);
            }
        });
    }
}

/// Logs every event through `tracing`
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::ManifestRequest { context, served, update_id } => debug!(
                channel = %context.channel,
                runtime_version = %context.runtime_version,
                platform = %context.platform,
                served,
                update_id = update_id.as_deref().unwrap_or("-"),
                "manifest_request"
            ),
            Event::AssetRequest { hash, found } => debug!(hash = %hash, found, "asset_request"),
            other => info!(event = %serde_json::to_string(other)?, "{}", other.kind()),
        }
        Ok(())
    }
}

/// POSTs each event as JSON to a URL
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("updraft/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn emit(&self, event: &Event) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Delivers to several sinks; one failing sink does not stop the rest
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn emit(&self, event: &Event) -> anyhow::Result<()> {
        let mut failures = 0usize;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event).await {
                debug!("Fan-out sink failed for {}: {}", event.kind(), e);
                failures += 1;
            }
        }
        if failures > 0 {
            anyhow::bail!("{failures} of {} sinks failed", self.sinks.len());
        }
        Ok(())
    }
}
