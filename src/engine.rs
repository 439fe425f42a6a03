// src/engine.rs
//! Manifest resolution
//!
//! Turns one client request into exactly one of three outcomes:
//! 400 (missing identity), 204 (nothing to apply) or 200 (manifest or
//! directive). The engine keeps no state between requests; everything
//! durable lives behind [`UpdateStore`].
//!
//! Resolution order for a valid request:
//! 1. pending directive (protocol 1 clients only)
//! 2. current update for the deployment key
//! 3. client already on that update
//! 4. rollout partition
//! 5. override hook
//! 6. critical flag, signing, encoding

use crate::error::{Error, Result};
use crate::events::{Event, EventDispatcher};
use crate::model::{Manifest, RequestContext, Update, DEFAULT_CHANNEL};
use crate::protocol::{self, Directive, ProtocolResponse};
use crate::rollout::{in_rollout, ANONYMOUS_DEVICE};
use crate::signing::ManifestSigner;
use crate::storage::UpdateStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Device identity headers, most specific first
const DEVICE_ID_HEADERS: [&str; 2] = ["expo-eas-client-id", "eas-client-id"];

/// Outcome of the override hook
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Serve this update (the candidate or a substitute)
    Keep(Update),
    /// Serve nothing
    Block,
}

/// Per-request hook that may veto or replace the candidate update
#[async_trait]
pub trait UpdateResolver: Send + Sync {
    async fn resolve(&self, update: Update, context: &RequestContext) -> Resolution;
}

/// Adapts a plain closure into an [`UpdateResolver`]
pub struct FnResolver<F>(pub F);

#[async_trait]
impl<F> UpdateResolver for FnResolver<F>
where
    F: Fn(Update, &RequestContext) -> Resolution + Send + Sync,
{
    async fn resolve(&self, update: Update, context: &RequestContext) -> Resolution {
        (self.0)(update, context)
    }
}

/// Raw identity fields of a manifest request, before validation
#[derive(Debug, Clone, Default)]
pub struct ManifestRequest {
    pub platform: Option<String>,
    pub runtime_version: Option<String>,
    pub channel: Option<String>,
    pub current_update_id: Option<String>,
    /// Lowercased header names
    pub headers: BTreeMap<String, String>,
}

impl ManifestRequest {
    /// Validate identity and build the request context
    pub fn into_context(self) -> Result<RequestContext> {
        let (Some(platform), Some(runtime_version)) = (
            non_empty(self.platform),
            non_empty(self.runtime_version),
        ) else {
            return Err(Error::validation("missing required fields"));
        };

        Ok(RequestContext {
            channel: non_empty(self.channel).unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            runtime_version,
            platform: platform.parse()?,
            headers: self.headers,
            current_update_id: non_empty(self.current_update_id),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Device identity used for rollout partitioning
pub fn device_id(context: &RequestContext) -> &str {
    DEVICE_ID_HEADERS
        .iter()
        .find_map(|name| context.header(name))
        .unwrap_or(ANONYMOUS_DEVICE)
}

/// Manifest as served: the stored manifest plus `extra.critical` when flagged
pub fn served_manifest(update: &Update) -> Manifest {
    let mut manifest = update.manifest.clone();
    if update.critical {
        manifest.extra.insert("critical".to_string(), Value::Bool(true));
    }
    manifest
}

/// Stateless manifest and asset resolver
pub struct UpdateEngine {
    store: Arc<dyn UpdateStore>,
    resolver: Option<Arc<dyn UpdateResolver>>,
    signer: Option<ManifestSigner>,
    certificate_chain: Option<String>,
    events: EventDispatcher,
}

impl UpdateEngine {
    pub fn new(store: Arc<dyn UpdateStore>) -> Self {
        Self {
            store,
            resolver: None,
            signer: None,
            certificate_chain: None,
            events: EventDispatcher::disabled(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UpdateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_signer(mut self, signer: ManifestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_certificate_chain(mut self, pem: impl Into<String>) -> Self {
        self.certificate_chain = Some(pem.into());
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<dyn UpdateStore> {
        &self.store
    }

    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Resolve a manifest request to its protocol response
    ///
    /// Returns `Err(Validation)` before touching storage when identity is
    /// missing; storage and signing failures propagate.
    pub async fn resolve_manifest(&self, request: ManifestRequest) -> Result<ProtocolResponse> {
        let context = request.into_context()?;
        let key = context.key();

        if context.header("expo-protocol-version") == Some(protocol::PROTOCOL_VERSION)
            && let Some(directive) = self.store.directive(&key).await?
        {
            debug!("Serving pending directive for {}", key);
            let response = self.render_directive(&directive)?;
            self.events.dispatch(Event::ManifestRequest {
                context,
                served: false,
                update_id: None,
            });
            return Ok(response);
        }

        let Some(update) = self.store.latest(&key).await? else {
            debug!("No update for {}", key);
            return Ok(self.not_served(context));
        };

        if context.current_update_id.as_deref() == Some(update.id()) {
            debug!("Client already on {} for {}", update.id(), key);
            return Ok(self.not_served(context));
        }

        if update.rollout_percentage < 100 {
            let device = device_id(&context);
            if !in_rollout(device, update.id(), update.rollout_percentage) {
                debug!(
                    "Device {} outside {}% rollout of {}",
                    device,
                    update.rollout_percentage,
                    update.id()
                );
                return Ok(self.not_served(context));
            }
        }

        let update = match &self.resolver {
            Some(resolver) => match resolver.resolve(update, &context).await {
                Resolution::Keep(update) => update,
                Resolution::Block => {
                    debug!("Resolver blocked update for {}", key);
                    return Ok(self.not_served(context));
                }
            },
            None => update,
        };

        let manifest_json = serde_json::to_string(&served_manifest(&update))?;
        let signature = self
            .signer
            .as_ref()
            .map(|signer| signer.sign(manifest_json.as_bytes()))
            .transpose()?;

        let response = protocol::manifest_response(
            &manifest_json,
            signature.as_ref(),
            self.certificate_chain.as_deref(),
        );

        debug!("Serving {} for {}", update.id(), key);
        self.events.dispatch(Event::ManifestRequest {
            context,
            served: true,
            update_id: Some(update.id().to_string()),
        });
        Ok(response)
    }

    /// Location of an asset, `None` if it was never stored
    pub async fn resolve_asset(&self, hash: &str) -> Result<Option<String>> {
        let url = self.store.asset_url(hash).await?;
        self.events.dispatch(Event::AssetRequest {
            hash: hash.to_string(),
            found: url.is_some(),
        });
        Ok(url)
    }

    fn render_directive(&self, directive: &Directive) -> Result<ProtocolResponse> {
        let json = directive.to_json();
        let signature = self
            .signer
            .as_ref()
            .map(|signer| signer.sign(json.as_bytes()))
            .transpose()?;
        Ok(protocol::directive_response(&json, signature.as_ref()))
    }

    fn not_served(&self, context: RequestContext) -> ProtocolResponse {
        self.events.dispatch(Event::ManifestRequest {
            context,
            served: false,
            update_id: None,
        });
        protocol::no_update()
    }
}
