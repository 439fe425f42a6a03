// src/server/mod.rs
//! updraft HTTP server
//!
//! Public routes serve manifests and assets to Expo clients; `/admin`
//! routes mutate update state behind an optional bearer token. All
//! request state lives in [`ServerState`], shared behind an `Arc`.

pub mod config;
mod handlers;
pub mod metrics;
mod routes;

pub use config::UpdraftConfig;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use routes::create_router;

use crate::admin::AdminService;
use crate::engine::{UpdateEngine, UpdateResolver};
use crate::events::{EventDispatcher, EventSink, FanoutSink, TracingSink, WebhookSink};
use crate::protocol::ProtocolResponse;
use crate::signing::{load_certificate_chain, ManifestSigner};
use crate::storage::{FileStore, MemoryStore, UpdateStore, DEFAULT_ASSET_BASE_URL};
use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where update state is kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    File(PathBuf),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    pub storage: StorageBackend,
    /// Public prefix for asset URLs
    pub asset_base_url: String,
    /// Ed25519 key file; manifests are unsigned when absent
    pub signing_key_path: Option<PathBuf>,
    pub certificate_chain_path: Option<PathBuf>,
    /// Admin bearer token; admin routes are open when absent
    pub admin_token: Option<String>,
    /// CORS allowed origins (empty = any)
    pub cors_allowed_origins: Vec<String>,
    /// Log events through tracing
    pub log_events: bool,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            storage: StorageBackend::Memory,
            asset_base_url: DEFAULT_ASSET_BASE_URL.to_string(),
            signing_key_path: None,
            certificate_chain_path: None,
            admin_token: None,
            cors_allowed_origins: Vec::new(),
            log_events: true,
            webhook_url: None,
            webhook_timeout: Duration::from_secs(5),
        }
    }
}

/// Optional collaborators for [`ServerState::new`]
#[derive(Default)]
pub struct StateOptions {
    pub admin_token: Option<String>,
    pub signer: Option<ManifestSigner>,
    pub certificate_chain: Option<String>,
    pub resolver: Option<Arc<dyn UpdateResolver>>,
    /// Sinks receiving events in addition to the metrics counters
    pub sinks: Vec<Arc<dyn EventSink>>,
    pub cors_allowed_origins: Vec<String>,
}

/// Shared server state
pub struct ServerState {
    pub engine: UpdateEngine,
    pub admin: AdminService,
    pub metrics: Arc<ServerMetrics>,
    pub admin_token: Option<String>,
    pub cors_allowed_origins: Vec<String>,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(store: Arc<dyn UpdateStore>, options: StateOptions) -> Self {
        let metrics = Arc::new(ServerMetrics::new());

        let mut sinks: Vec<Arc<dyn EventSink>> = vec![metrics.clone()];
        sinks.extend(options.sinks);
        let events = EventDispatcher::new(Arc::new(FanoutSink::new(sinks)));

        let mut engine = UpdateEngine::new(store.clone()).with_events(events.clone());
        if let Some(resolver) = options.resolver {
            engine = engine.with_resolver(resolver);
        }
        if let Some(signer) = options.signer {
            engine = engine.with_signer(signer);
        }
        if let Some(chain) = options.certificate_chain {
            engine = engine.with_certificate_chain(chain);
        }

        Self {
            engine,
            admin: AdminService::new(store, events),
            metrics,
            admin_token: options.admin_token,
            cors_allowed_origins: options.cors_allowed_origins,
        }
    }

    /// Build the store, signer and event sinks a config describes
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let store: Arc<dyn UpdateStore> = match &config.storage {
            StorageBackend::Memory => {
                Arc::new(MemoryStore::with_asset_base_url(&config.asset_base_url))
            }
            StorageBackend::File(root) => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("Failed to create storage root {}", root.display()))?;
                Arc::new(FileStore::with_asset_base_url(root.clone(), &config.asset_base_url))
            }
        };

        let signer = config
            .signing_key_path
            .as_deref()
            .map(ManifestSigner::load_from_file)
            .transpose()?;
        let certificate_chain = config
            .certificate_chain_path
            .as_deref()
            .map(load_certificate_chain)
            .transpose()?;

        let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
        if config.log_events {
            sinks.push(Arc::new(TracingSink));
        }
        if let Some(ref url) = config.webhook_url {
            sinks.push(Arc::new(WebhookSink::new(url, config.webhook_timeout)?));
        }

        Ok(Self::new(
            store,
            StateOptions {
                admin_token: config.admin_token.clone(),
                signer,
                certificate_chain,
                resolver: None,
                sinks,
                cors_allowed_origins: config.cors_allowed_origins.clone(),
            },
        ))
    }
}

impl IntoResponse for ProtocolResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        response
    }
}

/// Start the updraft server
pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!("Starting updraft on {}", config.bind_addr);
    match &config.storage {
        StorageBackend::Memory => tracing::warn!("Storage: memory (state is lost on restart)"),
        StorageBackend::File(root) => tracing::info!("Storage: {}", root.display()),
    }
    match &config.signing_key_path {
        Some(path) => tracing::info!("Signing manifests with {}", path.display()),
        None => tracing::info!("Manifest signing disabled"),
    }
    if config.admin_token.is_none() {
        tracing::warn!("No admin token configured; /admin routes are open to anyone");
    }
    if let Some(ref url) = config.webhook_url {
        tracing::info!("Webhook events: {}", url);
    }

    let state = Arc::new(ServerState::from_config(&config)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("updraft is ready to serve");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("updraft stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
