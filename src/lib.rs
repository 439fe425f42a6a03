// src/lib.rs

//! updraft: over-the-air update server for Expo clients
//!
//! Distributes JavaScript bundle updates over the Expo Updates protocol and
//! lets operators publish, promote, roll out and roll back updates across
//! named channels.
//!
//! # Architecture
//!
//! - Storage: all durable state behind the `UpdateStore` trait (memory and
//!   filesystem backends included)
//! - Rollout: stateless, hash-based device partitioning
//! - Engine: per-request resolution to a 204 or a multipart response
//! - Admin: validated mutations, each followed by one event
//! - Events: fire-and-forget delivery to tracing, webhooks and metrics

pub mod admin;
pub mod engine;
mod error;
pub mod events;
pub mod model;
pub mod protocol;
pub mod rollout;
pub mod server;
pub mod signing;
pub mod storage;

pub use admin::AdminService;
pub use engine::{FnResolver, ManifestRequest, Resolution, UpdateEngine, UpdateResolver};
pub use error::{Error, Result};
pub use events::{Event, EventDispatcher, EventSink};
pub use model::{DeploymentKey, Manifest, ManifestAsset, Platform, RequestContext, Update};
pub use rollout::in_rollout;
pub use signing::ManifestSigner;
pub use storage::{FileStore, MemoryStore, RolledBack, UpdateStore};
