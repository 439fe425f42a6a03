// src/model.rs

//! Core data model: updates, manifests, deployment keys
//!
//! Field names serialize in camelCase because the same structures travel
//! over the wire to Expo clients and through the admin JSON API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Channel used when a request does not name one
pub const DEFAULT_CHANNEL: &str = "default";

/// Client platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            other => Err(crate::Error::validation(format!(
                "unknown platform '{other}' (expected ios or android)"
            ))),
        }
    }
}

/// (channel, runtime version, platform) triple scoping all update history
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentKey {
    pub channel: String,
    pub runtime_version: String,
    pub platform: Platform,
}

impl DeploymentKey {
    pub fn new(channel: impl Into<String>, runtime_version: impl Into<String>, platform: Platform) -> Self {
        Self {
            channel: channel.into(),
            runtime_version: runtime_version.into(),
            platform,
        }
    }

    /// Same runtime version and platform, different channel
    pub fn with_channel(&self, channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            runtime_version: self.runtime_version.clone(),
            platform: self.platform,
        }
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.channel, self.runtime_version, self.platform)
    }
}

/// Asset entry inside a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAsset {
    pub hash: String,
    pub key: String,
    pub content_type: String,
    #[serde(default)]
    pub file_extension: String,
    pub url: String,
}

/// Manifest as returned to the client
///
/// Field order here is the serialized order, which is also the byte
/// sequence that gets signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub created_at: String,
    pub runtime_version: String,
    pub launch_asset: ManifestAsset,
    #[serde(default)]
    pub assets: Vec<ManifestAsset>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// A published update with its rollout state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub manifest: Manifest,
    pub rollout_percentage: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub critical: bool,
}

impl Update {
    /// Wrap a manifest as a fresh update at full rollout
    pub fn new(manifest: Manifest) -> Self {
        let now = Utc::now();
        Self {
            manifest,
            rollout_percentage: 100,
            created_at: now,
            updated_at: now,
            message: None,
            critical: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn with_rollout(mut self, percentage: u8) -> Self {
        self.rollout_percentage = percentage.min(100);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

/// Per-request view of an incoming manifest request; never persisted
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub channel: String,
    pub runtime_version: String,
    pub platform: Platform,
    pub headers: BTreeMap<String, String>,
    pub current_update_id: Option<String>,
}

impl RequestContext {
    pub fn key(&self) -> DeploymentKey {
        DeploymentKey::new(self.channel.clone(), self.runtime_version.clone(), self.platform)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// One row of the deployment overview: the current update for a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub channel: String,
    pub runtime_version: String,
    pub platform: Platform,
    pub update: Update,
}

impl StatusEntry {
    pub fn new(key: &DeploymentKey, update: Update) -> Self {
        Self {
            channel: key.channel.clone(),
            runtime_version: key.runtime_version.clone(),
            platform: key.platform,
            update,
        }
    }
}
