// src/server/config.rs
//! Configuration file parsing for the updraft server
//!
//! Supports TOML configuration files with the following sections:
//! - [server] - Bind address, CORS origins
//! - [storage] - Backend selection, root directory, public asset prefix
//! - [signing] - Ed25519 key file and optional certificate chain
//! - [admin] - Bearer token for /admin routes
//! - [events] - Event logging and webhook delivery
//!
//! `UPDRAFT_ADMIN_TOKEN` overrides `[admin] token` when set.

use crate::server::{ServerConfig, StorageBackend};
use crate::storage::DEFAULT_ASSET_BASE_URL;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the admin token
pub const ADMIN_TOKEN_ENV: &str = "UPDRAFT_ADMIN_TOKEN";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct UpdraftConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub signing: SigningSection,

    #[serde(default)]
    pub admin: AdminSection,

    #[serde(default)]
    pub events: EventsSection,
}

/// Server configuration section
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

/// Which store backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Volatile, lost on restart
    Memory,
    #[default]
    File,
}

/// Storage configuration section
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: BackendKind,

    /// Root directory for the file backend
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Public prefix for asset URLs (e.g. a CDN in front of /objects)
    #[serde(default = "default_asset_base_url")]
    pub asset_base_url: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            root: default_root(),
            asset_base_url: default_asset_base_url(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/lib/updraft")
}

fn default_asset_base_url() -> String {
    DEFAULT_ASSET_BASE_URL.to_string()
}

/// Code signing section
#[derive(Debug, Default, Deserialize)]
pub struct SigningSection {
    /// TOML key file (`algorithm`, `key`, optional `key_id`)
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// PEM certificate chain sent with signed manifests
    #[serde(default)]
    pub certificate_chain: Option<PathBuf>,
}

/// Admin API section
#[derive(Debug, Default, Deserialize)]
pub struct AdminSection {
    /// Bearer token; when absent the admin API is open
    #[serde(default)]
    pub token: Option<String>,
}

/// Event delivery section
#[derive(Debug, Deserialize)]
pub struct EventsSection {
    /// Log events through tracing
    #[serde(default = "default_true")]
    pub log: bool,

    /// POST each event as JSON to this URL
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout: String,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            log: true,
            webhook_url: None,
            webhook_timeout: default_webhook_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_webhook_timeout() -> String {
    "5s".to_string()
}

impl UpdraftConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: UpdraftConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.override_admin_token(std::env::var(ADMIN_TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replace the admin token when an override is present and non-empty
    pub fn override_admin_token(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.admin.token = Some(token);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid server.bind address: {}", self.server.bind))?;

        if self.storage.backend == BackendKind::File && self.storage.root.as_os_str().is_empty() {
            anyhow::bail!("storage.root must be set for the file backend");
        }

        if self.storage.asset_base_url.is_empty() {
            anyhow::bail!("storage.asset_base_url must not be empty");
        }

        if self.signing.certificate_chain.is_some() && self.signing.key_file.is_none() {
            anyhow::bail!("signing.certificate_chain requires signing.key_file");
        }

        if self.admin.token.as_deref() == Some("") {
            anyhow::bail!("admin.token must not be empty; omit it to leave the admin API open");
        }

        if let Some(ref webhook) = self.events.webhook_url {
            let url = url::Url::parse(webhook)
                .with_context(|| format!("Invalid events.webhook_url: {}", webhook))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("events.webhook_url must be http or https, got '{}'", url.scheme());
            }
        }

        parse_duration(&self.events.webhook_timeout)
            .with_context(|| format!("Invalid events.webhook_timeout: {}", self.events.webhook_timeout))?;

        Ok(())
    }

    /// Convert to the internal ServerConfig structure
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let bind_addr = self.server.bind.parse()?;

        let storage = match self.storage.backend {
            BackendKind::Memory => StorageBackend::Memory,
            BackendKind::File => StorageBackend::File(self.storage.root.clone()),
        };

        Ok(ServerConfig {
            bind_addr,
            storage,
            asset_base_url: self.storage.asset_base_url.clone(),
            signing_key_path: self.signing.key_file.clone(),
            certificate_chain_path: self.signing.certificate_chain.clone(),
            admin_token: self.admin.token.clone(),
            cors_allowed_origins: self.server.cors_origins.clone(),
            log_events: self.events.log,
            webhook_url: self.events.webhook_url.clone(),
            webhook_timeout: parse_duration(&self.events.webhook_timeout)?,
        })
    }
}

/// Parse duration string (e.g., "30s", "15m", "1h", "2d")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        return n
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .with_context(|| format!("Invalid duration number: {}", n));
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 24 * 60 * 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    let secs = num
        .checked_mul(multiplier)
        .with_context(|| format!("Duration out of range: {}", s))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(15 * 60));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(2 * 24 * 3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration("999999999999999999d").is_err());
        assert!(parse_duration("18446744073709551615m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_default_config() {
        let config = UpdraftConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.storage.backend, BackendKind::File);
        assert!(config.admin.token.is_none());

        let server = config.to_server_config().unwrap();
        assert_eq!(server.storage, StorageBackend::File(PathBuf::from("/var/lib/updraft")));
        assert_eq!(server.asset_base_url, "/objects");
        assert_eq!(server.webhook_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:4000"
cors_origins = ["https://console.example.com"]

[storage]
backend = "memory"
asset_base_url = "https://cdn.example.com/objects"

[signing]
key_file = "/etc/updraft/signing.key"
certificate_chain = "/etc/updraft/chain.pem"

[admin]
token = "s3cret"

[events]
log = false
webhook_url = "https://hooks.example.com/updraft"
webhook_timeout = "2s"
"#;
        let config: UpdraftConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());

        let server = config.to_server_config().unwrap();
        assert_eq!(server.bind_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(server.storage, StorageBackend::Memory);
        assert_eq!(server.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(server.cors_allowed_origins.len(), 1);
        assert!(!server.log_events);
        assert_eq!(server.webhook_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_bind() {
        let config: UpdraftConfig = toml::from_str("[server]\nbind = \"nowhere\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_requires_key() {
        let config: UpdraftConfig =
            toml::from_str("[signing]\ncertificate_chain = \"/tmp/chain.pem\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_webhook() {
        let config: UpdraftConfig =
            toml::from_str("[events]\nwebhook_url = \"ftp://example.com\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: UpdraftConfig = toml::from_str("[events]\nwebhook_url = \"not a url\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_token_rejected() {
        let config: UpdraftConfig = toml::from_str("[admin]\ntoken = \"\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(toml::from_str::<UpdraftConfig>("[storage]\nbackend = \"s3\"\n").is_err());
    }

    #[test]
    fn test_admin_token_override() {
        let mut config: UpdraftConfig = toml::from_str("[admin]\ntoken = \"from-file\"\n").unwrap();
        config.override_admin_token(None);
        assert_eq!(config.admin.token.as_deref(), Some("from-file"));

        config.override_admin_token(Some(String::new()));
        assert_eq!(config.admin.token.as_deref(), Some("from-file"));

        config.override_admin_token(Some("from-env".to_string()));
        assert_eq!(config.admin.token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("updraft.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();
        let config = UpdraftConfig::load(&path).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Memory);

        assert!(UpdraftConfig::load(&temp_dir.path().join("missing.toml")).is_err());
    }
}
