// src/signing.rs
//! Manifest signing
//!
//! Signs manifest (and directive) part bodies with Ed25519. Keys are read
//! from TOML key files:
//!
//! ```toml
//! algorithm = "ed25519"
//! key = "<base64 32-byte secret>"
//! key_id = "main"
//! ```
//!
//! Key generation is left to external tooling.

use crate::error::{Error, Result};
use crate::protocol::PartSignature;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Key id used when the key file does not name one
pub const DEFAULT_KEY_ID: &str = "main";

/// Ed25519 signer for protocol parts
pub struct ManifestSigner {
    signing_key: SigningKey,
    key_id: String,
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("key_id", &self.key_id)
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

impl ManifestSigner {
    pub fn from_signing_key(key: SigningKey) -> Self {
        Self {
            signing_key: key,
            key_id: DEFAULT_KEY_ID.to_string(),
        }
    }

    /// Build from a base64-encoded 32-byte secret
    pub fn from_base64(secret: &str) -> anyhow::Result<Self> {
        let key_bytes = BASE64
            .decode(secret.trim())
            .context("Invalid base64 in signing key")?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid key length (expected 32 bytes)"))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&key_array)))
    }

    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = id.to_string();
        self
    }

    /// Load a signer from a TOML key file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file: {}", path.display()))?;

        let key_file: KeyFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse key file: {}", path.display()))?;

        if key_file.algorithm != "ed25519" {
            anyhow::bail!("Unsupported key algorithm: {}", key_file.algorithm);
        }

        let signer = Self::from_base64(&key_file.key)
            .with_context(|| format!("Bad key in {}", path.display()))?;
        Ok(match key_file.key_id {
            Some(id) => signer.with_key_id(&id),
            None => signer,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    /// Sign exactly these bytes
    pub fn sign(&self, content: &[u8]) -> Result<PartSignature> {
        let signature = self
            .signing_key
            .try_sign(content)
            .map_err(|e| Error::Signing(e.to_string()))?;

        Ok(PartSignature {
            sig: BASE64.encode(signature.to_bytes()),
            key_id: self.key_id.clone(),
        })
    }
}

/// Key file format
#[derive(Debug, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

/// Read a PEM certificate chain, checking it holds at least one certificate
pub fn load_certificate_chain(path: &Path) -> anyhow::Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read certificate chain: {}", path.display()))?;

    let blocks = pem::parse_many(&content)
        .with_context(|| format!("Invalid PEM in {}", path.display()))?;
    if !blocks.iter().any(|b| b.tag() == "CERTIFICATE") {
        anyhow::bail!("No CERTIFICATE block in {}", path.display());
    }

    Ok(content.trim_end().to_string())
}
