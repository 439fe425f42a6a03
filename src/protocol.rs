// src/protocol.rs

//! Expo Updates protocol encoding
//!
//! Builds the exact bytes for the three response shapes a client can get
//! from the manifest endpoint:
//! - no update: 204 with protocol headers only
//! - manifest: multipart body with `manifest`, `extensions` and an optional
//!   `certificate_chain` part
//! - directive: multipart body with a single `directive` part
//!
//! Client parsers scan for this structure byte by byte, so part order,
//! header spelling and the closing boundary (followed by CRLF) are fixed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Multipart boundary token
pub const BOUNDARY: &str = "updraft-boundary";

pub const PROTOCOL_VERSION: &str = "1";
pub const SFV_VERSION: &str = "0";
pub const CACHE_CONTROL: &str = "private, max-age=0";

/// Header carrying a part signature
pub const SIGNATURE_HEADER: &str = "expo-signature";

const CRLF: &str = "\r\n";

/// Encoded response, independent of any HTTP framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl ProtocolResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Signature over a part body, rendered as a structured-field header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSignature {
    pub sig: String,
    pub key_id: String,
}

impl PartSignature {
    pub fn header_value(&self) -> String {
        format!("sig=\"{}\", keyid=\"{}\"", self.sig, self.key_id)
    }
}

/// Operator-forced instruction sent instead of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Directive {
    #[serde(rename = "noUpdateAvailable")]
    NoUpdateAvailable,
    #[serde(rename = "rollBackToEmbedded")]
    RollBackToEmbedded { parameters: RollBackParameters },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollBackParameters {
    #[serde(rename = "commitTime")]
    pub commit_time: DateTime<Utc>,
}

impl Directive {
    pub fn roll_back_to_embedded(commit_time: DateTime<Utc>) -> Self {
        Self::RollBackToEmbedded {
            parameters: RollBackParameters { commit_time },
        }
    }

    pub fn to_json(&self) -> String {
        // Plain enum of strings and a timestamp; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// One part of a multipart body
struct Part<'a> {
    name: &'a str,
    content_type: &'a str,
    signature: Option<&'a PartSignature>,
    body: &'a str,
}

fn protocol_headers() -> Vec<(&'static str, String)> {
    vec![
        ("expo-protocol-version", PROTOCOL_VERSION.to_string()),
        ("expo-sfv-version", SFV_VERSION.to_string()),
        ("cache-control", CACHE_CONTROL.to_string()),
    ]
}

fn multipart_content_type() -> String {
    format!("multipart/mixed; boundary={BOUNDARY}")
}

fn encode_parts(parts: &[Part<'_>]) -> Vec<u8> {
    let mut out = String::new();
    for part in parts {
        out.push_str("--");
        out.push_str(BOUNDARY);
        out.push_str(CRLF);
        out.push_str(&format!("Content-Disposition: inline; name=\"{}\"", part.name));
        out.push_str(CRLF);
        out.push_str("Content-Type: ");
        out.push_str(part.content_type);
        out.push_str(CRLF);
        if let Some(sig) = part.signature {
            out.push_str(SIGNATURE_HEADER);
            out.push_str(": ");
            out.push_str(&sig.header_value());
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
        out.push_str(part.body);
        out.push_str(CRLF);
    }
    out.push_str("--");
    out.push_str(BOUNDARY);
    out.push_str("--");
    out.push_str(CRLF);
    out.into_bytes()
}

/// 204 response: the client keeps what it has
pub fn no_update() -> ProtocolResponse {
    ProtocolResponse {
        status: 204,
        headers: protocol_headers(),
        body: Vec::new(),
    }
}

/// 200 multipart response carrying a manifest
///
/// `manifest_json` must be the exact bytes that were signed, if signed.
pub fn manifest_response(
    manifest_json: &str,
    signature: Option<&PartSignature>,
    certificate_chain: Option<&str>,
) -> ProtocolResponse {
    let mut parts = vec![
        Part {
            name: "manifest",
            content_type: "application/json",
            signature,
            body: manifest_json,
        },
        Part {
            name: "extensions",
            content_type: "application/json",
            signature: None,
            body: "{}",
        },
    ];
    if let Some(chain) = certificate_chain {
        parts.push(Part {
            name: "certificate_chain",
            content_type: "application/x-pem-file",
            signature: None,
            body: chain,
        });
    }

    let mut headers = protocol_headers();
    headers.push(("content-type", multipart_content_type()));

    ProtocolResponse {
        status: 200,
        headers,
        body: encode_parts(&parts),
    }
}

/// 200 multipart response carrying a single directive
pub fn directive_response(directive_json: &str, signature: Option<&PartSignature>) -> ProtocolResponse {
    let parts = [Part {
        name: "directive",
        content_type: "application/json",
        signature,
        body: directive_json,
    }];

    let mut headers = protocol_headers();
    headers.push(("content-type", multipart_content_type()));

    ProtocolResponse {
        status: 200,
        headers,
        body: encode_parts(&parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn body_str(resp: &ProtocolResponse) -> &str {
        std::str::from_utf8(&resp.body).unwrap()
    }

    #[test]
    fn test_no_update() {
        let resp = no_update();
        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
        assert_eq!(resp.header("expo-protocol-version"), Some("1"));
        assert_eq!(resp.header("expo-sfv-version"), Some("0"));
        assert_eq!(resp.header("cache-control"), Some("private, max-age=0"));
        assert_eq!(resp.header("content-type"), None);
    }

    #[test]
    fn test_manifest_body_exact() {
        let resp = manifest_response(r#"{"id":"u1"}"#, None, None);
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.header("content-type"),
            Some("multipart/mixed; boundary=updraft-boundary")
        );
        let expected = "--updraft-boundary\r\n\
            Content-Disposition: inline; name=\"manifest\"\r\n\
            Content-Type: application/json\r\n\
            \r\n\
            {\"id\":\"u1\"}\r\n\
            --updraft-boundary\r\n\
            Content-Disposition: inline; name=\"extensions\"\r\n\
            Content-Type: application/json\r\n\
            \r\n\
            {}\r\n\
            --updraft-boundary--\r\n";
        assert_eq!(body_str(&resp), expected);
    }

    #[test]
    fn test_manifest_with_signature_and_chain() {
        let sig = PartSignature {
            sig: "c2ln".to_string(),
            key_id: "main".to_string(),
        };
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----";
        let resp = manifest_response(r#"{"id":"u1"}"#, Some(&sig), Some(pem));
        let body = body_str(&resp);

        assert!(body.contains(
            "Content-Type: application/json\r\nexpo-signature: sig=\"c2ln\", keyid=\"main\"\r\n\r\n{\"id\":\"u1\"}"
        ));
        // Signature only on the manifest part
        assert_eq!(body.matches("expo-signature").count(), 1);

        let manifest_at = body.find("name=\"manifest\"").unwrap();
        let extensions_at = body.find("name=\"extensions\"").unwrap();
        let chain_at = body.find("name=\"certificate_chain\"").unwrap();
        assert!(manifest_at < extensions_at && extensions_at < chain_at);
        assert!(body.contains("Content-Type: application/x-pem-file\r\n\r\n-----BEGIN CERTIFICATE-----"));
        assert!(body.ends_with("-----END CERTIFICATE-----\r\n--updraft-boundary--\r\n"));
    }

    #[test]
    fn test_directive_roll_back_exact() {
        let commit = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let json = Directive::roll_back_to_embedded(commit).to_json();
        assert_eq!(
            json,
            r#"{"type":"rollBackToEmbedded","parameters":{"commitTime":"2025-03-01T12:00:00Z"}}"#
        );

        let resp = directive_response(&json, None);
        let expected = format!(
            "--updraft-boundary\r\n\
             Content-Disposition: inline; name=\"directive\"\r\n\
             Content-Type: application/json\r\n\
             \r\n\
             {json}\r\n\
             --updraft-boundary--\r\n"
        );
        assert_eq!(resp.status, 200);
        assert_eq!(body_str(&resp), expected);
    }

    #[test]
    fn test_directive_no_update_json() {
        assert_eq!(
            Directive::NoUpdateAvailable.to_json(),
            r#"{"type":"noUpdateAvailable"}"#
        );
        let parsed: Directive = serde_json::from_str(r#"{"type":"noUpdateAvailable"}"#).unwrap();
        assert_eq!(parsed, Directive::NoUpdateAvailable);
    }
}
