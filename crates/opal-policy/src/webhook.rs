//! Webhook Intake (spec §4.8): validates the provider's signature or
//! token, matches the payload against the configured upstream identifier,
//! and on success publishes on the internal `webhook` topic. No policy
//! action runs synchronously — the leader's subscription does the work.

use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{PolicyError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_TOPIC: &str = "webhook";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    /// Provider sends an HMAC-SHA256 of the raw body.
    Signature,
    /// Provider echoes back a shared secret verbatim.
    Token,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_secret_header_name")]
    pub secret_header_name: String,
    /// Regex applied to the header value; first capture group is the
    /// secret (some providers prefix it, e.g. `sha256=<hex>`).
    #[serde(default = "default_secret_parsing_regex")]
    pub secret_parsing_regex: String,
    #[serde(default = "default_secret_type")]
    pub secret_type: SecretType,
    /// The upstream repo/bundle identifier this server watches; a webhook
    /// payload must reference it (by URL or `full_name`) to be accepted.
    pub upstream_identifier: String,
}

fn default_secret_header_name() -> String {
    "X-Hub-Signature-256".to_string()
}

fn default_secret_parsing_regex() -> String {
    "^(.*)$".to_string()
}

fn default_secret_type() -> SecretType {
    SecretType::Signature
}

pub struct WebhookIntake {
    config: WebhookConfig,
}

impl WebhookIntake {
    pub fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Header name the provider's signature or token arrives on, so the
    /// caller can pull it out of the request before calling
    /// [`Self::validate_secret`].
    pub fn header_name(&self) -> &str {
        &self.config.secret_header_name
    }

    /// Validates the secret carried in `header_value` against `body`.
    /// `Ok(true)` means the configured secret was absent (webhook accepted
    /// without authentication, matching the original's "not recommended
    /// but possible" escape hatch).
    pub fn validate_secret(&self, header_value: Option<&str>, body: &[u8]) -> Result<()> {
        let Some(secret) = &self.config.secret else {
            return Ok(());
        };

        let pattern = Regex::new(&self.config.secret_parsing_regex)
            .map_err(|_| PolicyError::WebhookUnauthorized)?;
        let incoming = header_value
            .and_then(|h| pattern.captures(h))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(PolicyError::WebhookUnauthorized)?;

        match self.config.secret_type {
            SecretType::Signature => {
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|_| PolicyError::WebhookUnauthorized)?;
                mac.update(body);
                let signature =
                    hex::decode(incoming).map_err(|_| PolicyError::WebhookUnauthorized)?;
                mac.verify_slice(&signature)
                    .map_err(|_| PolicyError::WebhookUnauthorized)?;
            }
            SecretType::Token => {
                let matches: bool =
                    incoming.as_bytes().ct_eq(secret.as_bytes()).into();
                if !matches {
                    return Err(PolicyError::WebhookUnauthorized);
                }
            }
        }
        Ok(())
    }

    /// Whether the payload's repository identifiers match the configured
    /// upstream. Looks for common provider shapes: `repository.{url,
    /// clone_url, ssh_url, full_name}` and `project.{git_http_url,
    /// path_with_namespace}`.
    pub fn matches_upstream(&self, payload: &Value) -> bool {
        let candidates = [
            payload.pointer("/repository/url"),
            payload.pointer("/repository/clone_url"),
            payload.pointer("/repository/ssh_url"),
            payload.pointer("/repository/git_url"),
            payload.pointer("/repository/full_name"),
            payload.pointer("/project/git_http_url"),
            payload.pointer("/project/git_ssh_url"),
            payload.pointer("/project/path_with_namespace"),
        ];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .any(|candidate| candidate == self.config.upstream_identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake(secret_type: SecretType) -> WebhookIntake {
        WebhookIntake::new(WebhookConfig {
            secret: Some("topsecret".to_string()),
            secret_header_name: "X-Hub-Signature-256".to_string(),
            secret_parsing_regex: r"^sha256=(.+)$".to_string(),
            secret_type,
            upstream_identifier: "https://github.com/example/policy".to_string(),
        })
    }

    #[test]
    fn signature_validation_accepts_correct_hmac() {
        let intake = intake(SecretType::Signature);
        let body = br#"{"ping":true}"#;
        let mut mac = HmacSha256::new_from_slice(b"topsecret").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());
        let header = format!("sha256={signature}");
        assert!(intake.validate_secret(Some(&header), body).is_ok());
    }

    #[test]
    fn signature_validation_rejects_wrong_hmac() {
        let intake = intake(SecretType::Signature);
        let header = "sha256=deadbeef";
        assert!(intake.validate_secret(Some(header), b"{}").is_err());
    }

    #[test]
    fn token_validation_is_exact_match() {
        let mut config = intake(SecretType::Token);
        config.config.secret_parsing_regex = r"^(.+)$".to_string();
        assert!(config.validate_secret(Some("topsecret"), b"{}").is_ok());
        assert!(config.validate_secret(Some("wrong"), b"{}").is_err());
    }

    #[test]
    fn missing_header_is_rejected_when_secret_configured() {
        let intake = intake(SecretType::Signature);
        assert!(intake.validate_secret(None, b"{}").is_err());
    }

    #[test]
    fn no_secret_configured_accepts_anything() {
        let mut config = intake(SecretType::Signature);
        config.config.secret = None;
        assert!(config.validate_secret(None, b"{}").is_ok());
    }

    #[test]
    fn matches_upstream_checks_common_shapes() {
        let intake = intake(SecretType::Signature);
        let payload = serde_json::json!({"repository": {"url": "https://github.com/example/policy"}});
        assert!(intake.matches_upstream(&payload));
        let other = serde_json::json!({"repository": {"url": "https://github.com/other/repo"}});
        assert!(!intake.matches_upstream(&other));
    }
}
