//! JWT signing and verification, including the "development mode" rule
//! carried over from the original implementation: when neither a private
//! nor a public key is configured, signing and verification are both
//! disabled and every caller is treated as authenticated.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::claims::Claims;
use crate::error::AuthError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtSignerConfig {
    #[serde(default)]
    pub private_key_pem: Option<String>,
    #[serde(default)]
    pub public_key_pem: Option<String>,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub kid: String,
}

struct Enabled {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwks: Jwks,
}

/// Issues and validates JWTs for the pub/sub transport and the admin
/// `/token` route. Construct via [`JwtSigner::new`]; when both keys are
/// absent from the config it comes up disabled rather than erroring, which
/// is the documented development-mode behavior.
pub struct JwtSigner {
    enabled: Option<Enabled>,
    issuer: String,
    audience: String,
}

impl JwtSigner {
    pub fn new(config: JwtSignerConfig) -> Result<Self, AuthError> {
        match (&config.private_key_pem, &config.public_key_pem) {
            (None, None) => Ok(Self {
                enabled: None,
                issuer: config.issuer,
                audience: config.audience,
            }),
            (Some(private_pem), Some(public_pem)) => {
                let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())?;
                let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())?;
                let jwks = build_jwks(public_pem, &config.kid)?;
                Ok(Self {
                    enabled: Some(Enabled {
                        encoding_key,
                        decoding_key,
                        jwks,
                    }),
                    issuer: config.issuer,
                    audience: config.audience,
                })
            }
            _ => Err(AuthError::Unauthorized(
                "private_key_pem and public_key_pem must be configured together".into(),
            )),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.is_some()
    }

    pub fn sign(
        &self,
        sub: &str,
        ttl: Duration,
        custom: HashMap<String, serde_json::Value>,
    ) -> Result<String, AuthError> {
        let enabled = self.enabled.as_ref().ok_or(AuthError::SigningDisabled)?;
        let now = OffsetDateTime::now_utc();
        let exp = now + time::Duration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: sub.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            permitted_topics: None,
            custom,
        };
        Ok(encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &enabled.encoding_key,
        )?)
    }

    /// Validates `token` against issuer, audience, and expiry. Returns
    /// [`Claims::anonymous`] without inspecting `token` at all when signing
    /// is disabled, per the development-mode contract.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let Some(enabled) = &self.enabled else {
            return Ok(Claims::anonymous());
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        let data = decode::<Claims>(token, &enabled.decoding_key, &validation).map_err(|e| {
            if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) {
                AuthError::TokenExpired
            } else {
                AuthError::InvalidToken(e.to_string())
            }
        })?;
        Ok(data.claims)
    }

    pub fn jwks(&self) -> Jwks {
        self.enabled
            .as_ref()
            .map(|e| e.jwks.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

fn build_jwks(public_key_pem: &str, kid: &str) -> Result<Jwks, AuthError> {
    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;

    let key = rsa::RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AuthError::Unauthorized(format!("invalid RSA public key: {e}")))?;
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let n = engine.encode(key.n().to_bytes_be());
    let e = engine.encode(key.e().to_bytes_be());

    Ok(Jwks {
        keys: vec![Jwk {
            kty: "RSA".to_string(),
            kid: kid.to_string(),
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            n,
            e,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_signer_has_empty_jwks() {
        let signer = JwtSigner::new(JwtSignerConfig::default()).unwrap();
        assert!(!signer.is_enabled());
        assert!(signer.jwks().keys.is_empty());
    }

    #[test]
    fn disabled_signer_rejects_signing() {
        let signer = JwtSigner::new(JwtSignerConfig::default()).unwrap();
        let err = signer.sign("client", Duration::from_secs(60), HashMap::new());
        assert!(matches!(err, Err(AuthError::SigningDisabled)));
    }

    #[test]
    fn disabled_signer_verify_returns_anonymous() {
        let signer = JwtSigner::new(JwtSignerConfig::default()).unwrap();
        let claims = signer.verify("anything").unwrap();
        assert_eq!(claims.sub, "anonymous");
    }

    #[test]
    fn mismatched_keys_is_an_error() {
        let config = JwtSignerConfig {
            private_key_pem: Some("pem".to_string()),
            ..Default::default()
        };
        assert!(JwtSigner::new(config).is_err());
    }
}
