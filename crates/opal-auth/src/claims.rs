//! JWT claim shapes used across the pub/sub transport and admin routes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// When present, every `subscribe` call is intersected with this set;
    /// a non-empty unauthorized remainder fails the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted_topics: Option<Vec<String>>,
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Claims synthesized for an unauthenticated caller when signing is
    /// disabled (development mode, no keys configured): every topic is
    /// permitted.
    pub fn anonymous() -> Self {
        Self {
            sub: "anonymous".to_string(),
            iss: String::new(),
            aud: String::new(),
            exp: i64::MAX,
            iat: 0,
            jti: String::new(),
            permitted_topics: None,
            custom: HashMap::new(),
        }
    }

    /// Whether `topic` is allowed by `permitted_topics`. No restriction
    /// configured means every topic is allowed.
    pub fn permits(&self, topic: &str) -> bool {
        match &self.permitted_topics {
            None => true,
            Some(allowed) => allowed.iter().any(|t| t == topic),
        }
    }

    /// Splits `topics` into the subset this caller may subscribe to and the
    /// subset it may not.
    pub fn partition_permitted<'a>(&self, topics: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
        let mut allowed = Vec::new();
        let mut denied = Vec::new();
        for topic in topics {
            if self.permits(topic) {
                allowed.push(topic.as_str());
            } else {
                denied.push(topic.as_str());
            }
        }
        (allowed, denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_permits_everything() {
        let claims = Claims::anonymous();
        assert!(claims.permits("policy:anything"));
    }

    #[test]
    fn restricted_claims_reject_unlisted_topics() {
        let mut claims = Claims::anonymous();
        claims.permitted_topics = Some(vec!["policy:.".to_string()]);
        assert!(claims.permits("policy:."));
        assert!(!claims.permits("secret"));
    }

    #[test]
    fn partition_splits_allowed_and_denied() {
        let mut claims = Claims::anonymous();
        claims.permitted_topics = Some(vec!["policy:.".to_string()]);
        let topics = vec!["policy:.".to_string(), "secret".to_string()];
        let (allowed, denied) = claims.partition_permitted(&topics);
        assert_eq!(allowed, vec!["policy:."]);
        assert_eq!(denied, vec!["secret"]);
    }
}
