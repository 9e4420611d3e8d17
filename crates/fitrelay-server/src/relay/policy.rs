//! Who may claim the privileged role.
//!
//! The default policy accepts any `connect-python` handshake, which is what
//! deployed browser and pose-analysis clients expect. Setting
//! `relay.claim_secret` switches to a shared-secret check.

use super::registry::ConnectionId;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Payload field holding the shared secret on `connect-python`.
pub const CLAIM_SECRET_FIELD: &str = "secret";

/// Decides whether a connection's privileged-role claim is honored.
pub trait ClaimPolicy: Send {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Whether `conn_id` may become privileged, given its handshake payload.
    fn authorize(&self, conn_id: ConnectionId, data: &Value) -> bool;
}

/// Any handshake succeeds; the last claimant wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClaim;

impl ClaimPolicy for OpenClaim {
    fn name(&self) -> &'static str {
        "open"
    }

    fn authorize(&self, _conn_id: ConnectionId, _data: &Value) -> bool {
        true
    }
}

/// Handshake must carry `{"secret": "<configured value>"}`.
#[derive(Clone)]
pub struct SharedSecretClaim {
    digest: [u8; 32],
}

impl SharedSecretClaim {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: digest(secret),
        }
    }
}

impl std::fmt::Debug for SharedSecretClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretClaim").finish_non_exhaustive()
    }
}

impl ClaimPolicy for SharedSecretClaim {
    fn name(&self) -> &'static str {
        "shared-secret"
    }

    fn authorize(&self, _conn_id: ConnectionId, data: &Value) -> bool {
        let Some(offered) = data.get(CLAIM_SECRET_FIELD).and_then(Value::as_str) else {
            return false;
        };
        let offered = digest(offered);
        // Fixed-length digests, compared without early exit.
        offered
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn digest(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(s.as_bytes()));
    out
}

/// Build the policy for an optional configured secret.
pub fn from_secret(secret: Option<&str>) -> Box<dyn ClaimPolicy> {
    match secret {
        Some(s) if !s.is_empty() => Box::new(SharedSecretClaim::new(s)),
        _ => Box::new(OpenClaim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_accepts_anything() {
        let policy = OpenClaim;
        assert!(policy.authorize(1, &Value::Null));
        assert!(policy.authorize(2, &json!({ "secret": "whatever" })));
    }

    #[test]
    fn shared_secret_requires_match() {
        let policy = SharedSecretClaim::new("hunter2");
        assert!(policy.authorize(1, &json!({ "secret": "hunter2" })));
        assert!(!policy.authorize(1, &json!({ "secret": "hunter3" })));
        assert!(!policy.authorize(1, &json!({ "secret": 42 })));
        assert!(!policy.authorize(1, &Value::Null));
    }

    #[test]
    fn empty_secret_means_open() {
        assert_eq!(from_secret(None).name(), "open");
        assert_eq!(from_secret(Some("")).name(), "open");
        assert_eq!(from_secret(Some("s3cret")).name(), "shared-secret");
    }
}
