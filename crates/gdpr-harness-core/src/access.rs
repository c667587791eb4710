//! Short-lived access tokens: compact HS256 JWTs.
//!
//! Claims are `sub` (user id as a string), `tenant_id`, `role`, `iat`,
//! and `exp`. Verification checks the header algorithm, the HMAC-SHA256
//! signature (constant-time), and expiry. Every failure maps to
//! [`Error::Unauthorized`]; callers must still compare the claims with the
//! live user record before trusting them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::models::{SessionUser, TenantId, UserId};

type HmacSha256 = Hmac<Sha256>;

const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub tenant_id: TenantId,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn user_id(&self) -> Option<UserId> {
        self.sub.parse().ok()
    }
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// Signs and verifies access tokens with a shared secret.
#[derive(Clone)]
pub struct AccessTokenSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for AccessTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl AccessTokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self> {
        let key = secret.into();
        if key.is_empty() {
            return Err(Error::InvalidInput("signing secret must not be empty".into()));
        }
        if ttl <= Duration::zero() {
            return Err(Error::InvalidInput("access token ttl must be positive".into()));
        }
        Ok(Self { key, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Storage(anyhow::anyhow!("hmac key rejected: {}", e)))
    }

    /// Issue a token for `user`. Returns the token and its expiry.
    pub fn sign(&self, user: &SessionUser, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>)> {
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            sub: user.id.to_string(),
            tenant_id: user.tenant_id,
            role: user.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| Error::Storage(anyhow::anyhow!("encode claims: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER_JSON),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok((format!("{}.{}", signing_input, signature), expires_at))
    }

    /// Validate a token and return its claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims> {
        let mut parts = token.split('.');
        let (Some(header_seg), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Unauthorized);
        };

        let header: Header = decode_json(header_seg)?;
        if header.alg != "HS256" {
            return Err(Error::Unauthorized);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Error::Unauthorized)?;
        let signing_input = format!("{}.{}", header_seg, payload);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::Unauthorized)?;

        let claims: AccessClaims = decode_json(payload)?;
        if claims.exp <= now.timestamp() {
            return Err(Error::Unauthorized);
        }
        Ok(claims)
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::Unauthorized)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::Unauthorized)
}
