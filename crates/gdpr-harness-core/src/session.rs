//! Session issuance and refresh-token rotation with reuse detection.
//!
//! Each login starts a token *family*. Every refresh spends the presented
//! token and issues its successor in the same family, so a family has at
//! most one usable token at a time. Presenting a spent token again is
//! treated as theft: the whole family is revoked and the caller gets
//! [`Error::TokenReuseDetected`].
//!
//! ```text
//! active ──refresh──▶ rotated (replaced_by_token = successor)
//!   │
//!   ├── spent token presented ──▶ family revoked (reuse_detected)
//!   └── expires_at < now ──▶ expired (derived, never stored)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::AccessTokenSigner;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{RefreshToken, RevokedReason, SessionUser, TenantId, UserId};
use crate::store::{TokenStore, UserDirectory};

pub const DEFAULT_REFRESH_TTL_DAYS: i64 = 30;
pub const DEFAULT_TOKEN_RETENTION_DAYS: i64 = 30;

/// Issued credentials returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub family_id: String,
}

/// Issues and rotates sessions against a token store.
///
/// Generic over the store so the same protocol runs on SQLite and in
/// memory.
pub struct SessionManager<S> {
    store: Arc<S>,
    signer: AccessTokenSigner,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
}

impl<S> SessionManager<S>
where
    S: TokenStore + UserDirectory,
{
    pub fn new(
        store: Arc<S>,
        signer: AccessTokenSigner,
        clock: Arc<dyn Clock>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            signer,
            clock,
            refresh_ttl,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn signer(&self) -> &AccessTokenSigner {
        &self.signer
    }

    fn new_refresh_token(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        family_id: &str,
        now: DateTime<Utc>,
    ) -> RefreshToken {
        RefreshToken {
            id: 0,
            user_id,
            tenant_id,
            family_id: family_id.to_string(),
            token: Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            last_used_at: None,
            revoked: false,
            revoked_reason: None,
            replaced_by_token: None,
        }
    }

    /// Start a new session (login): fresh family, first refresh token,
    /// and an access token.
    pub async fn issue(&self, user: &SessionUser) -> Result<SessionTokens> {
        if !user.active {
            return Err(Error::Unauthorized);
        }
        let now = self.clock.now();
        let family_id = Uuid::new_v4().to_string();
        let refresh = self
            .store
            .insert_refresh_token(&self.new_refresh_token(user.id, user.tenant_id, &family_id, now))
            .await?;
        let (access_token, access_expires_at) = self.signer.sign(user, now)?;

        info!(user_id = user.id, tenant_id = user.tenant_id, family_id = %family_id, "session issued");
        Ok(SessionTokens {
            access_token,
            access_expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
            family_id,
        })
    }

    /// Spend `presented` and return its successor with a new access token.
    ///
    /// Failure order: unknown token, spent token (revokes the family),
    /// expired token, owner no longer valid. None of these are retried.
    pub async fn refresh(&self, presented: &str) -> Result<SessionTokens> {
        let now = self.clock.now();
        let current = self
            .store
            .find_refresh_token(presented)
            .await?
            .ok_or(Error::InvalidToken)?;

        if current.is_spent() {
            return Err(self.burn_family(&current, now).await);
        }
        if current.is_expired(now) {
            return Err(Error::TokenExpired);
        }

        let user = self
            .store
            .find_user(current.user_id)
            .await?
            .filter(|u| u.active && u.tenant_id == current.tenant_id)
            .ok_or(Error::InvalidToken)?;

        let successor = self.new_refresh_token(user.id, user.tenant_id, &current.family_id, now);
        if !self
            .store
            .rotate_refresh_token(&current.token, &successor, now)
            .await?
        {
            // Someone else spent it between our read and the conditional update.
            return Err(self.burn_family(&current, now).await);
        }

        let (access_token, access_expires_at) = self.signer.sign(&user, now)?;
        info!(user_id = user.id, family_id = %current.family_id, "refresh token rotated");
        Ok(SessionTokens {
            access_token,
            access_expires_at,
            refresh_token: successor.token,
            refresh_expires_at: successor.expires_at,
            family_id: current.family_id,
        })
    }

    async fn burn_family(&self, token: &RefreshToken, now: DateTime<Utc>) -> Error {
        match self
            .store
            .revoke_family(&token.family_id, &RevokedReason::ReuseDetected, now)
            .await
        {
            Ok(revoked) => {
                warn!(
                    user_id = token.user_id,
                    tenant_id = token.tenant_id,
                    family_id = %token.family_id,
                    revoked,
                    "refresh token reuse detected; family revoked"
                );
                Error::TokenReuseDetected
            }
            Err(e) => Error::Storage(e),
        }
    }

    /// Revoke the family of `presented`. Unknown tokens are ignored.
    /// Returns the number of tokens revoked.
    pub async fn logout(&self, presented: &str) -> Result<u64> {
        let Some(token) = self.store.find_refresh_token(presented).await? else {
            return Ok(0);
        };
        let revoked = self
            .store
            .revoke_family(&token.family_id, &RevokedReason::Logout, self.clock.now())
            .await?;
        info!(family_id = %token.family_id, revoked, "session logged out");
        Ok(revoked)
    }

    /// Revoke every session of a user (erasure of the user).
    pub async fn revoke_user_sessions(&self, user_id: UserId) -> Result<u64> {
        let revoked = self
            .store
            .revoke_user_tokens(user_id, &RevokedReason::UserErased, self.clock.now())
            .await?;
        info!(user_id, revoked, "user sessions revoked");
        Ok(revoked)
    }

    /// Revoke every session in a tenant (erasure of the tenant).
    pub async fn revoke_tenant_sessions(&self, tenant_id: TenantId) -> Result<u64> {
        let revoked = self
            .store
            .revoke_tenant_tokens(tenant_id, &RevokedReason::TenantErased, self.clock.now())
            .await?;
        info!(tenant_id, revoked, "tenant sessions revoked");
        Ok(revoked)
    }

    /// Delete tokens that expired more than `retention` ago.
    pub async fn sweep_expired(&self, retention: Duration) -> Result<u64> {
        let cutoff = self.clock.now() - retention;
        let deleted = self.store.delete_expired_tokens(cutoff).await?;
        info!(deleted, %cutoff, "expired refresh tokens swept");
        Ok(deleted)
    }

    pub async fn family(&self, family_id: &str) -> Result<Vec<RefreshToken>> {
        Ok(self.store.list_family(family_id).await?)
    }
}
