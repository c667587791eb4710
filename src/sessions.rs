//! Session commands (`gdh session ...`, `gdh user revoke`) and the
//! [`SessionManager`] wiring shared with the HTTP server.
//!
//! Token-bearing output is JSON on stdout so scripts can pick up the
//! rotated refresh token.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;

use gdpr_harness_core::access::AccessTokenSigner;
use gdpr_harness_core::clock::SystemClock;
use gdpr_harness_core::models::UserId;
use gdpr_harness_core::session::SessionManager;
use gdpr_harness_core::store::UserDirectory;

use crate::config::Config;
use crate::db;
use crate::docs::format_ts_iso;
use crate::sqlite_store::SqliteStore;

/// Build the access-token signer from `[auth]`.
pub fn access_signer(config: &Config) -> Result<AccessTokenSigner> {
    let secret = config.auth.resolve_secret()?;
    Ok(AccessTokenSigner::new(
        secret.into_bytes(),
        Duration::minutes(config.auth.access_token_minutes),
    )?)
}

pub fn session_manager(config: &Config, store: SqliteStore) -> Result<SessionManager<SqliteStore>> {
    Ok(SessionManager::new(
        Arc::new(store),
        access_signer(config)?,
        Arc::new(SystemClock),
        Duration::days(config.auth.refresh_token_days),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run `work` against a fresh pool, closing the pool whatever the outcome.
async fn with_store<T, F, Fut>(config: &Config, work: F) -> Result<T>
where
    F: FnOnce(SqliteStore) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let pool = db::connect(config).await?;
    let result = work(SqliteStore::new(pool.clone())).await;
    pool.close().await;
    result
}

pub async fn run_issue(config: &Config, user_id: UserId) -> Result<()> {
    let tokens = with_store(config, |store| async move {
        let user = store
            .find_user(user_id)
            .await?
            .with_context(|| format!("user {} not found", user_id))?;
        let sessions = session_manager(config, store)?;
        Ok::<_, anyhow::Error>(sessions.issue(&user).await?)
    })
    .await?;
    print_json(&tokens)
}

pub async fn run_refresh(config: &Config, refresh_token: &str) -> Result<()> {
    let tokens = with_store(config, |store| async move {
        let sessions = session_manager(config, store)?;
        Ok::<_, anyhow::Error>(sessions.refresh(refresh_token).await?)
    })
    .await?;
    print_json(&tokens)
}

pub async fn run_logout(config: &Config, refresh_token: &str) -> Result<()> {
    let revoked = with_store(config, |store| async move {
        let sessions = session_manager(config, store)?;
        Ok::<_, anyhow::Error>(sessions.logout(refresh_token).await?)
    })
    .await?;
    println!("revoked {} token(s)", revoked);
    Ok(())
}

#[derive(Serialize)]
struct FamilyEntry {
    id: i64,
    state: &'static str,
    issued_at: String,
    expires_at: String,
    revoked_reason: Option<String>,
    replaced_by: Option<String>,
}

pub async fn run_family(config: &Config, family_id: &str) -> Result<()> {
    let tokens = with_store(config, |store| async move {
        let sessions = session_manager(config, store)?;
        Ok::<_, anyhow::Error>(sessions.family(family_id).await?)
    })
    .await?;
    let now = Utc::now();
    let entries: Vec<FamilyEntry> = tokens
        .into_iter()
        .map(|t| FamilyEntry {
            id: t.id,
            state: t.state(now).as_str(),
            issued_at: format_ts_iso(t.issued_at.timestamp()),
            expires_at: format_ts_iso(t.expires_at.timestamp()),
            revoked_reason: t.revoked_reason.map(String::from),
            // Truncated: the full value is still a live secret until expiry.
            replaced_by: t.replaced_by_token.map(|s| s.chars().take(8).collect()),
        })
        .collect();
    print_json(&entries)
}

/// Revoke every session of a user (erasure of the user).
pub async fn run_revoke_user(config: &Config, user_id: UserId) -> Result<()> {
    let revoked = with_store(config, |store| async move {
        let sessions = session_manager(config, store)?;
        Ok::<_, anyhow::Error>(sessions.revoke_user_sessions(user_id).await?)
    })
    .await?;
    println!("revoked {} token(s) for user {}", revoked, user_id);
    Ok(())
}
