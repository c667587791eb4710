//! Minimal user administration: `gdh user add`, `gdh user disable`.

use anyhow::{bail, Result};
use chrono::Utc;

use gdpr_harness_core::models::{Role, TenantId, UserId};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_user_add(config: &Config, tenant_id: TenantId, email: &str, role: &str) -> Result<()> {
    let Some(role) = Role::parse(role) else {
        bail!("Unknown role: '{}'. Must be owner, admin, or user.", role);
    };
    if !email.contains('@') {
        bail!("Invalid email: '{}'", email);
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let user = store.create_user(tenant_id, email, role, Utc::now()).await?;
    println!("user {} created (tenant {}, role {})", user.id, tenant_id, role.as_str());
    pool.close().await;
    Ok(())
}

pub async fn run_user_disable(config: &Config, user_id: UserId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    if !store.set_user_active(user_id, false).await? {
        pool.close().await;
        bail!("user {} not found", user_id);
    }
    println!("user {} disabled", user_id);
    pool.close().await;
    Ok(())
}
