//! Retention sweep: drop expired refresh tokens and hard-delete documents
//! that were soft-deleted before the retention cutoff.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use gdpr_harness_core::session::SessionManager;
use gdpr_harness_core::store::{KnowledgeStore, TokenStore, UserDirectory};

use crate::config::Config;
use crate::db;
use crate::sessions;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub tokens_deleted: u64,
    pub documents_purged: u64,
    pub chunks_purged: u64,
    pub embeddings_purged: u64,
}

/// One retention pass over `store`.
pub async fn sweep_once<S>(
    config: &Config,
    store: &S,
    sessions: &SessionManager<S>,
) -> Result<SweepReport>
where
    S: KnowledgeStore + TokenStore + UserDirectory,
{
    let tokens_deleted = sessions
        .sweep_expired(Duration::days(config.retention.tokens_days))
        .await?;
    let cutoff = Utc::now() - Duration::days(config.retention.deleted_documents_days);
    let purged = store.purge_deleted_documents(cutoff).await?;

    let report = SweepReport {
        tokens_deleted,
        documents_purged: purged.documents,
        chunks_purged: purged.chunks,
        embeddings_purged: purged.embeddings,
    };
    info!(?report, "retention sweep finished");
    Ok(report)
}

pub async fn run_sweep(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let manager = sessions::session_manager(config, store.clone())?;
    let report = sweep_once(config, &store, &manager).await?;

    println!("sweep");
    println!("  refresh tokens deleted: {}", report.tokens_deleted);
    println!("  documents purged: {}", report.documents_purged);
    println!("  chunks purged: {}", report.chunks_purged);
    println!("  embeddings purged: {}", report.embeddings_purged);
    println!("ok");

    pool.close().await;
    Ok(())
}
