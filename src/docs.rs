//! Knowledge base inspection and removal: `gdh docs`, `gdh chunks`,
//! `gdh delete`, `gdh purge`.

use anyhow::Result;
use chrono::Utc;

use gdpr_harness_core::ingest;
use gdpr_harness_core::models::{DocumentId, TenantId};
use gdpr_harness_core::store::KnowledgeStore;

use crate::config::Config;
use crate::db;
use crate::sessions;
use crate::sqlite_store::SqliteStore;

pub async fn run_docs(config: &Config, tenant_id: TenantId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let docs = store.list_documents(tenant_id).await?;

    if docs.is_empty() {
        println!("No documents.");
    }
    for doc in &docs {
        println!(
            "{}\t{}\t{}\t{}",
            doc.id,
            doc.title.as_deref().unwrap_or("(untitled)"),
            doc.source.as_deref().unwrap_or("-"),
            format_ts_iso(doc.created_at.timestamp())
        );
    }

    pool.close().await;
    Ok(())
}

pub async fn run_chunks(config: &Config, tenant_id: TenantId, document_id: DocumentId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let chunks = ingest::document_chunks(&store, tenant_id, document_id).await?;

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!(
            "[chunk {}] {}",
            chunk.chunk_index,
            chunk.section_title.as_deref().unwrap_or("")
        );
        println!("checksum: {}", chunk.checksum);
        println!("{}", chunk.content);
        println!();
    }

    pool.close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, tenant_id: TenantId, document_id: DocumentId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    ingest::delete_document(&store, tenant_id, document_id, Utc::now()).await?;
    println!("deleted document {}", document_id);
    pool.close().await;
    Ok(())
}

/// Right to erasure for a whole tenant: knowledge rows are hard-deleted
/// and every session of the tenant is revoked.
pub async fn run_purge(config: &Config, tenant_id: TenantId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let counts = ingest::erase_tenant_knowledge(&store, tenant_id).await?;
    let sessions = sessions::session_manager(config, store)?;
    let revoked = sessions.revoke_tenant_sessions(tenant_id).await?;

    println!("purge tenant {}", tenant_id);
    println!("  documents: {}", counts.documents);
    println!("  chunks: {}", counts.chunks);
    println!("  embeddings: {}", counts.embeddings);
    println!("  sessions revoked: {}", revoked);
    println!("ok");

    pool.close().await;
    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
