//! Ingestion commands: `gdh ingest`, `gdh reindex`, `gdh repair`.
//!
//! Thin wrappers over the core pipeline: open the SQLite store, run the
//! operation with the hash embedder, and print a summary.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use gdpr_harness_core::embedding::HashEmbedder;
use gdpr_harness_core::ingest;
use gdpr_harness_core::models::{DocumentId, NewDocument, TenantId};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Metadata supplied alongside an ingested file.
#[derive(Debug, Default)]
pub struct DocumentMeta {
    pub title: Option<String>,
    pub source: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
}

pub async fn run_ingest(
    config: &Config,
    tenant_id: TenantId,
    file: &Path,
    meta: DocumentMeta,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let title = meta.title.or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    });
    let new_doc = NewDocument {
        title,
        content,
        source: meta.source,
        language: meta.language,
        tags: (!meta.tags.is_empty()).then_some(meta.tags),
    };

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let (doc, report) = ingest::ingest(
        &store,
        &HashEmbedder,
        &config.ingest_params(),
        tenant_id,
        new_doc,
        Utc::now(),
    )
    .await?;

    println!("ingest {}", file.display());
    println!("  document: {}", doc.id);
    println!("  chunks created: {}", report.chunks_created);
    println!("  chunks skipped: {}", report.chunks_skipped);
    println!("  embeddings written: {}", report.embeddings_written);
    println!("  embeddings pending: {}", report.embeddings_pending);
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn run_reindex(config: &Config, tenant_id: TenantId, document_id: DocumentId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = ingest::reindex_document(
        &store,
        &HashEmbedder,
        &config.chunking_params(),
        tenant_id,
        document_id,
        Utc::now(),
    )
    .await?;

    println!("reindex {}", document_id);
    println!("  chunks created: {}", report.chunks_created);
    println!("  chunks skipped: {}", report.chunks_skipped);
    println!("  embeddings written: {}", report.embeddings_written);
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn run_repair(config: &Config, tenant_id: TenantId) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = ingest::repair_embeddings(&store, &HashEmbedder, tenant_id, Utc::now()).await?;

    println!("repair tenant {}", tenant_id);
    println!("  candidates: {}", report.candidates);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}
