//! `gdh search`: tenant-scoped retrieval from the command line.

use anyhow::Result;

use gdpr_harness_core::chunk::normalize_text;
use gdpr_harness_core::embedding::HashEmbedder;
use gdpr_harness_core::models::TenantId;
use gdpr_harness_core::retrieval::{retrieve, synthesize_answer};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_search(
    config: &Config,
    tenant_id: TenantId,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let query = normalize_text(query);
    if query.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let results = retrieve(
        &store,
        &HashEmbedder,
        &config.retrieval_params(),
        tenant_id,
        &query,
        top_k,
    )
    .await?;
    pool.close().await;

    let answer = synthesize_answer(&results);
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    if answer.citations.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in answer.citations.iter().enumerate() {
        println!(
            "{}. [{:.4}] doc {} chunk {} {}",
            i + 1,
            hit.score,
            hit.document_id,
            hit.chunk_index,
            hit.section_title.as_deref().unwrap_or("")
        );
        let preview: String = hit.content.chars().take(200).collect();
        println!("    {}", preview);
    }
    Ok(())
}
