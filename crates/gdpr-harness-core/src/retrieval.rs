//! Tenant-scoped semantic retrieval.
//!
//! Brute-force cosine scan over every embedding of the tenant:
//!
//! 1. Embed the query (queries are not chunked).
//! 2. Load the tenant's embeddings joined with their chunks.
//! 3. Score, sort descending, drop scores below the threshold, keep `top_k`.
//!
//! Tenant isolation is the store's job: [`KnowledgeStore::tenant_embeddings`]
//! only ever returns rows of the requested tenant. An empty result means
//! "insufficient context" and is not an error.

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Error, Result};
use crate::models::{ChunkId, DocumentId, KnowledgeChunk, KnowledgeEmbedding, TenantId};
use crate::store::KnowledgeStore;

pub const DEFAULT_THRESHOLD: f64 = 0.2;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_TOP_K: usize = 50;
pub const SNIPPET_CHARS: usize = 400;
pub const INSUFFICIENT_CONTEXT: &str = "Insufficient context";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub threshold: f64,
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            default_top_k: DEFAULT_TOP_K,
            max_top_k: DEFAULT_MAX_TOP_K,
        }
    }
}

/// One scored result, with the rows it came from.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub score: f64,
    pub chunk: KnowledgeChunk,
    pub embedding: KnowledgeEmbedding,
}

/// Wire shape of a search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    pub score: f64,
    pub chunk_index: i64,
    pub model: String,
    pub section_title: Option<String>,
}

impl From<&RetrievedChunk> for SearchHit {
    fn from(r: &RetrievedChunk) -> Self {
        SearchHit {
            chunk_id: r.chunk.id,
            document_id: r.chunk.document_id,
            content: r.chunk.content.clone(),
            score: r.score,
            chunk_index: r.chunk.chunk_index,
            model: r.embedding.model.clone(),
            section_title: r.chunk.section_title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub citations: Vec<SearchHit>,
}

/// Context handed to a question-answering model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnippet {
    pub chunk_id: ChunkId,
    pub title: String,
    pub snippet: String,
}

/// Resolve the caller's `top_k`: `None` means the default, zero is
/// rejected, and anything above the ceiling is clamped.
pub fn effective_top_k(params: &RetrievalParams, requested: Option<usize>) -> Result<usize> {
    match requested {
        Some(0) => Err(Error::InvalidInput("top_k must be at least 1".into())),
        Some(k) => Ok(k.min(params.max_top_k)),
        None => Ok(params.default_top_k.min(params.max_top_k)),
    }
}

/// Search the tenant's knowledge base.
///
/// Results are sorted by descending score (ties by chunk id), all
/// `>= params.threshold`, and at most `top_k` long.
pub async fn retrieve<S, E>(
    store: &S,
    embedder: &E,
    params: &RetrievalParams,
    tenant_id: TenantId,
    query: &str,
    top_k: Option<usize>,
) -> Result<Vec<RetrievedChunk>>
where
    S: KnowledgeStore + ?Sized,
    E: Embedder + ?Sized,
{
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("query must not be empty".into()));
    }
    let top_k = effective_top_k(params, top_k)?;

    let query_vec = embedder.embed(query).await?;
    let candidates = store.tenant_embeddings(tenant_id).await?;
    let scanned = candidates.len();

    let mut scored: Vec<RetrievedChunk> = Vec::with_capacity(candidates.len());
    for (chunk, embedding) in candidates {
        if embedding.is_stale_for(&chunk) {
            let err = Error::StorageInconsistency(format!(
                "embedding {} does not match chunk {}",
                embedding.id, chunk.id
            ));
            warn!(tenant_id, chunk_id = chunk.id, error = %err, "skipping stale embedding");
            continue;
        }
        if embedding.vector.len() != query_vec.len() {
            warn!(
                tenant_id,
                chunk_id = chunk.id,
                stored = embedding.vector.len(),
                query = query_vec.len(),
                "skipping embedding with mismatched dimensions"
            );
            continue;
        }
        let score = cosine_similarity(&query_vec, &embedding.vector);
        scored.push(RetrievedChunk {
            score,
            chunk,
            embedding,
        });
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    scored.retain(|r| r.score >= params.threshold);
    scored.truncate(top_k);

    debug!(tenant_id, scanned, returned = scored.len(), "retrieval finished");
    Ok(scored)
}

/// Build the search answer from ranked hits.
pub fn synthesize_answer(results: &[RetrievedChunk]) -> RagAnswer {
    let citations: Vec<SearchHit> = results.iter().map(SearchHit::from).collect();
    let answer = if citations.is_empty() {
        INSUFFICIENT_CONTEXT.to_string()
    } else {
        let joined = citations
            .iter()
            .map(|h| h.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        format!("Relevant context:\n{}", joined)
    };
    RagAnswer { answer, citations }
}

pub fn context_snippets(results: &[RetrievedChunk]) -> Vec<ContextSnippet> {
    results
        .iter()
        .map(|r| ContextSnippet {
            chunk_id: r.chunk.id,
            title: r
                .chunk
                .section_title
                .clone()
                .unwrap_or_else(|| "Document".to_string()),
            snippet: r.chunk.content.chars().take(SNIPPET_CHARS).collect(),
        })
        .collect()
}
