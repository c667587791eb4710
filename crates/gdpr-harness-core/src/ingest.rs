//! Knowledge ingestion: validation → normalization → chunking → dedup →
//! embedding → storage.
//!
//! Chunk rows are written first, embeddings second. An embedding failure
//! is not fatal: the chunk stays without an embedding and is picked up by
//! [`repair_embeddings`]. A store failure after the document row exists
//! soft-deletes that document, so a retried ingest never leaves a visible
//! duplicate. Re-running ingestion over the same content adds nothing,
//! since the store skips `(document_id, checksum)` duplicates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, content_checksum, normalize_lines, ChunkingParams};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{
    DocumentId, KnowledgeChunk, KnowledgeDocument, NewChunk, NewDocument, NewEmbedding, TenantId,
};
use crate::store::{KnowledgeStore, PurgeCounts};

pub const DEFAULT_MAX_CONTENT_CHARS: usize = 200_000;
pub const MAX_TAGS: usize = 32;
pub const MAX_TAG_CHARS: usize = 64;

/// Number of texts handed to the embedder per call.
const EMBED_BATCH: usize = 64;

/// Ingestion settings, decoupled from application config.
#[derive(Debug, Clone)]
pub struct IngestParams {
    pub chunking: ChunkingParams,
    pub max_content_chars: usize,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            chunking: ChunkingParams::default(),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: DocumentId,
    /// Chunks produced by the chunker.
    pub chunks_total: usize,
    pub chunks_created: usize,
    /// Chunks whose checksum already existed for the document.
    pub chunks_skipped: usize,
    pub embeddings_written: usize,
    /// New chunks left without an embedding.
    pub embeddings_pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub candidates: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Reject input that must never reach the store.
pub fn validate_new_document(doc: &NewDocument, params: &IngestParams) -> Result<()> {
    if doc.content.trim().is_empty() {
        return Err(Error::InvalidInput("content must not be empty".into()));
    }
    let len = doc.content.chars().count();
    if len > params.max_content_chars {
        return Err(Error::InvalidInput(format!(
            "content exceeds max length {}",
            params.max_content_chars
        )));
    }
    if let Some(tags) = &doc.tags {
        if tags.len() > MAX_TAGS {
            return Err(Error::InvalidInput(format!("at most {} tags allowed", MAX_TAGS)));
        }
        if tags.iter().any(|t| t.trim().is_empty() || t.chars().count() > MAX_TAG_CHARS) {
            return Err(Error::InvalidInput(format!(
                "tags must be 1..={} characters",
                MAX_TAG_CHARS
            )));
        }
    }
    Ok(())
}

/// Create a document and index it.
///
/// Validation happens before any write; a rejected document leaves no
/// rows behind. If indexing fails the document is soft-deleted before the
/// error is returned.
pub async fn ingest<S, E>(
    store: &S,
    embedder: &E,
    params: &IngestParams,
    tenant_id: TenantId,
    doc: NewDocument,
    now: DateTime<Utc>,
) -> Result<(KnowledgeDocument, IngestReport)>
where
    S: KnowledgeStore + ?Sized,
    E: Embedder + ?Sized,
{
    validate_new_document(&doc, params)?;
    let stored = store.insert_document(tenant_id, &doc, now).await?;
    let report = match index_document(store, embedder, &params.chunking, &stored, now).await {
        Ok(report) => report,
        Err(e) => {
            // Withdraw the half-indexed document; the retention sweep removes it.
            if let Err(undo) = store.soft_delete_document(tenant_id, stored.id, now).await {
                warn!(
                    document_id = stored.id,
                    error = %undo,
                    "could not withdraw partially ingested document"
                );
            }
            return Err(e);
        }
    };
    info!(
        tenant_id,
        document_id = stored.id,
        chunks = report.chunks_created,
        embeddings = report.embeddings_written,
        pending = report.embeddings_pending,
        "document ingested"
    );
    Ok((stored, report))
}

/// Chunk, dedup, and embed an already-stored document.
pub async fn index_document<S, E>(
    store: &S,
    embedder: &E,
    chunking: &ChunkingParams,
    doc: &KnowledgeDocument,
    now: DateTime<Utc>,
) -> Result<IngestReport>
where
    S: KnowledgeStore + ?Sized,
    E: Embedder + ?Sized,
{
    let normalized = normalize_lines(&doc.content);
    let pieces = chunk_text(&normalized, chunking);

    let new_chunks: Vec<NewChunk> = pieces
        .into_iter()
        .map(|p| NewChunk {
            document_id: doc.id,
            chunk_index: p.index,
            checksum: content_checksum(&p.text),
            content: p.text,
            section_title: p.section_title,
        })
        .collect();

    let created = store
        .insert_chunks(doc.tenant_id, &new_chunks, now)
        .await?;
    let (written, pending) = embed_chunks(store, embedder, doc.tenant_id, &created, now).await?;

    let report = IngestReport {
        document_id: doc.id,
        chunks_total: new_chunks.len(),
        chunks_created: created.len(),
        chunks_skipped: new_chunks.len() - created.len(),
        embeddings_written: written,
        embeddings_pending: pending,
    };
    debug!(?report, "document indexed");
    Ok(report)
}

/// Re-run indexing for an existing document. Idempotent.
pub async fn reindex_document<S, E>(
    store: &S,
    embedder: &E,
    chunking: &ChunkingParams,
    tenant_id: TenantId,
    document_id: DocumentId,
    now: DateTime<Utc>,
) -> Result<IngestReport>
where
    S: KnowledgeStore + ?Sized,
    E: Embedder + ?Sized,
{
    let doc = store
        .get_document(tenant_id, document_id)
        .await?
        .ok_or(Error::NotFound("document"))?;
    index_document(store, embedder, chunking, &doc, now).await
}

/// Embed every chunk of the tenant that has no embedding or a stale one.
pub async fn repair_embeddings<S, E>(
    store: &S,
    embedder: &E,
    tenant_id: TenantId,
    now: DateTime<Utc>,
) -> Result<RepairReport>
where
    S: KnowledgeStore + ?Sized,
    E: Embedder + ?Sized,
{
    let candidates = store.chunks_needing_embedding(tenant_id).await?;
    if candidates.is_empty() {
        return Ok(RepairReport::default());
    }
    let (embedded, failed) = embed_chunks(store, embedder, tenant_id, &candidates, now).await?;
    info!(tenant_id, embedded, failed, "embedding repair finished");
    Ok(RepairReport {
        candidates: candidates.len(),
        embedded,
        failed,
    })
}

/// Embed `chunks` in batches. Embedder errors are logged and counted as
/// pending; store errors propagate.
async fn embed_chunks<S, E>(
    store: &S,
    embedder: &E,
    tenant_id: TenantId,
    chunks: &[KnowledgeChunk],
    now: DateTime<Utc>,
) -> Result<(usize, usize)>
where
    S: KnowledgeStore + ?Sized,
    E: Embedder + ?Sized,
{
    let mut written = 0usize;
    let mut pending = 0usize;

    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = match embedder.embed_batch(&texts).await {
            Ok(v) if v.len() == batch.len() => v,
            Ok(v) => {
                warn!(expected = batch.len(), got = v.len(), "embedder returned wrong batch size");
                pending += batch.len();
                continue;
            }
            Err(e) => {
                warn!(error = %e, "embedding batch failed; chunks left pending");
                pending += batch.len();
                continue;
            }
        };
        for (chunk, vector) in batch.iter().zip(vectors) {
            store
                .upsert_embedding(
                    tenant_id,
                    &NewEmbedding {
                        chunk_id: chunk.id,
                        document_id: chunk.document_id,
                        checksum: chunk.checksum.clone(),
                        vector,
                        model: embedder.model_name().to_string(),
                    },
                    now,
                )
                .await?;
            written += 1;
        }
    }

    Ok((written, pending))
}

/// Soft-delete a document. Unknown or foreign ids are `NotFound`.
pub async fn delete_document<S>(
    store: &S,
    tenant_id: TenantId,
    document_id: DocumentId,
    now: DateTime<Utc>,
) -> Result<()>
where
    S: KnowledgeStore + ?Sized,
{
    if store
        .soft_delete_document(tenant_id, document_id, now)
        .await?
    {
        Ok(())
    } else {
        Err(Error::NotFound("document"))
    }
}

/// Chunks of a visible document. Unknown or foreign ids are `NotFound`.
pub async fn document_chunks<S>(
    store: &S,
    tenant_id: TenantId,
    document_id: DocumentId,
) -> Result<Vec<KnowledgeChunk>>
where
    S: KnowledgeStore + ?Sized,
{
    if store.get_document(tenant_id, document_id).await?.is_none() {
        return Err(Error::NotFound("document"));
    }
    Ok(store.list_chunks(tenant_id, document_id).await?)
}

/// Right-to-erasure: hard-delete the tenant's whole knowledge base.
pub async fn erase_tenant_knowledge<S>(store: &S, tenant_id: TenantId) -> Result<PurgeCounts>
where
    S: KnowledgeStore + ?Sized,
{
    let counts = store.purge_tenant(tenant_id).await?;
    info!(
        tenant_id,
        documents = counts.documents,
        chunks = counts.chunks,
        embeddings = counts.embeddings,
        "tenant knowledge erased"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{hash_embedding, HashEmbedder};
    use crate::models::KnowledgeEmbedding;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("model offline")
        }
    }

    /// Delegates to an [`InMemoryStore`] but fails every chunk insert.
    struct ChunkWritesFail(InMemoryStore);

    #[async_trait]
    impl KnowledgeStore for ChunkWritesFail {
        async fn insert_document(
            &self,
            tenant_id: TenantId,
            doc: &NewDocument,
            now: DateTime<Utc>,
        ) -> anyhow::Result<KnowledgeDocument> {
            self.0.insert_document(tenant_id, doc, now).await
        }
        async fn get_document(
            &self,
            tenant_id: TenantId,
            id: DocumentId,
        ) -> anyhow::Result<Option<KnowledgeDocument>> {
            self.0.get_document(tenant_id, id).await
        }
        async fn list_documents(&self, tenant_id: TenantId) -> anyhow::Result<Vec<KnowledgeDocument>> {
            self.0.list_documents(tenant_id).await
        }
        async fn soft_delete_document(
            &self,
            tenant_id: TenantId,
            id: DocumentId,
            now: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            self.0.soft_delete_document(tenant_id, id, now).await
        }
        async fn insert_chunks(
            &self,
            _tenant_id: TenantId,
            _chunks: &[NewChunk],
            _now: DateTime<Utc>,
        ) -> anyhow::Result<Vec<KnowledgeChunk>> {
            anyhow::bail!("disk I/O error")
        }
        async fn list_chunks(
            &self,
            tenant_id: TenantId,
            document_id: DocumentId,
        ) -> anyhow::Result<Vec<KnowledgeChunk>> {
            self.0.list_chunks(tenant_id, document_id).await
        }
        async fn upsert_embedding(
            &self,
            tenant_id: TenantId,
            embedding: &NewEmbedding,
            now: DateTime<Utc>,
        ) -> anyhow::Result<KnowledgeEmbedding> {
            self.0.upsert_embedding(tenant_id, embedding, now).await
        }
        async fn chunks_needing_embedding(
            &self,
            tenant_id: TenantId,
        ) -> anyhow::Result<Vec<KnowledgeChunk>> {
            self.0.chunks_needing_embedding(tenant_id).await
        }
        async fn tenant_embeddings(
            &self,
            tenant_id: TenantId,
        ) -> anyhow::Result<Vec<(KnowledgeChunk, KnowledgeEmbedding)>> {
            self.0.tenant_embeddings(tenant_id).await
        }
        async fn purge_tenant(&self, tenant_id: TenantId) -> anyhow::Result<PurgeCounts> {
            self.0.purge_tenant(tenant_id).await
        }
        async fn purge_deleted_documents(
            &self,
            cutoff: DateTime<Utc>,
        ) -> anyhow::Result<PurgeCounts> {
            self.0.purge_deleted_documents(cutoff).await
        }
    }

    fn doc(content: &str) -> NewDocument {
        NewDocument {
            title: Some("Policy".into()),
            content: content.to_string(),
            source: Some("internal_policy".into()),
            language: Some("sv".into()),
            tags: Some(vec!["policy".into()]),
        }
    }

    fn spec_document() -> String {
        format!(
            "# Intro\nThis is a short section.\n# Details\n{}",
            "word ".repeat(2000)
        )
    }

    #[tokio::test]
    async fn test_ingest_creates_chunks_and_embeddings() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let (stored, report) = ingest(
            &store,
            &HashEmbedder,
            &IngestParams::default(),
            1,
            doc(&spec_document()),
            now,
        )
        .await
        .unwrap();

        assert!(report.chunks_created >= 2);
        assert_eq!(report.embeddings_written, report.chunks_created);
        assert_eq!(report.embeddings_pending, 0);

        let chunks = store.list_chunks(1, stored.id).await.unwrap();
        assert_eq!(chunks[0].section_title.as_deref(), Some("Intro"));
        assert_eq!(chunks[0].content, "This is a short section.");
        assert!(chunks[1..]
            .iter()
            .all(|c| c.section_title.as_deref() == Some("Details")));

        let pairs = store.tenant_embeddings(1).await.unwrap();
        for (chunk, emb) in &pairs {
            assert_eq!(emb.checksum, chunk.checksum);
            assert_eq!(emb.vector, hash_embedding(&chunk.content));
            assert_eq!(emb.model, "hash-embed");
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_write_withdraws_document() {
        let store = ChunkWritesFail(InMemoryStore::new());
        let now = Utc::now();
        let err = ingest(
            &store,
            &HashEmbedder,
            &IngestParams::default(),
            1,
            doc(&spec_document()),
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.list_documents(1).await.unwrap().is_empty());

        // The withdrawn row is left for the retention sweep.
        let purged = store
            .purge_deleted_documents(now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged.documents, 1);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let (stored, first) = ingest(
            &store,
            &HashEmbedder,
            &IngestParams::default(),
            1,
            doc(&spec_document()),
            now,
        )
        .await
        .unwrap();
        let before: Vec<String> = store
            .list_chunks(1, stored.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.checksum)
            .collect();

        let second = reindex_document(&store, &HashEmbedder, &ChunkingParams::default(), 1, stored.id, now)
            .await
            .unwrap();
        assert_eq!(second.chunks_created, 0);
        assert_eq!(second.chunks_skipped, first.chunks_total);

        let after: Vec<String> = store
            .list_chunks(1, stored.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.checksum)
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_repeated_text_within_document_deduplicated() {
        let store = InMemoryStore::new();
        let content = "# A\nsame body\n# B\nsame body";
        let (_, report) = ingest(
            &store,
            &HashEmbedder,
            &IngestParams::default(),
            1,
            doc(content),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(report.chunks_total, 2);
        assert_eq!(report.chunks_created, 1);
        assert_eq!(report.chunks_skipped, 1);
    }

    #[tokio::test]
    async fn test_oversized_content_rejected_without_rows() {
        let store = InMemoryStore::new();
        let params = IngestParams {
            max_content_chars: 10,
            ..IngestParams::default()
        };
        let err = ingest(
            &store,
            &HashEmbedder,
            &params,
            1,
            doc("this is far more than ten characters"),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.list_documents(1).await.unwrap().is_empty());
    }

    #[test]
    fn test_validation_rules() {
        let params = IngestParams::default();
        assert!(validate_new_document(&doc("ok"), &params).is_ok());
        assert!(validate_new_document(&doc("   \n "), &params).is_err());
        let mut many = doc("ok");
        many.tags = Some((0..40).map(|i| i.to_string()).collect());
        assert!(validate_new_document(&many, &params).is_err());
        let mut long = doc("ok");
        long.tags = Some(vec!["x".repeat(65)]);
        assert!(validate_new_document(&long, &params).is_err());
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_repairable_chunks() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let (stored, report) = ingest(
            &store,
            &FailingEmbedder,
            &IngestParams::default(),
            1,
            doc("# Intro\nsome text"),
            now,
        )
        .await
        .unwrap();
        assert_eq!(report.chunks_created, 1);
        assert_eq!(report.embeddings_pending, 1);
        assert!(store.tenant_embeddings(1).await.unwrap().is_empty());

        let repaired = repair_embeddings(&store, &HashEmbedder, 1, now).await.unwrap();
        assert_eq!(repaired.candidates, 1);
        assert_eq!(repaired.embedded, 1);
        assert_eq!(store.tenant_embeddings(1).await.unwrap().len(), 1);
        assert!(store.chunks_needing_embedding(1).await.unwrap().is_empty());
        assert_eq!(document_chunks(&store, 1, stored.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repair_replaces_stale_embedding() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let (stored, _) = ingest(
            &store,
            &HashEmbedder,
            &IngestParams::default(),
            1,
            doc("body text"),
            now,
        )
        .await
        .unwrap();
        let chunk = store.list_chunks(1, stored.id).await.unwrap().remove(0);
        store
            .upsert_embedding(
                1,
                &NewEmbedding {
                    chunk_id: chunk.id,
                    document_id: stored.id,
                    checksum: "stale".into(),
                    vector: vec![0.0; 8],
                    model: "hash-embed".into(),
                },
                now,
            )
            .await
            .unwrap();

        let repaired = repair_embeddings(&store, &HashEmbedder, 1, now).await.unwrap();
        assert_eq!(repaired.embedded, 1);
        let (_, emb) = store.tenant_embeddings(1).await.unwrap().remove(0);
        assert_eq!(emb.checksum, chunk.checksum);
    }

    #[tokio::test]
    async fn test_delete_and_chunks_are_tenant_scoped() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let (stored, _) = ingest(
            &store,
            &HashEmbedder,
            &IngestParams::default(),
            1,
            doc("tenant one text"),
            now,
        )
        .await
        .unwrap();

        assert!(matches!(
            document_chunks(&store, 2, stored.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            delete_document(&store, 2, stored.id, now).await,
            Err(Error::NotFound(_))
        ));
        delete_document(&store, 1, stored.id, now).await.unwrap();
        assert!(store.tenant_embeddings(1).await.unwrap().is_empty());
        assert!(matches!(
            reindex_document(&store, &HashEmbedder, &ChunkingParams::default(), 1, stored.id, now).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_erase_tenant_only_touches_that_tenant() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for tenant in [1, 2] {
            ingest(
                &store,
                &HashEmbedder,
                &IngestParams::default(),
                tenant,
                doc("apples and pears"),
                now,
            )
            .await
            .unwrap();
        }
        let counts = erase_tenant_knowledge(&store, 1).await.unwrap();
        assert_eq!(counts.documents, 1);
        assert_eq!(counts.chunks, 1);
        assert_eq!(counts.embeddings, 1);
        assert!(store.list_documents(1).await.unwrap().is_empty());
        assert_eq!(store.list_documents(2).await.unwrap().len(), 1);
    }
}
