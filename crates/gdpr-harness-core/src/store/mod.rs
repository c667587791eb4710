//! Storage abstraction for GDPR Harness.
//!
//! Three traits cover everything the core needs from persistence:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`KnowledgeStore`] | Documents, chunks, and embeddings, partitioned by tenant |
//! | [`TokenStore`] | Refresh tokens and their rotation families |
//! | [`UserDirectory`] | Read-only view of the user records sessions depend on |
//!
//! Every knowledge operation takes the tenant id and filters on it in the
//! backend; a row belonging to another tenant behaves as if it did not
//! exist. Implementations must be `Send + Sync`.
//!
//! Uniqueness and conditional updates live in the backend: chunk inserts
//! skip `(document_id, checksum)` duplicates, and rotation only succeeds
//! against a token that is still unspent.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    DocumentId, KnowledgeChunk, KnowledgeDocument, KnowledgeEmbedding, NewChunk,
    NewDocument, NewEmbedding, RefreshToken, RevokedReason, SessionUser, TenantId, UserId,
};

/// Row counts removed by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub documents: u64,
    pub chunks: u64,
    pub embeddings: u64,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Create a document row and return it.
    async fn insert_document(
        &self,
        tenant_id: TenantId,
        doc: &NewDocument,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeDocument>;

    /// Fetch a visible (not soft-deleted) document owned by the tenant.
    async fn get_document(
        &self,
        tenant_id: TenantId,
        id: DocumentId,
    ) -> Result<Option<KnowledgeDocument>>;

    /// All visible documents of the tenant, oldest first.
    async fn list_documents(&self, tenant_id: TenantId) -> Result<Vec<KnowledgeDocument>>;

    /// Mark a document deleted. Returns `false` if it was not visible.
    async fn soft_delete_document(
        &self,
        tenant_id: TenantId,
        id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Insert chunks in one transaction, skipping any whose
    /// `(document_id, checksum)` already exists. Returns only the rows
    /// that were created.
    async fn insert_chunks(
        &self,
        tenant_id: TenantId,
        chunks: &[NewChunk],
        now: DateTime<Utc>,
    ) -> Result<Vec<KnowledgeChunk>>;

    /// Chunks of one document ordered by `chunk_index`.
    async fn list_chunks(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
    ) -> Result<Vec<KnowledgeChunk>>;

    /// Store the embedding for a chunk, replacing any previous one.
    async fn upsert_embedding(
        &self,
        tenant_id: TenantId,
        embedding: &NewEmbedding,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEmbedding>;

    /// Chunks of visible documents with no embedding, or whose embedding
    /// checksum differs from the chunk checksum.
    async fn chunks_needing_embedding(&self, tenant_id: TenantId) -> Result<Vec<KnowledgeChunk>>;

    /// Every embedding of the tenant's visible documents, joined with its chunk.
    async fn tenant_embeddings(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<(KnowledgeChunk, KnowledgeEmbedding)>>;

    /// Hard-delete every document, chunk, and embedding of the tenant.
    async fn purge_tenant(&self, tenant_id: TenantId) -> Result<PurgeCounts>;

    /// Hard-delete documents soft-deleted before `cutoff`, with their rows.
    async fn purge_deleted_documents(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<RefreshToken>;

    /// Look up a token by its literal value.
    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Atomically spend `old_token` and insert `replacement`.
    ///
    /// The old row is updated only if it is neither revoked nor replaced
    /// (`revoked = true`, reason `rotated`, `replaced_by_token`,
    /// `last_used_at`). Returns `false` and inserts nothing when that
    /// conditional update matches no row.
    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Revoke every unrevoked token of a family. Returns the count.
    async fn revoke_family(
        &self,
        family_id: &str,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn revoke_user_tokens(
        &self,
        user_id: UserId,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn revoke_tenant_tokens(
        &self,
        tenant_id: TenantId,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Tokens of a family in issue order.
    async fn list_family(&self, family_id: &str) -> Result<Vec<RefreshToken>>;

    /// Physically delete tokens that expired before `cutoff`.
    async fn delete_expired_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> Result<Option<SessionUser>>;
}

