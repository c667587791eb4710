//! In-memory store implementing every storage trait, for tests and
//! embedding the core without a database.
//!
//! All state sits behind one `std::sync::RwLock`, so each trait method is
//! atomic with respect to the others. That gives the same guarantees the
//! SQLite backend gets from its unique index and conditional update.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    DocumentId, KnowledgeChunk, KnowledgeDocument, KnowledgeEmbedding, Lifecycle, NewChunk,
    NewDocument, NewEmbedding, RefreshToken, RevokedReason, SessionUser, TenantId, UserId,
};

use super::{KnowledgeStore, PurgeCounts, TokenStore, UserDirectory};

#[derive(Default)]
struct State {
    next_id: i64,
    documents: HashMap<DocumentId, KnowledgeDocument>,
    chunks: Vec<KnowledgeChunk>,
    embeddings: Vec<KnowledgeEmbedding>,
    tokens: Vec<RefreshToken>,
    users: HashMap<UserId, SessionUser>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn visible_doc(&self, tenant_id: TenantId, id: DocumentId) -> Option<&KnowledgeDocument> {
        self.documents
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id && d.lifecycle.is_visible())
    }

    fn remove_documents(&mut self, doomed: &[DocumentId]) -> PurgeCounts {
        let before_chunks = self.chunks.len();
        let before_embeddings = self.embeddings.len();
        self.chunks.retain(|c| !doomed.contains(&c.document_id));
        self.embeddings.retain(|e| !doomed.contains(&e.document_id));
        let mut documents = 0;
        for id in doomed {
            if self.documents.remove(id).is_some() {
                documents += 1;
            }
        }
        PurgeCounts {
            documents,
            chunks: (before_chunks - self.chunks.len()) as u64,
            embeddings: (before_embeddings - self.embeddings.len()) as u64,
        }
    }

    fn revoke_where(
        &mut self,
        pred: impl Fn(&RefreshToken) -> bool,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut n = 0;
        for t in self.tokens.iter_mut().filter(|t| !t.revoked && pred(&**t)) {
            t.revoked = true;
            t.revoked_reason = Some(reason.clone());
            t.last_used_at = Some(now);
            n += 1;
        }
        n
    }
}

/// In-memory implementation of [`KnowledgeStore`], [`TokenStore`], and
/// [`UserDirectory`].
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Register or replace a user record.
    pub fn put_user(&self, user: SessionUser) -> Result<()> {
        self.write()?.users.insert(user.id, user);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn insert_document(
        &self,
        tenant_id: TenantId,
        doc: &NewDocument,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeDocument> {
        let mut state = self.write()?;
        let id = state.next_id();
        let stored = KnowledgeDocument {
            id,
            tenant_id,
            title: doc.title.clone(),
            content: doc.content.clone(),
            source: doc.source.clone(),
            language: doc.language.clone(),
            tags: doc.tags.clone(),
            created_at: now,
            updated_at: None,
            lifecycle: Lifecycle::Active,
        };
        state.documents.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_document(
        &self,
        tenant_id: TenantId,
        id: DocumentId,
    ) -> Result<Option<KnowledgeDocument>> {
        Ok(self.read()?.visible_doc(tenant_id, id).cloned())
    }

    async fn list_documents(&self, tenant_id: TenantId) -> Result<Vec<KnowledgeDocument>> {
        let state = self.read()?;
        let mut docs: Vec<KnowledgeDocument> = state
            .documents
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.lifecycle.is_visible())
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    async fn soft_delete_document(
        &self,
        tenant_id: TenantId,
        id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.write()?;
        match state.documents.get_mut(&id) {
            Some(d) if d.tenant_id == tenant_id && d.lifecycle.is_visible() => {
                d.lifecycle = Lifecycle::Deleted { at: now };
                d.updated_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_chunks(
        &self,
        tenant_id: TenantId,
        chunks: &[NewChunk],
        now: DateTime<Utc>,
    ) -> Result<Vec<KnowledgeChunk>> {
        let mut state = self.write()?;
        let mut created = Vec::new();
        for c in chunks {
            if state.visible_doc(tenant_id, c.document_id).is_none() {
                anyhow::bail!("document {} does not exist for tenant", c.document_id);
            }
            let duplicate = state
                .chunks
                .iter()
                .any(|e| e.document_id == c.document_id && e.checksum == c.checksum);
            if duplicate {
                continue;
            }
            let id = state.next_id();
            let row = KnowledgeChunk {
                id,
                tenant_id,
                document_id: c.document_id,
                chunk_index: c.chunk_index,
                content: c.content.clone(),
                section_title: c.section_title.clone(),
                checksum: c.checksum.clone(),
                created_at: now,
            };
            state.chunks.push(row.clone());
            created.push(row);
        }
        Ok(created)
    }

    async fn list_chunks(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
    ) -> Result<Vec<KnowledgeChunk>> {
        let state = self.read()?;
        if state.visible_doc(tenant_id, document_id).is_none() {
            return Ok(Vec::new());
        }
        let mut chunks: Vec<KnowledgeChunk> = state
            .chunks
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn upsert_embedding(
        &self,
        tenant_id: TenantId,
        embedding: &NewEmbedding,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEmbedding> {
        let mut state = self.write()?;
        let owned = state
            .chunks
            .iter()
            .any(|c| c.id == embedding.chunk_id && c.tenant_id == tenant_id);
        if !owned {
            anyhow::bail!("chunk {} does not exist for tenant", embedding.chunk_id);
        }
        state.embeddings.retain(|e| e.chunk_id != embedding.chunk_id);
        let id = state.next_id();
        let row = KnowledgeEmbedding {
            id,
            tenant_id,
            chunk_id: embedding.chunk_id,
            document_id: embedding.document_id,
            checksum: embedding.checksum.clone(),
            vector: embedding.vector.clone(),
            model: embedding.model.clone(),
            created_at: now,
        };
        state.embeddings.push(row.clone());
        Ok(row)
    }

    async fn chunks_needing_embedding(&self, tenant_id: TenantId) -> Result<Vec<KnowledgeChunk>> {
        let state = self.read()?;
        Ok(state
            .chunks
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| state.visible_doc(tenant_id, c.document_id).is_some())
            .filter(|c| {
                !state
                    .embeddings
                    .iter()
                    .any(|e| e.chunk_id == c.id && e.checksum == c.checksum)
            })
            .cloned()
            .collect())
    }

    async fn tenant_embeddings(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<(KnowledgeChunk, KnowledgeEmbedding)>> {
        let state = self.read()?;
        let chunks: HashMap<i64, &KnowledgeChunk> =
            state.chunks.iter().map(|c| (c.id, c)).collect();
        Ok(state
            .embeddings
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| state.visible_doc(tenant_id, e.document_id).is_some())
            .filter_map(|e| chunks.get(&e.chunk_id).map(|c| ((*c).clone(), e.clone())))
            .collect())
    }

    async fn purge_tenant(&self, tenant_id: TenantId) -> Result<PurgeCounts> {
        let mut state = self.write()?;
        let doomed: Vec<DocumentId> = state
            .documents
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .map(|d| d.id)
            .collect();
        Ok(state.remove_documents(&doomed))
    }

    async fn purge_deleted_documents(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts> {
        let mut state = self.write()?;
        let doomed: Vec<DocumentId> = state
            .documents
            .values()
            .filter(|d| matches!(d.lifecycle.deleted_at(), Some(at) if at < cutoff))
            .map(|d| d.id)
            .collect();
        Ok(state.remove_documents(&doomed))
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<RefreshToken> {
        let mut state = self.write()?;
        if state.tokens.iter().any(|t| t.token == token.token) {
            anyhow::bail!("refresh token value already exists");
        }
        let mut row = token.clone();
        row.id = state.next_id();
        state.tokens.push(row.clone());
        Ok(row)
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        Ok(self
            .read()?
            .tokens
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let Some(old) = state
            .tokens
            .iter_mut()
            .find(|t| t.token == old_token && !t.revoked && t.replaced_by_token.is_none())
        else {
            return Ok(false);
        };
        old.revoked = true;
        old.revoked_reason = Some(RevokedReason::Rotated);
        old.replaced_by_token = Some(replacement.token.clone());
        old.last_used_at = Some(now);

        let mut row = replacement.clone();
        row.id = state.next_id();
        state.tokens.push(row);
        Ok(true)
    }

    async fn revoke_family(
        &self,
        family_id: &str,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .write()?
            .revoke_where(|t| t.family_id == family_id, reason, now))
    }

    async fn revoke_user_tokens(
        &self,
        user_id: UserId,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .write()?
            .revoke_where(|t| t.user_id == user_id, reason, now))
    }

    async fn revoke_tenant_tokens(
        &self,
        tenant_id: TenantId,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .write()?
            .revoke_where(|t| t.tenant_id == tenant_id, reason, now))
    }

    async fn list_family(&self, family_id: &str) -> Result<Vec<RefreshToken>> {
        let state = self.read()?;
        let mut family: Vec<RefreshToken> = state
            .tokens
            .iter()
            .filter(|t| t.family_id == family_id)
            .cloned()
            .collect();
        family.sort_by_key(|t| t.id);
        Ok(family)
    }

    async fn delete_expired_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.write()?;
        let before = state.tokens.len();
        state.tokens.retain(|t| t.expires_at >= cutoff);
        Ok((before - state.tokens.len()) as u64)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, user_id: UserId) -> Result<Option<SessionUser>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chunk(document_id: DocumentId, idx: i64, checksum: &str) -> NewChunk {
        NewChunk {
            document_id,
            chunk_index: idx,
            content: format!("chunk {}", idx),
            section_title: None,
            checksum: checksum.to_string(),
        }
    }

    #[tokio::test]
    async fn test_chunk_checksum_unique_per_document() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let doc = store
            .insert_document(1, &NewDocument::default(), now)
            .await
            .unwrap();
        let first = store
            .insert_chunks(1, &[new_chunk(doc.id, 0, "aa"), new_chunk(doc.id, 1, "aa")], now)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        let again = store
            .insert_chunks(1, &[new_chunk(doc.id, 0, "aa")], now)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let doc = store
            .insert_document(1, &NewDocument::default(), now)
            .await
            .unwrap();
        assert!(store.get_document(2, doc.id).await.unwrap().is_none());
        assert!(store.list_documents(2).await.unwrap().is_empty());
        assert!(store.insert_chunks(2, &[new_chunk(doc.id, 0, "x")], now).await.is_err());
        assert!(!store.soft_delete_document(2, doc.id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_soft_deleted_document_hidden() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let doc = store
            .insert_document(1, &NewDocument::default(), now)
            .await
            .unwrap();
        assert!(store.soft_delete_document(1, doc.id, now).await.unwrap());
        assert!(store.get_document(1, doc.id).await.unwrap().is_none());
        assert!(!store.soft_delete_document(1, doc.id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_is_conditional() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let t0 = RefreshToken {
            id: 0,
            user_id: 1,
            tenant_id: 1,
            family_id: "f".into(),
            token: "t0".into(),
            issued_at: now,
            expires_at: now + chrono::Duration::days(1),
            last_used_at: None,
            revoked: false,
            revoked_reason: None,
            replaced_by_token: None,
        };
        store.insert_refresh_token(&t0).await.unwrap();
        let t1 = RefreshToken {
            token: "t1".into(),
            ..t0.clone()
        };
        let t1b = RefreshToken {
            token: "t1b".into(),
            ..t0.clone()
        };
        assert!(store.rotate_refresh_token("t0", &t1, now).await.unwrap());
        assert!(!store.rotate_refresh_token("t0", &t1b, now).await.unwrap());
        assert!(store.find_refresh_token("t1b").await.unwrap().is_none());
        let family = store.list_family("f").await.unwrap();
        assert_eq!(family.len(), 2);
        assert_eq!(family[0].replaced_by_token.as_deref(), Some("t1"));
    }
}
