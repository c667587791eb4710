//! SQLite-backed implementation of the core store traits.
//!
//! Timestamps are stored as unix seconds. Tenant scoping is part of every
//! `WHERE` clause; a row of another tenant is indistinguishable from a
//! missing one. Chunk dedup relies on the `UNIQUE(document_id, checksum)`
//! index and rotation on a conditional `UPDATE`, so both stay correct with
//! several processes writing the same database.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use gdpr_harness_core::embedding::{blob_to_vec, vec_to_blob};
use gdpr_harness_core::models::{
    DocumentId, KnowledgeChunk, KnowledgeDocument, KnowledgeEmbedding, Lifecycle, NewChunk,
    NewDocument, NewEmbedding, RefreshToken, RevokedReason, Role, SessionUser, TenantId, UserId,
};
use gdpr_harness_core::store::{KnowledgeStore, PurgeCounts, TokenStore, UserDirectory};

/// SQLite implementation of [`KnowledgeStore`], [`TokenStore`], and
/// [`UserDirectory`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a user. Emails are unique across tenants.
    pub async fn create_user(
        &self,
        tenant_id: TenantId,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<SessionUser> {
        let result = sqlx::query(
            "INSERT INTO users (tenant_id, email, role, active, created_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(tenant_id)
        .bind(email)
        .bind(role.as_str())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create user {}", email))?;

        Ok(SessionUser {
            id: result.last_insert_rowid(),
            tenant_id,
            role,
            active: true,
        })
    }

    /// Enable or disable a user. Returns `false` if the user does not exist.
    pub async fn set_user_active(&self, user_id: UserId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn from_ts(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).with_context(|| format!("timestamp out of range: {}", ts))
}

fn opt_ts(ts: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ts.map(from_ts).transpose()
}

/// Drop sub-second precision so returned values equal what a re-read yields.
fn truncate(now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    from_ts(now.timestamp())
}

fn document_from_row(row: &SqliteRow) -> Result<KnowledgeDocument> {
    let tags_json: Option<String> = row.try_get("tags_json")?;
    let tags = tags_json
        .map(|s| serde_json::from_str::<Vec<String>>(&s))
        .transpose()
        .context("corrupt tags_json")?;
    Ok(KnowledgeDocument {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        source: row.try_get("source")?,
        language: row.try_get("language")?,
        tags,
        created_at: from_ts(row.try_get("created_at")?)?,
        updated_at: opt_ts(row.try_get("updated_at")?)?,
        lifecycle: Lifecycle::from_deleted_at(opt_ts(row.try_get("deleted_at")?)?),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<KnowledgeChunk> {
    Ok(KnowledgeChunk {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        content: row.try_get("content")?,
        section_title: row.try_get("section_title")?,
        checksum: row.try_get("checksum")?,
        created_at: from_ts(row.try_get("created_at")?)?,
    })
}

fn token_from_row(row: &SqliteRow) -> Result<RefreshToken> {
    let reason: Option<String> = row.try_get("revoked_reason")?;
    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        family_id: row.try_get("family_id")?,
        token: row.try_get("token")?,
        issued_at: from_ts(row.try_get("issued_at")?)?,
        expires_at: from_ts(row.try_get("expires_at")?)?,
        last_used_at: opt_ts(row.try_get("last_used_at")?)?,
        revoked: row.try_get("revoked")?,
        revoked_reason: reason.as_deref().map(RevokedReason::parse),
        replaced_by_token: row.try_get("replaced_by_token")?,
    })
}

const CHUNK_COLUMNS: &str =
    "c.id, c.tenant_id, c.document_id, c.chunk_index, c.content, c.section_title, c.checksum, c.created_at";

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn insert_document(
        &self,
        tenant_id: TenantId,
        doc: &NewDocument,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeDocument> {
        let now = truncate(now)?;
        let tags_json = doc.tags.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_documents (tenant_id, title, content, source, language, tags_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tenant_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.source)
        .bind(&doc.language)
        .bind(&tags_json)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(KnowledgeDocument {
            id: result.last_insert_rowid(),
            tenant_id,
            title: doc.title.clone(),
            content: doc.content.clone(),
            source: doc.source.clone(),
            language: doc.language.clone(),
            tags: doc.tags.clone(),
            created_at: now,
            updated_at: None,
            lifecycle: Lifecycle::Active,
        })
    }

    async fn get_document(
        &self,
        tenant_id: TenantId,
        id: DocumentId,
    ) -> Result<Option<KnowledgeDocument>> {
        let row = sqlx::query(
            "SELECT * FROM knowledge_documents WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, tenant_id: TenantId) -> Result<Vec<KnowledgeDocument>> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_documents WHERE tenant_id = ? AND deleted_at IS NULL ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn soft_delete_document(
        &self,
        tenant_id: TenantId,
        id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_documents SET deleted_at = ?, updated_at = ?
            WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(now.timestamp())
        .bind(now.timestamp())
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_chunks(
        &self,
        tenant_id: TenantId,
        chunks: &[NewChunk],
        now: DateTime<Utc>,
    ) -> Result<Vec<KnowledgeChunk>> {
        let now = truncate(now)?;
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::new();

        for chunk in chunks {
            let visible: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM knowledge_documents WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
            )
            .bind(chunk.document_id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;
            if visible.is_none() {
                bail!("document {} does not exist for tenant", chunk.document_id);
            }

            let result = sqlx::query(
                r#"
                INSERT INTO knowledge_chunks (tenant_id, document_id, chunk_index, content, section_title, checksum, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(document_id, checksum) DO NOTHING
                "#,
            )
            .bind(tenant_id)
            .bind(chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.section_title)
            .bind(&chunk.checksum)
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                continue;
            }
            created.push(KnowledgeChunk {
                id: result.last_insert_rowid(),
                tenant_id,
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                section_title: chunk.section_title.clone(),
                checksum: chunk.checksum.clone(),
                created_at: now,
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_chunks(
        &self,
        tenant_id: TenantId,
        document_id: DocumentId,
    ) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHUNK_COLUMNS}
            FROM knowledge_chunks c
            JOIN knowledge_documents d ON d.id = c.document_id AND d.deleted_at IS NULL
            WHERE c.tenant_id = ? AND c.document_id = ?
            ORDER BY c.chunk_index
            "#
        ))
        .bind(tenant_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn upsert_embedding(
        &self,
        tenant_id: TenantId,
        embedding: &NewEmbedding,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEmbedding> {
        let now = truncate(now)?;
        let owned: Option<i64> =
            sqlx::query_scalar("SELECT id FROM knowledge_chunks WHERE id = ? AND tenant_id = ?")
                .bind(embedding.chunk_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        if owned.is_none() {
            bail!("chunk {} does not exist for tenant", embedding.chunk_id);
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO knowledge_embeddings (tenant_id, chunk_id, document_id, checksum, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                checksum = excluded.checksum,
                model = excluded.model,
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(embedding.chunk_id)
        .bind(embedding.document_id)
        .bind(&embedding.checksum)
        .bind(&embedding.model)
        .bind(embedding.vector.len() as i64)
        .bind(vec_to_blob(&embedding.vector))
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(KnowledgeEmbedding {
            id,
            tenant_id,
            chunk_id: embedding.chunk_id,
            document_id: embedding.document_id,
            checksum: embedding.checksum.clone(),
            vector: embedding.vector.clone(),
            model: embedding.model.clone(),
            created_at: now,
        })
    }

    async fn chunks_needing_embedding(&self, tenant_id: TenantId) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHUNK_COLUMNS}
            FROM knowledge_chunks c
            JOIN knowledge_documents d ON d.id = c.document_id AND d.deleted_at IS NULL
            LEFT JOIN knowledge_embeddings e ON e.chunk_id = c.id
            WHERE c.tenant_id = ? AND (e.id IS NULL OR e.checksum != c.checksum)
            ORDER BY c.document_id, c.chunk_index
            "#
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn tenant_embeddings(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<(KnowledgeChunk, KnowledgeEmbedding)>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CHUNK_COLUMNS},
                   e.id AS e_id, e.chunk_id AS e_chunk_id, e.document_id AS e_document_id,
                   e.checksum AS e_checksum, e.model AS e_model, e.vector AS e_vector,
                   e.created_at AS e_created_at
            FROM knowledge_embeddings e
            JOIN knowledge_chunks c ON c.id = e.chunk_id AND c.tenant_id = e.tenant_id
            JOIN knowledge_documents d ON d.id = c.document_id AND d.deleted_at IS NULL
            WHERE e.tenant_id = ?
            "#
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let chunk = chunk_from_row(row)?;
                let blob: Vec<u8> = row.try_get("e_vector")?;
                let embedding = KnowledgeEmbedding {
                    id: row.try_get("e_id")?,
                    tenant_id,
                    chunk_id: row.try_get("e_chunk_id")?,
                    document_id: row.try_get("e_document_id")?,
                    checksum: row.try_get("e_checksum")?,
                    vector: blob_to_vec(&blob),
                    model: row.try_get("e_model")?,
                    created_at: from_ts(row.try_get("e_created_at")?)?,
                };
                Ok((chunk, embedding))
            })
            .collect()
    }

    async fn purge_tenant(&self, tenant_id: TenantId) -> Result<PurgeCounts> {
        let mut tx = self.pool.begin().await?;
        let embeddings = sqlx::query("DELETE FROM knowledge_embeddings WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let chunks = sqlx::query("DELETE FROM knowledge_chunks WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let documents = sqlx::query("DELETE FROM knowledge_documents WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(PurgeCounts {
            documents,
            chunks,
            embeddings,
        })
    }

    async fn purge_deleted_documents(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts> {
        const DOOMED: &str =
            "SELECT id FROM knowledge_documents WHERE deleted_at IS NOT NULL AND deleted_at < ?";
        let cutoff = cutoff.timestamp();
        let mut tx = self.pool.begin().await?;
        let embeddings = sqlx::query(&format!(
            "DELETE FROM knowledge_embeddings WHERE document_id IN ({DOOMED})"
        ))
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let chunks = sqlx::query(&format!(
            "DELETE FROM knowledge_chunks WHERE document_id IN ({DOOMED})"
        ))
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let documents = sqlx::query(
            "DELETE FROM knowledge_documents WHERE deleted_at IS NOT NULL AND deleted_at < ?",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        Ok(PurgeCounts {
            documents,
            chunks,
            embeddings,
        })
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<RefreshToken> {
        let result = sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, tenant_id, family_id, token, issued_at, expires_at, revoked)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(token.user_id)
        .bind(token.tenant_id)
        .bind(&token.family_id)
        .bind(&token.token)
        .bind(token.issued_at.timestamp())
        .bind(token.expires_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(RefreshToken {
            id: result.last_insert_rowid(),
            issued_at: truncate(token.issued_at)?,
            expires_at: truncate(token.expires_at)?,
            ..token.clone()
        })
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let spent = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = 1, revoked_reason = ?, replaced_by_token = ?, last_used_at = ?
            WHERE token = ? AND revoked = 0 AND replaced_by_token IS NULL
            "#,
        )
        .bind(RevokedReason::Rotated.as_str())
        .bind(&replacement.token)
        .bind(now.timestamp())
        .bind(old_token)
        .execute(&mut *tx)
        .await?;

        if spent.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, tenant_id, family_id, token, issued_at, expires_at, revoked)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(replacement.user_id)
        .bind(replacement.tenant_id)
        .bind(&replacement.family_id)
        .bind(&replacement.token)
        .bind(replacement.issued_at.timestamp())
        .bind(replacement.expires_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_family(
        &self,
        family_id: &str,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_reason = ?, last_used_at = ? WHERE family_id = ? AND revoked = 0",
        )
        .bind(reason.as_str())
        .bind(now.timestamp())
        .bind(family_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_user_tokens(
        &self,
        user_id: UserId,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_reason = ?, last_used_at = ? WHERE user_id = ? AND revoked = 0",
        )
        .bind(reason.as_str())
        .bind(now.timestamp())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_tenant_tokens(
        &self,
        tenant_id: TenantId,
        reason: &RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_reason = ?, last_used_at = ? WHERE tenant_id = ? AND revoked = 0",
        )
        .bind(reason.as_str())
        .bind(now.timestamp())
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_family(&self, family_id: &str) -> Result<Vec<RefreshToken>> {
        let rows = sqlx::query("SELECT * FROM refresh_tokens WHERE family_id = ? ORDER BY id")
            .bind(family_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(token_from_row).collect()
    }

    async fn delete_expired_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_user(&self, user_id: UserId) -> Result<Option<SessionUser>> {
        let row = sqlx::query("SELECT id, tenant_id, role, active FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role")?;
        Ok(Some(SessionUser {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            role: Role::parse(&role).with_context(|| format!("unknown role '{}'", role))?,
            active: row.try_get("active")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use chrono::Duration;
    use gdpr_harness_core::chunk::content_checksum;
    use gdpr_harness_core::embedding::HashEmbedder;
    use gdpr_harness_core::ingest::{delete_document, ingest, reindex_document, IngestParams};
    use gdpr_harness_core::retrieval::{retrieve, RetrievalParams};

    async fn store() -> SqliteStore {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn doc(content: &str) -> NewDocument {
        NewDocument {
            title: Some("Policy".into()),
            content: content.to_string(),
            tags: Some(vec!["gdpr".into()]),
            ..NewDocument::default()
        }
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_tenant_scope() {
        let s = store().await;
        let now = Utc::now();
        let d = s.insert_document(1, &doc("body"), now).await.unwrap();
        let fetched = s.get_document(1, d.id).await.unwrap().unwrap();
        assert_eq!(fetched.tags, Some(vec!["gdpr".to_string()]));
        assert_eq!(fetched.created_at, d.created_at);
        assert!(s.get_document(2, d.id).await.unwrap().is_none());
        assert!(!s.soft_delete_document(2, d.id, now).await.unwrap());
        assert!(s.soft_delete_document(1, d.id, now).await.unwrap());
        assert!(s.list_documents(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unique_checksum_skips_duplicates() {
        let s = store().await;
        let now = Utc::now();
        let d = s.insert_document(1, &doc("body"), now).await.unwrap();
        let chunk = |i: i64| NewChunk {
            document_id: d.id,
            chunk_index: i,
            content: "same".into(),
            section_title: None,
            checksum: content_checksum("same"),
        };
        let created = s.insert_chunks(1, &[chunk(0), chunk(1)], now).await.unwrap();
        assert_eq!(created.len(), 1);
        assert!(s.insert_chunks(1, &[chunk(0)], now).await.unwrap().is_empty());
        assert!(s.insert_chunks(2, &[chunk(0)], now).await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_retrieve_delete_on_sqlite() {
        let s = store().await;
        let now = Utc::now();
        let content = format!(
            "# Intro\nThis is a short section.\n# Details\n{}",
            "word ".repeat(2000)
        );
        let (d, report) = ingest(&s, &HashEmbedder, &IngestParams::default(), 1, doc(&content), now)
            .await
            .unwrap();
        assert!(report.chunks_created >= 2);

        let again = reindex_document(
            &s,
            &HashEmbedder,
            &IngestParams::default().chunking,
            1,
            d.id,
            now,
        )
        .await
        .unwrap();
        assert_eq!(again.chunks_created, 0);

        let results = retrieve(
            &s,
            &HashEmbedder,
            &RetrievalParams::default(),
            1,
            "This is a short section.",
            Some(5),
        )
        .await
        .unwrap();
        assert_eq!(results[0].chunk.section_title.as_deref(), Some("Intro"));
        assert!((results[0].score - 1.0).abs() < 1e-6);

        let other = retrieve(
            &s,
            &HashEmbedder,
            &RetrievalParams::default(),
            2,
            "This is a short section.",
            None,
        )
        .await
        .unwrap();
        assert!(other.is_empty());

        delete_document(&s, 1, d.id, now).await.unwrap();
        assert!(s.tenant_embeddings(1).await.unwrap().is_empty());
        let purged = s
            .purge_deleted_documents(now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged.documents, 1);
        assert_eq!(purged.chunks, report.chunks_created as u64);
    }

    #[tokio::test]
    async fn test_purge_tenant_counts() {
        let s = store().await;
        let now = Utc::now();
        for t in [1, 2] {
            ingest(&s, &HashEmbedder, &IngestParams::default(), t, doc("apples"), now)
                .await
                .unwrap();
        }
        let counts = s.purge_tenant(1).await.unwrap();
        assert_eq!(
            counts,
            PurgeCounts {
                documents: 1,
                chunks: 1,
                embeddings: 1
            }
        );
        assert_eq!(s.tenant_embeddings(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_rotation() {
        let s = store().await;
        let now = Utc::now();
        let t0 = RefreshToken {
            id: 0,
            user_id: 1,
            tenant_id: 1,
            family_id: "fam".into(),
            token: "t0".into(),
            issued_at: now,
            expires_at: now + Duration::days(30),
            last_used_at: None,
            revoked: false,
            revoked_reason: None,
            replaced_by_token: None,
        };
        s.insert_refresh_token(&t0).await.unwrap();
        let t1 = RefreshToken {
            token: "t1".into(),
            ..t0.clone()
        };
        let t2 = RefreshToken {
            token: "t2".into(),
            ..t0.clone()
        };
        assert!(s.rotate_refresh_token("t0", &t1, now).await.unwrap());
        assert!(!s.rotate_refresh_token("t0", &t2, now).await.unwrap());
        assert!(s.find_refresh_token("t2").await.unwrap().is_none());

        let old = s.find_refresh_token("t0").await.unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.revoked_reason, Some(RevokedReason::Rotated));
        assert_eq!(old.replaced_by_token.as_deref(), Some("t1"));

        assert_eq!(
            s.revoke_family("fam", &RevokedReason::ReuseDetected, now)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            s.delete_expired_tokens(now + Duration::days(31)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_users() {
        let s = store().await;
        let u = s
            .create_user(3, "dpo@example.com", Role::Admin, Utc::now())
            .await
            .unwrap();
        assert_eq!(s.find_user(u.id).await.unwrap(), Some(u.clone()));
        assert!(s
            .create_user(4, "dpo@example.com", Role::User, Utc::now())
            .await
            .is_err());
        assert!(s.set_user_active(u.id, false).await.unwrap());
        assert!(!s.find_user(u.id).await.unwrap().unwrap().active);
        assert!(s.find_user(999).await.unwrap().is_none());
    }
}
