use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Users: the minimal record sessions are checked against
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'user',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            source TEXT,
            language TEXT,
            tags_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // (document_id, checksum) keeps re-ingestion idempotent under concurrency
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            document_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            section_title TEXT,
            checksum TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, checksum),
            FOREIGN KEY (document_id) REFERENCES knowledge_documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL,
            chunk_id INTEGER NOT NULL UNIQUE,
            document_id INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES knowledge_chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            tenant_id INTEGER NOT NULL,
            family_id TEXT NOT NULL,
            token TEXT NOT NULL UNIQUE,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            last_used_at INTEGER,
            revoked INTEGER NOT NULL DEFAULT 0,
            revoked_reason TEXT,
            replaced_by_token TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_users_tenant ON users(tenant_id)",
        "CREATE INDEX IF NOT EXISTS idx_kdocs_tenant ON knowledge_documents(tenant_id, deleted_at)",
        "CREATE INDEX IF NOT EXISTS idx_kchunks_tenant_doc ON knowledge_chunks(tenant_id, document_id)",
        "CREATE INDEX IF NOT EXISTS idx_kemb_tenant ON knowledge_embeddings(tenant_id)",
        "CREATE INDEX IF NOT EXISTS idx_refresh_family ON refresh_tokens(family_id)",
        "CREATE INDEX IF NOT EXISTS idx_refresh_user ON refresh_tokens(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_refresh_tenant ON refresh_tokens(tenant_id)",
        "CREATE INDEX IF NOT EXISTS idx_refresh_expires ON refresh_tokens(expires_at)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
