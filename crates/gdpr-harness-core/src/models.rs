//! Core data models for the knowledge base and session store.
//!
//! Every persisted row carries a `tenant_id`; stores filter on it for every
//! read and write.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub type TenantId = i64;
pub type UserId = i64;
pub type DocumentId = i64;
pub type ChunkId = i64;

/// Visibility of a soft-deletable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at: DateTime<Utc> },
}

impl Lifecycle {
    pub fn is_visible(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(at) => Lifecycle::Deleted { at },
            None => Lifecycle::Active,
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Deleted { at } => Some(*at),
        }
    }
}

/// Ingestion request for a new knowledge document.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: Option<String>,
    pub content: String,
    pub source: Option<String>,
    pub language: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// A tenant-owned source document. Content is immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeDocument {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub title: Option<String>,
    pub content: String,
    pub source: Option<String>,
    pub language: Option<String>,
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub lifecycle: Lifecycle,
}

/// Chunk row to be inserted; ids and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub content: String,
    pub section_title: Option<String>,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub content: String,
    pub section_title: Option<String>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub checksum: String,
    pub vector: Vec<f32>,
    pub model: String,
}

/// One embedding per chunk. `checksum` must equal the chunk's checksum;
/// when it does not, the embedding is stale.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEmbedding {
    pub id: i64,
    pub tenant_id: TenantId,
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub checksum: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEmbedding {
    pub fn is_stale_for(&self, chunk: &KnowledgeChunk) -> bool {
        self.chunk_id != chunk.id || self.checksum != chunk.checksum
    }
}

/// Why a refresh token was revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RevokedReason {
    Rotated,
    ReuseDetected,
    Logout,
    UserErased,
    TenantErased,
    /// Any other explicit administrative action.
    Admin(String),
}

impl RevokedReason {
    pub fn as_str(&self) -> &str {
        match self {
            RevokedReason::Rotated => "rotated",
            RevokedReason::ReuseDetected => "reuse_detected",
            RevokedReason::Logout => "logout",
            RevokedReason::UserErased => "dsar_user_delete",
            RevokedReason::TenantErased => "dsar_tenant_delete",
            RevokedReason::Admin(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "rotated" => RevokedReason::Rotated,
            "reuse_detected" => RevokedReason::ReuseDetected,
            "logout" => RevokedReason::Logout,
            "dsar_user_delete" => RevokedReason::UserErased,
            "dsar_tenant_delete" => RevokedReason::TenantErased,
            other => RevokedReason::Admin(other.to_string()),
        }
    }
}

impl From<RevokedReason> for String {
    fn from(r: RevokedReason) -> Self {
        r.as_str().to_string()
    }
}

/// Derived state of a refresh token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Rotated,
    ReuseRevoked,
    /// Revoked for any other reason (logout, erasure, admin).
    Revoked,
    Expired,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Active => "active",
            TokenState::Rotated => "rotated",
            TokenState::ReuseRevoked => "reuse_revoked",
            TokenState::Revoked => "revoked",
            TokenState::Expired => "expired",
        }
    }
}

/// A single-use bearer secret belonging to a rotation family.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshToken {
    pub id: i64,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub family_id: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_reason: Option<RevokedReason>,
    pub replaced_by_token: Option<String>,
}

impl RefreshToken {
    /// True once the token has been consumed or burned. A token with a
    /// replacement is always treated as spent, whatever its flag says.
    pub fn is_spent(&self) -> bool {
        self.revoked || self.replaced_by_token.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        if self.is_spent() {
            return match self.revoked_reason {
                Some(RevokedReason::Rotated) => TokenState::Rotated,
                Some(RevokedReason::ReuseDetected) => TokenState::ReuseRevoked,
                _ if self.replaced_by_token.is_some() => TokenState::Rotated,
                _ => TokenState::Revoked,
            };
        }
        if self.is_expired(now) {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// The slice of a user record that session handling needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
    pub active: bool,
}
