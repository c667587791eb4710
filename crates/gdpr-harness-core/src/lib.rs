//! # GDPR Harness Core
//!
//! Storage-agnostic logic for GDPR Harness: data models, text
//! normalization and chunking, deterministic embeddings, the store
//! traits, knowledge ingestion and retrieval, and the refresh-token
//! rotation protocol.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The
//! `gdpr-harness` app crate supplies the SQLite store, configuration,
//! CLI, and HTTP server.
//!
//! ## Data flow
//!
//! ```text
//! document ──▶ normalize ──▶ chunk ──▶ dedup ──▶ embed ──▶ KnowledgeStore
//! query    ──▶ embed ──▶ cosine vs tenant embeddings ──▶ threshold ──▶ top-k
//! login    ──▶ issue (new family) ──▶ refresh ──▶ rotate | reuse ⇒ burn family
//! ```

pub mod access;
pub mod chunk;
pub mod clock;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod ratelimit;
pub mod retrieval;
pub mod session;
pub mod store;

pub use error::{Error, Result};
