//! # GDPR Harness
//!
//! Multi-tenant knowledge retrieval with GDPR-minded session handling.
//!
//! Documents are normalized, split into overlapping section-aware chunks,
//! embedded with a deterministic hash embedder, and stored per tenant in
//! SQLite. Queries score every embedding of the caller's tenant by cosine
//! similarity and keep the best hits above a threshold. Sessions use
//! rotating refresh tokens: presenting a spent token revokes its whole
//! family.
//!
//! The pure logic lives in the `gdpr-harness-core` crate; this crate adds
//! configuration, SQLite storage, the `gdh` CLI, and the HTTP API.
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ gdh CLI  │──▶│ core:        │──▶│  SQLite  │
//! │ HTTP API │   │ ingest/search│   │ per-     │
//! └──────────┘   │ sessions     │   │ tenant   │
//!                └──────────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core store traits |
//! | [`ingest`] | `gdh ingest`, `reindex`, `repair` |
//! | [`docs`] | `gdh docs`, `chunks`, `delete`, `purge` |
//! | [`search`] | `gdh search` |
//! | [`sessions`] | `gdh session ...` and session wiring |
//! | [`users`] | `gdh user add`, `disable` |
//! | [`sweep`] | Retention sweep |
//! | [`server`] | HTTP API |
//! | [`logging`] | `tracing` subscriber setup |

pub mod config;
pub mod db;
pub mod docs;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sessions;
pub mod sqlite_store;
pub mod sweep;
pub mod users;
