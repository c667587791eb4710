//! # GDPR Harness CLI (`gdh`)
//!
//! ## Usage
//!
//! ```bash
//! gdh --config ./config/gdh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gdh init` | Create the SQLite database and schema |
//! | `gdh user add\|disable\|revoke` | Minimal user records for sessions |
//! | `gdh ingest <file> --tenant N` | Chunk, embed, and store a document |
//! | `gdh docs --tenant N` | List a tenant's documents |
//! | `gdh chunks <id> --tenant N` | Show a document's chunks |
//! | `gdh delete <id> --tenant N` | Soft-delete a document |
//! | `gdh reindex <id> --tenant N` | Re-chunk an existing document |
//! | `gdh search "<query>" --tenant N` | Tenant-scoped semantic search |
//! | `gdh repair --tenant N` | Embed chunks with missing or stale embeddings |
//! | `gdh purge --tenant N` | Erase all knowledge and sessions of a tenant |
//! | `gdh session issue\|refresh\|logout\|family` | Refresh-token sessions |
//! | `gdh sweep` | Apply retention periods |
//! | `gdh serve` | Start the HTTP API |
//!
//! Commands that touch sessions need a signing secret: `auth.secret` in the
//! config, or the `SECRET_KEY` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gdpr_harness::ingest::DocumentMeta;
use gdpr_harness::{
    config, docs, ingest, logging, migrate, search, server, sessions, sweep, users,
};

/// GDPR Harness: multi-tenant knowledge retrieval with rotating sessions.
#[derive(Parser)]
#[command(
    name = "gdh",
    about = "GDPR Harness: multi-tenant knowledge retrieval with rotating sessions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gdh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage user records.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Ingest a text or markdown file into a tenant's knowledge base.
    Ingest {
        file: PathBuf,

        #[arg(long)]
        tenant: i64,

        /// Document title. Defaults to the file name without extension.
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// Tag to attach (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List a tenant's documents.
    Docs {
        #[arg(long)]
        tenant: i64,
    },

    /// Show the chunks of a document.
    Chunks {
        id: i64,

        #[arg(long)]
        tenant: i64,
    },

    /// Soft-delete a document. The retention sweep removes it later.
    Delete {
        id: i64,

        #[arg(long)]
        tenant: i64,
    },

    /// Re-run chunking for an existing document.
    Reindex {
        id: i64,

        #[arg(long)]
        tenant: i64,
    },

    /// Search a tenant's knowledge base.
    Search {
        query: String,

        #[arg(long)]
        tenant: i64,

        /// Number of results (clamped to `retrieval.max_top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the answer and citations as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Embed chunks whose embedding is missing or stale.
    Repair {
        #[arg(long)]
        tenant: i64,
    },

    /// Erase every document, chunk, embedding, and session of a tenant.
    Purge {
        #[arg(long)]
        tenant: i64,
    },

    /// Refresh-token sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Delete expired tokens and documents past their retention period.
    Sweep,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        email: String,

        #[arg(long)]
        tenant: i64,

        /// owner, admin, or user.
        #[arg(long, default_value = "user")]
        role: String,
    },

    /// Disable a user. Existing refresh tokens stop rotating.
    Disable { id: i64 },

    /// Revoke every session of a user.
    Revoke { id: i64 },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Start a session for a user and print its tokens.
    Issue { user: i64 },

    /// Rotate a refresh token and print the new tokens.
    Refresh { token: String },

    /// Revoke the family of a refresh token.
    Logout { token: String },

    /// Show every token in a family.
    Family { family_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::User { action } => match action {
            UserAction::Add {
                email,
                tenant,
                role,
            } => {
                users::run_user_add(&cfg, tenant, &email, &role).await?;
            }
            UserAction::Disable { id } => {
                users::run_user_disable(&cfg, id).await?;
            }
            UserAction::Revoke { id } => {
                sessions::run_revoke_user(&cfg, id).await?;
            }
        },
        Commands::Ingest {
            file,
            tenant,
            title,
            source,
            language,
            tags,
        } => {
            let meta = DocumentMeta {
                title,
                source,
                language,
                tags,
            };
            ingest::run_ingest(&cfg, tenant, &file, meta).await?;
        }
        Commands::Docs { tenant } => {
            docs::run_docs(&cfg, tenant).await?;
        }
        Commands::Chunks { id, tenant } => {
            docs::run_chunks(&cfg, tenant, id).await?;
        }
        Commands::Delete { id, tenant } => {
            docs::run_delete(&cfg, tenant, id).await?;
        }
        Commands::Reindex { id, tenant } => {
            ingest::run_reindex(&cfg, tenant, id).await?;
        }
        Commands::Search {
            query,
            tenant,
            top_k,
            json,
        } => {
            search::run_search(&cfg, tenant, &query, top_k, json).await?;
        }
        Commands::Repair { tenant } => {
            ingest::run_repair(&cfg, tenant).await?;
        }
        Commands::Purge { tenant } => {
            docs::run_purge(&cfg, tenant).await?;
        }
        Commands::Session { action } => match action {
            SessionAction::Issue { user } => {
                sessions::run_issue(&cfg, user).await?;
            }
            SessionAction::Refresh { token } => {
                sessions::run_refresh(&cfg, &token).await?;
            }
            SessionAction::Logout { token } => {
                sessions::run_logout(&cfg, &token).await?;
            }
            SessionAction::Family { family_id } => {
                sessions::run_family(&cfg, &family_id).await?;
            }
        },
        Commands::Sweep => {
            sweep::run_sweep(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
