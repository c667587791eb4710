//! Configuration parsing and validation.
//!
//! GDPR Harness is configured by a TOML file (default `config/gdh.toml`):
//!
//! ```toml
//! [db]
//! path = "./data/gdh.sqlite"
//!
//! [chunking]
//! max_tokens = 1200
//! min_tokens = 400
//! overlap_ratio = 0.15
//!
//! [retrieval]
//! threshold = 0.2
//! default_top_k = 5
//! max_top_k = 50
//!
//! [ingest]
//! max_content_chars = 200000
//!
//! [auth]
//! secret_env = "SECRET_KEY"
//! access_token_minutes = 60
//! refresh_token_days = 30
//!
//! [retention]
//! tokens_days = 30
//! deleted_documents_days = 30
//!
//! [rate_limit]
//! window_secs = 60
//! auth_per_window = 10
//! search_per_window = 20
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Only `[db]` is required; every other section falls back to the values
//! shown above.

use anyhow::{Context, Result};
use gdpr_harness_core::chunk::ChunkingParams;
use gdpr_harness_core::ingest::IngestParams;
use gdpr_harness_core::retrieval::RetrievalParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_tokens: default_min_tokens(),
            overlap_ratio: default_overlap_ratio(),
        }
    }
}

fn default_max_tokens() -> usize {
    gdpr_harness_core::chunk::DEFAULT_MAX_TOKENS
}
fn default_min_tokens() -> usize {
    gdpr_harness_core::chunk::DEFAULT_MIN_TOKENS
}
fn default_overlap_ratio() -> f64 {
    gdpr_harness_core::chunk::DEFAULT_OVERLAP_RATIO
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_threshold() -> f64 {
    gdpr_harness_core::retrieval::DEFAULT_THRESHOLD
}
fn default_top_k() -> usize {
    gdpr_harness_core::retrieval::DEFAULT_TOP_K
}
fn default_max_top_k() -> usize {
    gdpr_harness_core::retrieval::DEFAULT_MAX_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_max_content_chars() -> usize {
    gdpr_harness_core::ingest::DEFAULT_MAX_CONTENT_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Inline signing secret. Takes precedence over `secret_env`.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    #[serde(default = "default_access_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_days")]
    pub refresh_token_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_env: default_secret_env(),
            access_token_minutes: default_access_minutes(),
            refresh_token_days: default_refresh_days(),
        }
    }
}

fn default_secret_env() -> String {
    "SECRET_KEY".to_string()
}
fn default_access_minutes() -> i64 {
    60
}
fn default_refresh_days() -> i64 {
    gdpr_harness_core::session::DEFAULT_REFRESH_TTL_DAYS
}

impl AuthConfig {
    /// Resolve the signing secret from the config or the environment.
    pub fn resolve_secret(&self) -> Result<String> {
        if let Some(secret) = self.secret.as_ref().filter(|s| !s.is_empty()) {
            return Ok(secret.clone());
        }
        match std::env::var(&self.secret_env) {
            Ok(v) if !v.is_empty() => Ok(v),
            _ => anyhow::bail!(
                "No signing secret: set auth.secret or the {} environment variable",
                self.secret_env
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub tokens_days: i64,
    #[serde(default = "default_retention_days")]
    pub deleted_documents_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            tokens_days: default_retention_days(),
            deleted_documents_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> i64 {
    gdpr_harness_core::session::DEFAULT_TOKEN_RETENTION_DAYS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
    #[serde(default = "default_auth_per_window")]
    pub auth_per_window: u32,
    #[serde(default = "default_search_per_window")]
    pub search_per_window: u32,
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            auth_per_window: default_auth_per_window(),
            search_per_window: default_search_per_window(),
            max_keys: default_max_keys(),
        }
    }
}

fn default_window_secs() -> i64 {
    60
}
fn default_auth_per_window() -> u32 {
    10
}
fn default_search_per_window() -> u32 {
    20
}
fn default_max_keys() -> usize {
    gdpr_harness_core::ratelimit::DEFAULT_MAX_KEYS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            max_tokens: self.chunking.max_tokens,
            min_tokens: self.chunking.min_tokens,
            overlap_ratio: self.chunking.overlap_ratio,
        }
    }

    pub fn ingest_params(&self) -> IngestParams {
        IngestParams {
            chunking: self.chunking_params(),
            max_content_chars: self.ingest.max_content_chars,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            threshold: self.retrieval.threshold,
            default_top_k: self.retrieval.default_top_k,
            max_top_k: self.retrieval.max_top_k,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.min_tokens > config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be <= chunking.max_tokens");
    }
    if !(0.0..=1.0).contains(&config.chunking.overlap_ratio) {
        anyhow::bail!("chunking.overlap_ratio must be in [0.0, 1.0]");
    }

    // Retrieval
    if !(-1.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.default_top_k < 1 || config.retrieval.max_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k and retrieval.max_top_k must be >= 1");
    }

    if config.ingest.max_content_chars == 0 {
        anyhow::bail!("ingest.max_content_chars must be > 0");
    }

    // Auth
    if config.auth.access_token_minutes < 1 {
        anyhow::bail!("auth.access_token_minutes must be >= 1");
    }
    if config.auth.refresh_token_days < 1 {
        anyhow::bail!("auth.refresh_token_days must be >= 1");
    }

    if config.retention.tokens_days < 0 || config.retention.deleted_documents_days < 0 {
        anyhow::bail!("retention periods must be >= 0 days");
    }

    if config.rate_limit.window_secs < 1 {
        anyhow::bail!("rate_limit.window_secs must be >= 1");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Unknown logging format: '{}'. Must be text or json.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/gdh.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_tokens, 1200);
        assert_eq!(config.chunking.min_tokens, 400);
        assert_eq!(config.retrieval.threshold, 0.2);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.ingest.max_content_chars, 200_000);
        assert_eq!(config.auth.secret_env, "SECRET_KEY");
        assert_eq!(config.auth.refresh_token_days, 30);
        assert_eq!(config.rate_limit.search_per_window, 20);
        assert_eq!(config.rate_limit.auth_per_window, 10);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_invalid_chunking_rejected() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nmax_tokens = 100\nmin_tokens = 200\n")
            .unwrap_err();
        assert!(err.to_string().contains("min_tokens"));
        assert!(parse("[db]\npath = \"x\"\n[chunking]\noverlap_ratio = 1.5\n").is_err());
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[logging]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn test_inline_secret_wins() {
        let config = parse("[db]\npath = \"x\"\n[auth]\nsecret = \"inline\"\nsecret_env = \"GDH_TEST_UNSET_VAR\"\n")
            .unwrap();
        assert_eq!(config.auth.resolve_secret().unwrap(), "inline");
    }

    #[test]
    fn test_missing_secret_is_error() {
        let config = parse("[db]\npath = \"x\"\n[auth]\nsecret_env = \"GDH_TEST_DEFINITELY_UNSET\"\n")
            .unwrap();
        assert!(config.auth.resolve_secret().is_err());
    }
}
