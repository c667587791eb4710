//! HTTP API.
//!
//! Exposes tenant-scoped knowledge management and retrieval plus the
//! refresh-token endpoints over JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/api/rag/documents` | Ingest a document |
//! | `GET`    | `/api/rag/documents` | List visible documents |
//! | `GET`    | `/api/rag/documents/{id}/chunks` | Chunks of one document |
//! | `DELETE` | `/api/rag/documents/{id}` | Soft-delete a document |
//! | `POST`   | `/api/rag/search` | Retrieve chunks and a synthesized answer |
//! | `POST`   | `/api/auth/refresh` | Rotate a refresh token |
//! | `POST`   | `/api/auth/logout` | Revoke a refresh token family |
//!
//! Every `/api/rag/*` route requires `Authorization: Bearer <access token>`.
//! The tenant comes from the token, never from the request body, and the
//! token's tenant and role must still match the live user record.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "invalid or expired credentials" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `rate_limited` (429), `internal` (500). Every token failure produces the
//! same 401 body, and 500 responses carry no detail.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    extract::{
        rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts, Path, Request, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use gdpr_harness_core::chunk::normalize_text;
use gdpr_harness_core::clock::{Clock, SystemClock};
use gdpr_harness_core::embedding::HashEmbedder;
use gdpr_harness_core::ingest;
use gdpr_harness_core::models::{
    DocumentId, KnowledgeChunk, KnowledgeDocument, NewDocument, SessionUser,
};
use gdpr_harness_core::ratelimit::{InMemoryRateLimitBackend, RateLimiter};
use gdpr_harness_core::retrieval::{self, RagAnswer};
use gdpr_harness_core::session::SessionManager;
use gdpr_harness_core::store::{KnowledgeStore, UserDirectory};
use gdpr_harness_core::Error as CoreError;

use crate::config::Config;
use crate::db;
use crate::sessions;
use crate::sqlite_store::SqliteStore;
use crate::sweep;

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(3600);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: SqliteStore,
    sessions: Arc<SessionManager<SqliteStore>>,
    auth_limiter: RateLimiter,
    search_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: &Config, store: SqliteStore) -> anyhow::Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Like [`AppState::new`] with an explicit clock for the rate limiters.
    pub fn with_clock(
        config: &Config,
        store: SqliteStore,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let sessions = sessions::session_manager(config, store.clone())?;
        let window = Duration::seconds(config.rate_limit.window_secs);
        let max_keys = config.rate_limit.max_keys;

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            sessions: Arc::new(sessions),
            auth_limiter: RateLimiter::new(
                "auth",
                config.rate_limit.auth_per_window,
                window,
                Arc::new(InMemoryRateLimitBackend::new(max_keys)),
                clock.clone(),
            ),
            search_limiter: RateLimiter::new(
                "search",
                config.rate_limit.search_per_window,
                window,
                Arc::new(InMemoryRateLimitBackend::new(max_keys)),
                clock,
            ),
        })
    }
}

/// Build the router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so handlers can
/// see the peer address.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/rag/documents",
            post(handle_create_document).get(handle_list_documents),
        )
        .route("/api/rag/documents/{id}", delete(handle_delete_document))
        .route("/api/rag/documents/{id}/chunks", get(handle_document_chunks))
        .route("/api/rag/search", post(handle_search))
        .route("/api/auth/refresh", post(handle_refresh))
        .route("/api/auth/logout", post(handle_logout))
        .layer(cors)
        .with_state(state)
}

/// Serve `state` on an already-bound listener until the process exits.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`, with an hourly retention
/// sweep running in the background.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;
    let state = AppState::new(config, SqliteStore::new(pool))?;

    spawn_sweeper(state.config.clone(), state.sessions.clone());

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "gdh server listening");
    println!("gdh server listening on http://{}", bind_addr);

    serve(listener, state).await
}

fn spawn_sweeper(config: Arc<Config>, sessions: Arc<SessionManager<SqliteStore>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep::sweep_once(&config, sessions.store(), &*sessions).await {
                error!(error = %e, "retention sweep failed");
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn unauthorized() -> AppError {
    app_error(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "invalid or expired credentials",
    )
}

fn internal() -> AppError {
    app_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal error",
    )
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => bad_request(msg),
            CoreError::NotFound(what) => not_found(format!("{} not found", what)),
            CoreError::RateLimited { retry_after } => {
                let mut e = app_error(
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "too many requests",
                );
                e.retry_after = Some(retry_after.as_secs().max(1));
                e
            }
            e if e.is_auth_failure() => unauthorized(),
            e => {
                error!(error = %e, "request failed");
                internal()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        internal()
    }
}

// ============ Request bodies ============

/// `Json<T>` whose rejection uses the JSON error body. Serde details are
/// logged, not returned.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, AppError> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                debug!(error = %rejection.body_text(), "rejected request body");
                Err(bad_request("invalid JSON body"))
            }
        }
    }
}

// ============ Caller identity ============

/// Client IP: first `X-Forwarded-For` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// The authenticated caller of a `/api/rag/*` request.
pub struct AuthUser(pub SessionUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(unauthorized)?;

        let claims = state.sessions.signer().verify(token, Utc::now())?;
        let user_id = claims.user_id().ok_or_else(unauthorized)?;
        let user = state
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(unauthorized)?;

        if !user.active || user.tenant_id != claims.tenant_id || user.role.as_str() != claims.role {
            warn!(user_id, "access token does not match live user record");
            return Err(unauthorized());
        }
        Ok(AuthUser(user))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /api/rag/documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    #[serde(default)]
    title: Option<String>,
    content: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Serialize)]
struct DocumentResponse {
    id: DocumentId,
    tenant_id: i64,
    title: Option<String>,
    source: Option<String>,
    language: Option<String>,
    tags: Option<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<KnowledgeDocument> for DocumentResponse {
    fn from(doc: KnowledgeDocument) -> Self {
        DocumentResponse {
            id: doc.id,
            tenant_id: doc.tenant_id,
            title: doc.title,
            source: doc.source,
            language: doc.language,
            tags: doc.tags,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Serialize)]
struct CreateDocumentResponse {
    #[serde(flatten)]
    document: DocumentResponse,
    chunks_created: usize,
    embeddings_pending: usize,
}

async fn handle_create_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(req): ApiJson<CreateDocumentRequest>,
) -> Result<Json<CreateDocumentResponse>, AppError> {
    let new_doc = NewDocument {
        title: req.title,
        content: req.content,
        source: req.source,
        language: req.language,
        tags: req.tags,
    };
    let (doc, report) = ingest::ingest(
        &state.store,
        &HashEmbedder,
        &state.config.ingest_params(),
        user.tenant_id,
        new_doc,
        Utc::now(),
    )
    .await?;

    Ok(Json(CreateDocumentResponse {
        document: doc.into(),
        chunks_created: report.chunks_created,
        embeddings_pending: report.embeddings_pending,
    }))
}

async fn handle_list_documents(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let docs = state.store.list_documents(user.tenant_id).await?;
    Ok(Json(docs.into_iter().map(DocumentResponse::from).collect()))
}

async fn handle_document_chunks(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<DocumentId>,
) -> Result<Json<Vec<KnowledgeChunk>>, AppError> {
    let chunks = ingest::document_chunks(&state.store, user.tenant_id, id).await?;
    Ok(Json(chunks))
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<DocumentId>,
) -> Result<Json<OkResponse>, AppError> {
    ingest::delete_document(&state.store, user.tenant_id, id, Utc::now()).await?;
    Ok(Json(OkResponse { ok: true }))
}

// ============ POST /api/rag/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    AuthUser(user): AuthUser,
    ApiJson(req): ApiJson<SearchRequest>,
) -> Result<Json<RagAnswer>, AppError> {
    state.search_limiter.check(&client_ip(&headers, peer))?;

    let query = normalize_text(&req.query);
    let results = retrieval::retrieve(
        &state.store,
        &HashEmbedder,
        &state.config.retrieval_params(),
        user.tenant_id,
        &query,
        req.top_k,
    )
    .await?;
    Ok(Json(retrieval::synthesize_answer(&results)))
}

// ============ /api/auth ============

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    expires_at: DateTime<Utc>,
}

async fn handle_refresh(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    state.auth_limiter.check(&client_ip(&headers, peer))?;

    let tokens = state.sessions.refresh(&req.refresh_token).await?;
    Ok(Json(TokenPair {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "bearer",
        expires_at: tokens.access_expires_at,
    }))
}

async fn handle_logout(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<OkResponse>, AppError> {
    state.auth_limiter.check(&client_ip(&headers, peer))?;

    // The response never reveals whether the token existed.
    if let Err(e) = state.sessions.logout(&req.refresh_token).await {
        warn!(error = %e, "logout failed");
    }
    Ok(Json(OkResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited_config(max_keys: usize) -> Config {
        toml::from_str(&format!(
            "[db]\npath = \"unused.sqlite\"\n\
             [auth]\nsecret = \"unit-test-secret\"\n\
             [rate_limit]\nauth_per_window = 1\nsearch_per_window = 1\nmax_keys = {}\n",
            max_keys
        ))
        .unwrap()
    }

    fn peer() -> SocketAddr {
        "10.0.0.9:5555".parse().unwrap()
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "10.0.0.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" "));
        assert_eq!(client_ip(&headers, peer()), "10.0.0.9");
    }

    #[test]
    fn test_token_failures_share_one_response() {
        for err in [
            CoreError::InvalidToken,
            CoreError::TokenExpired,
            CoreError::TokenReuseDetected,
            CoreError::Unauthorized,
        ] {
            let e = AppError::from(err);
            assert_eq!(e.status, StatusCode::UNAUTHORIZED);
            assert_eq!(e.code, "unauthorized");
            assert_eq!(e.message, "invalid or expired credentials");
        }
    }

    #[test]
    fn test_error_mapping() {
        let e = AppError::from(CoreError::InvalidInput("content must not be empty".into()));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = AppError::from(CoreError::NotFound("document"));
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.message, "document not found");

        let e = AppError::from(CoreError::RateLimited {
            retry_after: StdDuration::from_millis(300),
        });
        assert_eq!(e.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(e.retry_after, Some(1));

        let e = AppError::from(CoreError::Storage(anyhow::anyhow!("database is locked")));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "internal error");
    }

    #[tokio::test]
    async fn test_limiters_track_keys_per_scope() {
        let store = SqliteStore::new(db::connect_in_memory().await.unwrap());
        let state = AppState::new(&limited_config(1), store).unwrap();

        state.auth_limiter.check("192.0.2.1").unwrap();
        state.search_limiter.check("192.0.2.1").unwrap();
        // Search traffic from the same client leaves the auth history alone.
        assert!(state.auth_limiter.check("192.0.2.1").is_err());
        assert!(state.search_limiter.check("192.0.2.1").is_err());
    }
}
