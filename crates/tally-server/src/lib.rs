//! Tally Web Server
//!
//! Axum-based REST API for the ledger sync and review UI collaborators.
//!
//! Security features:
//! - API key authentication (secure by default, use --no-auth for local dev)
//! - Restrictive CORS policy
//! - Input validation (pagination limits, batch size limits)
//! - Audit logging for corrections and job control
//! - Sanitized error responses

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::ai::{AIBackend, AIClient, AiFallback};
use tally_core::{Categorizer, Database, EngineConfig, RuleTable};

mod handlers;
mod jobs;

pub use jobs::{resume_unfinished_jobs, spawn_job};

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Maximum records accepted in one ingest call
pub const MAX_INGEST_BATCH: usize = 5000;

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// API keys accepted as "Bearer <key>" in the Authorization header
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

impl ServerConfig {
    /// Read `TALLY_API_KEYS` and `TALLY_ALLOWED_ORIGINS` (comma-separated)
    pub fn from_env(require_auth: bool) -> Self {
        Self {
            require_auth,
            allowed_origins: parse_list(&std::env::var("TALLY_ALLOWED_ORIGINS").unwrap_or_default()),
            api_keys: parse_list(&std::env::var("TALLY_API_KEYS").unwrap_or_default()),
        }
    }
}

/// Split a comma-separated setting, dropping blanks
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    pub engine: EngineConfig,
    pub rules: RuleTable,
    pub ai: Option<AiFallback>,
    /// Jobs with a live runner in this process
    running_jobs: Mutex<HashSet<i64>>,
}

impl AppState {
    pub fn new(
        db: Database,
        config: ServerConfig,
        engine: EngineConfig,
        rules: RuleTable,
        ai: Option<AiFallback>,
    ) -> Self {
        Self {
            db,
            config,
            engine,
            rules,
            ai,
            running_jobs: Mutex::new(HashSet::new()),
        }
    }

    /// Build state from engine config, with the AI backend taken from the environment
    pub fn from_engine_config(
        db: Database,
        config: ServerConfig,
        engine: EngineConfig,
    ) -> anyhow::Result<Self> {
        let rules = RuleTable::load(engine.rules_path.as_deref())?;
        info!("Loaded {} categorization rules", rules.len());

        let ai = AIClient::from_env().and_then(|client| {
            info!(
                "AI backend configured: {} (model: {})",
                client.host(),
                client.model()
            );
            AiFallback::from_config(client, &engine)
        });
        if ai.is_none() {
            info!("ℹ️  AI fallback disabled (set OLLAMA_HOST to enable it)");
        }

        Ok(Self::new(db, config, engine, rules, ai))
    }

    /// A categorizer for one request or job run
    ///
    /// Each call gets its own AI answer cache.
    pub fn categorizer(&self) -> anyhow::Result<Categorizer<'_>> {
        Ok(Categorizer::new(
            &self.db,
            &self.rules,
            self.ai.as_ref(),
            self.engine.review_policy()?,
        ))
    }

    /// Claim a job for a runner; false if one is already running it
    pub(crate) fn claim_job(&self, job_id: i64) -> bool {
        self.running_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id)
    }

    pub(crate) fn release_job(&self, job_id: i64) {
        self.running_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }
}

/// Authentication middleware - validates API keys
///
/// Keys are compared in constant time to prevent timing attacks.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        tracing::debug!(path = %request.uri().path(), "Authenticated via API key");
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid auth");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate an API key against the configured keys using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();

    for key in valid_keys {
        let key_bytes = key.as_bytes();
        // Only compare if lengths match (constant-time for same-length keys)
        if provided_bytes.len() == key_bytes.len() && provided_bytes.ct_eq(key_bytes).into() {
            return true;
        }
    }
    false
}

/// Identify the caller for audit logging
/// Returns "api-key" for API key auth, or "local-dev" for unauthenticated
pub fn get_actor(headers: &axum::http::HeaderMap) -> String {
    if headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .is_some()
    {
        return "api-key".to_string();
    }

    "local-dev".to_string()
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router from engine config and environment
pub fn create_router(
    db: Database,
    config: ServerConfig,
    engine: EngineConfig,
) -> anyhow::Result<Router> {
    let state = AppState::from_engine_config(db, config, engine)?;
    Ok(create_router_with_state(Arc::new(state)))
}

/// Create the application router around existing state (for testing)
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Ledger sync + review UI, scoped per user
        .route(
            "/users/:user_id/transactions",
            get(handlers::list_transactions).post(handlers::ingest_transactions),
        )
        .route(
            "/users/:user_id/transactions/:id",
            get(handlers::get_transaction),
        )
        .route(
            "/users/:user_id/transactions/:id/categorize",
            post(handlers::categorize_transaction),
        )
        .route(
            "/users/:user_id/transactions/:id/category",
            put(handlers::correct_transaction),
        )
        .route("/users/:user_id/review", get(handlers::list_review))
        .route(
            "/users/:user_id/categorize/preview",
            post(handlers::preview_categorization),
        )
        // Learned patterns
        .route("/users/:user_id/patterns", get(handlers::list_patterns))
        .route(
            "/users/:user_id/patterns/:token",
            axum::routing::delete(handlers::delete_pattern),
        )
        // Bulk re-categorization
        .route(
            "/users/:user_id/recategorize",
            post(handlers::start_recategorize),
        )
        .route("/users/:user_id/jobs", get(handlers::list_jobs))
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/jobs/:id/resume", post(handlers::resume_job))
        // Reference data
        .route("/categories", get(handlers::list_categories))
        .route("/rules", get(handlers::list_rules))
        .route("/rules/test", post(handlers::test_rules))
        .route("/health", get(handlers::health))
        // Audit log
        .route("/audit", get(handlers::list_audit_log));

    // Build CORS layer
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let cors = if state.config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        ))
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    config: ServerConfig,
    engine: EngineConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    } else if config.api_keys.is_empty() {
        warn!("⚠️  No API keys configured (TALLY_API_KEYS) - every request will be rejected");
    }

    let state = Arc::new(AppState::from_engine_config(db, config, engine)?);

    check_ai_connection(&state).await;

    // Pick up jobs a previous process left pending or running
    match resume_unfinished_jobs(&state) {
        Ok(count) if count > 0 => {
            warn!("⚠️  Resumed {} unfinished job(s) from previous server session", count);
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to resume unfinished jobs: {}", e);
        }
    }

    let app = create_router_with_state(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log AI backend connection status
async fn check_ai_connection(state: &AppState) {
    if let Some(ref ai) = state.ai {
        let status = ai.status().await;
        if status.reachable {
            info!("✅ AI backend connected: {} (model: {})", status.host, status.model);
        } else {
            warn!(
                "⚠️  AI backend configured but not responding: {} (model: {})",
                status.host, status.model
            );
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn service_unavailable(msg: &str) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();

        // Core errors the caller can act on keep their message
        use tally_core::Error as CoreError;
        let store_error = match err.downcast_ref::<CoreError>() {
            Some(CoreError::Validation(msg)) => return Self::bad_request(msg),
            Some(CoreError::NotFound(what)) => {
                return Self::not_found(&format!("Not found: {}", what))
            }
            Some(CoreError::Job(msg)) => return Self::conflict(msg),
            Some(core) => core.is_store_error(),
            None => false,
        };

        if store_error {
            return Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "Storage temporarily unavailable, retry later".to_string(),
                internal: Some(err),
            };
        }

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
