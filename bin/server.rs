// Ledger Fix - Web Server
// Upload a ledger, read the quality report, confirm the fix, download the CSV

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ledger_fix::{
    run_fix, Config, FixRefusal, FlipsideClient, QualityReport, Session, SessionStore, Summary,
    DEFAULT_SESSION_CAPACITY, SUMMARY_FILE_NAME,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
struct AppState {
    sessions: Arc<Mutex<SessionStore>>,
    config: Arc<Config>,
}

impl AppState {
    fn sessions(&self) -> MutexGuard<'_, SessionStore> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message.into()),
        }
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::err(message))).into_response()
}

/// Session response (the parsed ledger stays server-side)
#[derive(Serialize)]
struct SessionResponse {
    id: Uuid,
    fingerprint: String,
    fix_available: bool,
    fixed: bool,
    verdict: String,
    report: QualityReport,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            fingerprint: session.fingerprint.clone(),
            fix_available: session.report.fix_available(),
            fixed: session.outcome.is_some(),
            verdict: session.report.verdict(),
            report: session.report.clone(),
        }
    }
}

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
}

#[derive(Deserialize)]
struct FixRequest {
    #[serde(default)]
    confirm: bool,
}

#[derive(Serialize)]
struct FixResponse {
    reconciliation: String,
    rejected_hashes: Vec<String>,
    summary: Summary,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/sessions?filename=ledger.xlsx - Upload and check a ledger
async fn create_session(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Response {
    match Session::from_bytes(&params.filename, body.to_vec()) {
        Ok(session) => {
            let response = SessionResponse::from(&session);
            for evicted in state.sessions().insert(session) {
                info!(session = %evicted, "session evicted");
            }
            (StatusCode::CREATED, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            error!(filename = %params.filename, "upload rejected: {:#}", e);
            failure(StatusCode::BAD_REQUEST, format!("{:#}", e))
        }
    }
}

/// GET /api/sessions/:id - Quality report for an upload
async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.sessions().get(&id) {
        Some(session) => Json(ApiResponse::ok(SessionResponse::from(session))).into_response(),
        None => failure(StatusCode::NOT_FOUND, format!("session {} not found", id)),
    }
}

/// POST /api/sessions/:id/fix - Reconcile flagged rows against on-chain data
async fn fix_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FixRequest>,
) -> Response {
    let (ledger, report) = {
        let sessions = state.sessions();
        let Some(session) = sessions.get(&id) else {
            return failure(StatusCode::NOT_FOUND, format!("session {} not found", id));
        };
        if let Err(refusal) = session.fix_gate(request.confirm) {
            return failure(StatusCode::CONFLICT, refusal.to_string());
        }
        (session.ledger.clone(), session.report.clone())
    };

    // Blocking HTTP client; keep it off the async workers
    let config = state.config.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let client = FlipsideClient::new(&config.flipside)?;
        run_fix(&ledger, &report, request.confirm, &client, &config.chain)
    })
    .await;

    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            if let Some(refusal) = e.downcast_ref::<FixRefusal>() {
                return failure(StatusCode::CONFLICT, refusal.to_string());
            }
            error!(session = %id, "fix failed: {:#}", e);
            return failure(StatusCode::BAD_GATEWAY, format!("{:#}", e));
        }
        Err(e) => {
            error!(session = %id, "fix task panicked: {}", e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "fix task failed");
        }
    };

    let response = FixResponse {
        reconciliation: outcome.reconciliation.summary(),
        rejected_hashes: outcome
            .reconciliation
            .query
            .rejected
            .iter()
            .map(|r| r.hash.clone())
            .collect(),
        summary: outcome.aggregation.summary.clone(),
    };

    match state.sessions().get_mut(&id) {
        Some(session) => session.outcome = Some(outcome),
        None => return failure(StatusCode::NOT_FOUND, format!("session {} not found", id)),
    }

    info!(session = %id, rows = response.summary.rows.len(), "fix stored");
    Json(ApiResponse::ok(response)).into_response()
}

/// GET /api/sessions/:id/summary.csv - Download the summary
async fn download_summary(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let csv = {
        let sessions = state.sessions();
        let Some(session) = sessions.get(&id) else {
            return failure(StatusCode::NOT_FOUND, format!("session {} not found", id));
        };
        let Some(outcome) = &session.outcome else {
            return failure(StatusCode::NOT_FOUND, "no summary yet, run the fix first");
        };
        outcome.aggregation.summary.to_csv_bytes()
    };

    match csv {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", SUMMARY_FILE_NAME),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

/// GET / - Serve upload page
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Main Server
// ============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_fix=info,tower_http=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    println!("🌐 Ledger Fix - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::env::var("LEDGER_FIX_CONFIG").ok().map(std::path::PathBuf::from);
    let config = Config::resolve(config_path.as_deref(), None)?;
    if config.flipside.api_key.is_none() {
        println!("⚠️  No Flipside API key set; uploads work, fixes will fail");
    }

    let capacity = std::env::var("LEDGER_FIX_MAX_SESSIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SESSION_CAPACITY);

    // Create shared state
    let state = AppState {
        sessions: Arc::new(Mutex::new(SessionStore::new(capacity))),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/fix", post(fix_session))
        .route("/sessions/:id/summary.csv", get(download_summary))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state.clone());

    // Build main router
    let app = Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var("LEDGER_FIX_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/sessions", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
