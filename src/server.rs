//! HTTP server for the QA agent.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload-docs` | Multipart upload; builds a new knowledge base |
//! | `POST` | `/generate-test-cases` | Draft test cases grounded in a knowledge base |
//! | `POST` | `/generate-selenium` | Turn one test case plus HTML into a script |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "knowledge base not found: kb_123" } }
//! ```
//!
//! | Code | Status | Raised when |
//! |------|--------|-------------|
//! | `bad_request` | 400 | no files, nothing extracted, malformed multipart |
//! | `not_found` | 404 | unknown `kb_id` |
//! | `embedding_unavailable` | 503 | embedding backend failed |
//! | `index_unavailable` | 503 | vector index failed |
//! | `generation_parse` | 500 | test-case reply was not a JSON list |
//! | `internal` | 500 | model call or staging I/O failed |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! served from another origin can call the API.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Error;
use crate::models::{TestCase, UploadedFile};
use crate::service::{QaService, UploadReport};

/// Build the router over an already constructed service.
pub fn router(service: Arc<QaService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = service.config().server.max_upload_bytes;

    Router::new()
        .route("/upload-docs", post(handle_upload_docs))
        .route("/generate-test-cases", post(handle_generate_test_cases))
        .route("/generate-selenium", post(handle_generate_selenium))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Start the server and run until Ctrl-C or SIGTERM.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = Arc::new(QaService::from_config(config).await?);
    let app = router(service.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("QA agent listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        "Shut down; dropping {} in-memory knowledge base(s)",
        service.registry().len()
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Machine-readable code plus human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Upload(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::Embedding(_) => (StatusCode::SERVICE_UNAVAILABLE, "embedding_unavailable"),
            Error::Index(_) => (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable"),
            Error::GenerationParse(_) => (StatusCode::INTERNAL_SERVER_ERROR, "generation_parse"),
            Error::Model(_) | Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!("{}", err);
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ POST /upload-docs ============

/// Every multipart part that carries a file name is taken as an upload,
/// whatever its field name. Parts without a file name are ignored.
async fn handle_upload_docs(
    State(service): State<Arc<QaService>>,
    mut multipart: Multipart,
) -> Result<Json<UploadReport>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read {}: {}", name, e)))?;
        files.push(UploadedFile::new(name, bytes.to_vec()));
    }

    info!("Upload request with {} file(s)", files.len());
    let report = service.upload_documents(files).await?;
    Ok(Json(report))
}

// ============ POST /generate-test-cases ============

#[derive(Deserialize)]
struct QueryRequest {
    kb_id: String,
    query: String,
}

#[derive(Serialize)]
struct TestCasesResponse {
    test_cases: Vec<TestCase>,
}

async fn handle_generate_test_cases(
    State(service): State<Arc<QaService>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<TestCasesResponse>, AppError> {
    info!("Generating test cases for {}", request.kb_id);
    let test_cases = service
        .generate_test_cases(&request.kb_id, &request.query)
        .await?;
    Ok(Json(TestCasesResponse { test_cases }))
}

// ============ POST /generate-selenium ============

#[derive(Deserialize)]
struct SeleniumRequest {
    test_case: TestCase,
    html_content: String,
}

#[derive(Serialize)]
struct ScriptResponse {
    script: String,
}

async fn handle_generate_selenium(
    State(service): State<Arc<QaService>>,
    Json(request): Json<SeleniumRequest>,
) -> Result<Json<ScriptResponse>, AppError> {
    let script = service
        .generate_script(&request.test_case, &request.html_content)
        .await?;
    Ok(Json(ScriptResponse { script }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
