//! JSON HTTP API over the [`VectorizerService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/vectorize` | Start a vectorization job |
//! | `GET`  | `/api/job/{job_id}` | Job status and progress |
//! | `POST` | `/api/search` | Similarity search |
//! | `POST` | `/api/search/files` | Chunks of files whose path contains a pattern |
//! | `GET`  | `/api/user/{username}/repos` | List a user's repositories |
//! | `GET`  | `/api/user/{username}/repo/{repo_name}/stats` | Files and sizes per extension |
//! | `DELETE` | `/api/user/{username}/repo/{repo_name}` | Delete a repository |
//! | `GET`  | `/api/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "job 1234 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large`
//! (413), `repository_unavailable` (502), `embedding_unavailable` (503),
//! `storage` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::VectorizeError;
use crate::models::{Job, RepositoryStats, RepositorySummary};
use crate::search::{PathSearchRequest, PathSearchResponse, SearchRequest, SearchResponse};
use crate::service::{JobAccepted, VectorizeRequest, VectorizerService};

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(service: Arc<VectorizerService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/vectorize", post(handle_vectorize))
        .route("/api/job/{job_id}", get(handle_job_status))
        .route("/api/search", post(handle_search))
        .route("/api/search/files", post(handle_search_files))
        .route("/api/user/{username}/repos", get(handle_list_repos))
        .route(
            "/api/user/{username}/repo/{repo_name}/stats",
            get(handle_repo_stats),
        )
        .route(
            "/api/user/{username}/repo/{repo_name}",
            delete(handle_delete_repo),
        )
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(service)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(service: Arc<VectorizerService>) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<VectorizeError> for AppError {
    fn from(err: VectorizeError) -> Self {
        let status = match &err {
            VectorizeError::Validation(_) => StatusCode::BAD_REQUEST,
            VectorizeError::NotFound(_) => StatusCode::NOT_FOUND,
            VectorizeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            VectorizeError::RepositoryUnavailable(_) => StatusCode::BAD_GATEWAY,
            VectorizeError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            VectorizeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Malformed JSON bodies get the same error envelope as everything else.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: rejection.body_text(),
        }
    }
}

// ============ GET /api/health ============

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

// ============ POST /api/vectorize ============

async fn handle_vectorize(
    State(service): State<Arc<VectorizerService>>,
    body: Result<Json<VectorizeRequest>, JsonRejection>,
) -> Result<Json<JobAccepted>, AppError> {
    let Json(request) = body?;
    Ok(Json(service.start_vectorization(request)?))
}

// ============ GET /api/job/{job_id} ============

async fn handle_job_status(
    State(service): State<Arc<VectorizerService>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(service.job_status(&job_id)?))
}

// ============ POST /api/search ============

async fn handle_search(
    State(service): State<Arc<VectorizerService>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(request) = body?;
    Ok(Json(service.search(&request).await?))
}

// ============ POST /api/search/files ============

async fn handle_search_files(
    State(service): State<Arc<VectorizerService>>,
    body: Result<Json<PathSearchRequest>, JsonRejection>,
) -> Result<Json<PathSearchResponse>, AppError> {
    let Json(request) = body?;
    Ok(Json(service.search_by_path(&request).await?))
}

// ============ GET /api/user/{username}/repo/{repo_name}/stats ============

async fn handle_repo_stats(
    State(service): State<Arc<VectorizerService>>,
    Path((username, repo_name)): Path<(String, String)>,
) -> Result<Json<RepositoryStats>, AppError> {
    Ok(Json(service.repository_stats(&username, &repo_name).await?))
}

// ============ GET /api/user/{username}/repos ============

#[derive(Serialize)]
struct RepoListResponse {
    username: String,
    repositories: Vec<RepositorySummary>,
}

async fn handle_list_repos(
    State(service): State<Arc<VectorizerService>>,
    Path(username): Path<String>,
) -> Result<Json<RepoListResponse>, AppError> {
    let repositories = service.list_repositories(&username).await?;
    Ok(Json(RepoListResponse {
        username,
        repositories,
    }))
}

// ============ DELETE /api/user/{username}/repo/{repo_name} ============

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
}

async fn handle_delete_repo(
    State(service): State<Arc<VectorizerService>>,
    Path((username, repo_name)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, AppError> {
    service.delete_repository(&username, &repo_name).await?;
    Ok(Json(DeleteResponse {
        message: format!("Repository {} deleted for user {}", repo_name, username),
    }))
}
