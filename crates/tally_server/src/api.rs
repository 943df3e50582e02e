//! HTTP routes over the aggregation engine.

use crate::error::ApiError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{AggregationError, JobId};
use tally_runtime::{
    AggregationEngine, AggregationJob, AggregationRequest, AggregationResult, JobPage, JobQuery,
    JobReceipt, JobStats,
};
use tally_schema::{AggregationType, RuleSet};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    /// The engine every handler talks to
    pub engine: Arc<AggregationEngine>,
}

impl AppState {
    /// Wrap an engine
    #[must_use]
    pub fn new(engine: Arc<AggregationEngine>) -> Self {
        Self { engine }
    }
}

/// Build the application router
pub fn router(state: AppState, permissive_cors: bool) -> Router {
    let aggregations = Router::new()
        .route("/", post(aggregate_handler))
        .route("/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/jobs/{id}", get(get_job_handler))
        .route("/jobs/{id}/cancel", post(cancel_job_handler))
        .route("/schemas", get(list_schemas_handler))
        .route("/schemas/{id}", get(get_schema_handler));

    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1/aggregations", aggregations)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(AggregationError::not_found("job", raw)))
}

/// Aggregate inline
///
/// POST /api/v1/aggregations
async fn aggregate_handler(
    State(state): State<AppState>,
    payload: Result<Json<AggregationRequest>, JsonRejection>,
) -> Result<Json<AggregationResult>, ApiError> {
    let Json(request) = payload?;
    let engine = Arc::clone(&state.engine);
    let result = tokio::task::spawn_blocking(move || engine.aggregate(&request))
        .await
        .map_err(|err| AggregationError::Internal {
            message: err.to_string(),
        })??;

    info!(
        aggregation_id = %result.aggregation_id,
        status = %result.status,
        applied = result.summary.applied_count,
        failed = result.summary.failed_count,
        "Aggregation served"
    );
    Ok(Json(result))
}

/// Queue a background aggregation
///
/// POST /api/v1/aggregations/jobs
async fn create_job_handler(
    State(state): State<AppState>,
    payload: Result<Json<AggregationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobReceipt>), ApiError> {
    let Json(request) = payload?;
    let receipt = state.engine.submit(request).await?;
    info!(job_id = %receipt.job_id, "Job accepted");
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// GET /api/v1/aggregations/jobs
async fn list_jobs_handler(
    State(state): State<AppState>,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> Result<Json<JobPage>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.engine.jobs(&query).await))
}

/// GET /api/v1/aggregations/jobs/{id}
async fn get_job_handler(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<AggregationJob>, ApiError> {
    let Path(raw) = id?;
    let id = parse_job_id(&raw)?;
    Ok(Json(state.engine.job(&id).await?))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    job_id: JobId,
    cancelled: bool,
}

/// Cancel a job; `cancelled` is false if it had already finished
///
/// POST /api/v1/aggregations/jobs/{id}/cancel
async fn cancel_job_handler(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<CancelResponse>, ApiError> {
    let Path(raw) = id?;
    let job_id = parse_job_id(&raw)?;
    let cancelled = state.engine.cancel(&job_id).await?;
    info!(job_id = %job_id, cancelled, "Job cancel requested");
    Ok(Json(CancelResponse { job_id, cancelled }))
}

#[derive(Debug, Default, Deserialize)]
struct SchemaQuery {
    #[serde(default, rename = "type")]
    schema_type: Option<AggregationType>,
}

/// GET /api/v1/aggregations/schemas
async fn list_schemas_handler(
    State(state): State<AppState>,
    query: Result<Query<SchemaQuery>, QueryRejection>,
) -> Result<Json<Vec<Arc<RuleSet>>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.engine.schemas(query.schema_type)))
}

/// GET /api/v1/aggregations/schemas/{id}
async fn get_schema_handler(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<Arc<RuleSet>>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.engine.schema(&id)?))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    jobs: JobStats,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.engine.stats().await,
    })
}
