//! Job routes
//!
//! Read-only; callers cannot trigger or retry jobs here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use crate::api::response::ApiResponse;
use crate::error::{ApiResult, AppError};
use crate::queue::QueueError;

use super::queries::{
    get_job::handle as handle_get_job, list_jobs::handle as handle_list_jobs, GetJobError,
    GetJobQuery, ListJobsError, ListJobsQuery,
};

pub fn jobs_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:job_id", get(get_job))
}

/// List jobs
///
/// GET /jobs?status=dead&kind=document:process&limit=50&offset=0
async fn list_jobs(
    State(db): State<PgPool>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Response> {
    let response = handle_list_jobs(db, query).await?;
    let meta = serde_json::to_value(&response.pagination)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_with_meta(response.jobs, meta)),
    )
        .into_response())
}

/// GET /jobs/:job_id
async fn get_job(State(db): State<PgPool>, Path(job_id): Path<String>) -> ApiResult<Response> {
    let job = handle_get_job(db, GetJobQuery { job_id }).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(job))).into_response())
}

impl From<ListJobsError> for AppError {
    fn from(err: ListJobsError) -> Self {
        match err {
            ListJobsError::InvalidStatus(_)
            | ListJobsError::InvalidLimit
            | ListJobsError::InvalidOffset => AppError::BadRequest(err.to_string()),
            ListJobsError::Database(e) => AppError::from(crate::db::DbError::from(e)),
        }
    }
}

impl From<GetJobError> for AppError {
    fn from(err: GetJobError) -> Self {
        match err {
            GetJobError::InvalidId(_) => AppError::BadRequest(err.to_string()),
            GetJobError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetJobError::Queue(QueueError::BrokerUnavailable(message)) => {
                AppError::ServiceUnavailable(message)
            },
            GetJobError::Queue(QueueError::Database(e)) => AppError::Database(e),
            GetJobError::Queue(e) => AppError::Internal(e.to_string()),
        }
    }
}
