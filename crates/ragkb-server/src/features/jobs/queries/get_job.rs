//! Get job query

use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::queue::{JobRecord, PgJobQueue, QueueError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobQuery {
    pub job_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobError {
    #[error("Invalid job id '{0}'")]
    InvalidId(String),
    #[error("Job {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Request<Result<JobRecord, GetJobError>> for GetJobQuery {}

pub async fn handle(pool: PgPool, query: GetJobQuery) -> Result<JobRecord, GetJobError> {
    let id = Uuid::parse_str(query.job_id.trim())
        .map_err(|_| GetJobError::InvalidId(query.job_id.clone()))?;

    PgJobQueue::new(pool)
        .get(id)
        .await?
        .ok_or(GetJobError::NotFound(id))
}
