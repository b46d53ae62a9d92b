//! Document records
//!
//! A document row tracks one uploaded object through ingestion. The pipeline
//! only ever moves `embedding_status`; rows are never deleted here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragkb_common::{EmbeddingStatus, FileType};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tracing::instrument;

use crate::db::{DbError, DbResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub knowledge_base_id: i64,
    pub user_id: i64,
    pub name: String,
    pub file_type: String,
    pub description: String,
    pub bucket: String,
    pub object_key: String,
    pub embedding_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn status(&self) -> DbResult<EmbeddingStatus> {
        self.embedding_status
            .parse()
            .map_err(|e: ragkb_common::Error| DbError::Corrupt(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub knowledge_base_id: i64,
    pub user_id: i64,
    pub name: String,
    pub file_type: FileType,
    pub description: String,
    pub bucket: String,
    pub object_key: String,
    pub status: EmbeddingStatus,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Owner of a knowledge base, or `None` if it does not exist.
    async fn knowledge_base_owner(&self, knowledge_base_id: i64) -> DbResult<Option<i64>>;

    async fn create(&self, document: &NewDocument) -> DbResult<Document>;

    async fn get(&self, id: i64) -> DbResult<Option<Document>>;

    /// Set the status and bump `updated_at`. Returns `false` if the row is gone.
    async fn set_status(&self, id: i64, status: EmbeddingStatus) -> DbResult<bool>;

    /// Set the status only if it is currently `expected`.
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: EmbeddingStatus,
        status: EmbeddingStatus,
    ) -> DbResult<bool>;

    /// Documents in one of `statuses` not updated for at least `older_than`,
    /// oldest first.
    async fn list_stale(
        &self,
        statuses: &[EmbeddingStatus],
        older_than: Duration,
        limit: i64,
    ) -> DbResult<Vec<Document>>;
}

#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn knowledge_base_owner(&self, knowledge_base_id: i64) -> DbResult<Option<i64>> {
        let owner: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM knowledge_bases WHERE id = $1")
                .bind(knowledge_base_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(owner.map(|(user_id,)| user_id))
    }

    #[instrument(skip(self, document), fields(knowledge_base_id = document.knowledge_base_id))]
    async fn create(&self, document: &NewDocument) -> DbResult<Document> {
        let created = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (
                knowledge_base_id, user_id, name, file_type, description,
                bucket, object_key, embedding_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(document.knowledge_base_id)
        .bind(document.user_id)
        .bind(&document.name)
        .bind(document.file_type.as_str())
        .bind(&document.description)
        .bind(&document.bucket)
        .bind(&document.object_key)
        .bind(document.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn get(&self, id: i64) -> DbResult<Option<Document>> {
        let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: i64, status: EmbeddingStatus) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE documents SET embedding_status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: EmbeddingStatus,
        status: EmbeddingStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET embedding_status = $1, updated_at = NOW()
            WHERE id = $2 AND embedding_status = $3
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale(
        &self,
        statuses: &[EmbeddingStatus],
        older_than: Duration,
        limit: i64,
    ) -> DbResult<Vec<Document>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let documents = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE embedding_status = ANY($1)
              AND updated_at <= NOW() - make_interval(secs => $2)
            ORDER BY updated_at
            LIMIT $3
            "#,
        )
        .bind(&statuses)
        .bind(older_than.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }
}
