//! Upload document command
//!
//! The enqueue gateway: store the object, record the document and hand an
//! ingestion job to the queue. The request returns once the object and the
//! document row exist; ingestion happens on a worker.
//!
//! If the queue is unreachable the document is kept as `pending` and the
//! upload still succeeds. The reconciler enqueues it later.

use mediator::Request;
use ragkb_common::{EmbeddingStatus, FileType, IngestionJob, PROCESS_DOCUMENT_KIND};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::db::DbError;
use crate::documents::{Document, NewDocument};
use crate::features::FeatureState;
use crate::queue::{JobId, NewJob};
use crate::storage::{document_key, sanitize_file_name, StorageError};

pub const MAX_FILE_NAME_CHARS: usize = 255;
pub const MAX_DESCRIPTION_CHARS: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDocumentCommand {
    pub knowledge_base_id: i64,
    /// Authenticated caller.
    pub user_id: i64,
    pub file_name: String,
    pub file_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDocumentResponse {
    pub document: Document,
    /// Ingestion job, when the enqueue succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub queued: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadDocumentError {
    #[error("Unsupported file type '{0}' (expected csv, doc, pdf or graph)")]
    InvalidFileType(String),
    #[error("Filename is required and cannot be empty")]
    FilenameRequired,
    #[error("Filename must not exceed 255 characters")]
    FilenameLength,
    #[error("Content is required and cannot be empty")]
    ContentRequired,
    #[error("Description must not exceed 255 characters")]
    DescriptionLength,
    #[error("Knowledge base {0} not found")]
    KnowledgeBaseNotFound(i64),
    #[error("Knowledge base {0} belongs to another user")]
    Forbidden(i64),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl Request<Result<UploadDocumentResponse, UploadDocumentError>> for UploadDocumentCommand {}

/// Validated upload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidUpload {
    pub file_type: FileType,
    pub file_name: String,
}

impl UploadDocumentCommand {
    pub fn validate(&self) -> Result<ValidUpload, UploadDocumentError> {
        let file_type = self
            .file_type
            .parse::<FileType>()
            .map_err(|_| UploadDocumentError::InvalidFileType(self.file_type.clone()))?;

        let file_name =
            sanitize_file_name(&self.file_name).ok_or(UploadDocumentError::FilenameRequired)?;
        if file_name.chars().count() > MAX_FILE_NAME_CHARS {
            return Err(UploadDocumentError::FilenameLength);
        }
        if self.content.is_empty() {
            return Err(UploadDocumentError::ContentRequired);
        }
        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(UploadDocumentError::DescriptionLength);
        }

        Ok(ValidUpload {
            file_type,
            file_name,
        })
    }
}

#[tracing::instrument(
    skip(state, command),
    fields(
        knowledge_base_id = command.knowledge_base_id,
        user_id = command.user_id,
        file_type = %command.file_type,
        size = command.content.len()
    )
)]
pub async fn handle(
    state: &FeatureState,
    command: UploadDocumentCommand,
) -> Result<UploadDocumentResponse, UploadDocumentError> {
    let valid = command.validate()?;

    match state.documents.knowledge_base_owner(command.knowledge_base_id).await? {
        None => return Err(UploadDocumentError::KnowledgeBaseNotFound(command.knowledge_base_id)),
        Some(owner) if owner != command.user_id => {
            return Err(UploadDocumentError::Forbidden(command.knowledge_base_id))
        },
        Some(_) => {},
    }

    let key = document_key(command.knowledge_base_id, &valid.file_name);
    state.store.ensure_bucket(&state.bucket).await?;
    state
        .store
        .put(&state.bucket, &key, command.content, command.content_type.as_deref())
        .await?;

    let document = state
        .documents
        .create(&NewDocument {
            knowledge_base_id: command.knowledge_base_id,
            user_id: command.user_id,
            name: valid.file_name,
            file_type: valid.file_type,
            description: command.description,
            bucket: state.bucket.clone(),
            object_key: key,
            status: EmbeddingStatus::Processing,
        })
        .await?;

    info!(document_id = document.id, object_key = %document.object_key, "Document stored");

    match enqueue(state, &document).await {
        Ok(job_id) => {
            info!(document_id = document.id, job_id = %job_id, "Ingestion job enqueued");
            Ok(UploadDocumentResponse {
                document,
                job_id: Some(job_id),
                queued: true,
            })
        },
        Err(reason) => {
            warn!(document_id = document.id, error = %reason, "Enqueue failed, leaving document pending");
            let document = revert_to_pending(state, document).await;
            Ok(UploadDocumentResponse {
                document,
                job_id: None,
                queued: false,
            })
        },
    }
}

async fn enqueue(state: &FeatureState, document: &Document) -> Result<JobId, String> {
    let job = IngestionJob {
        knowledge_base_id: document.knowledge_base_id,
        document_id: document.id,
        description: document.description.clone(),
        bucket: document.bucket.clone(),
        object_name: document.object_key.clone(),
        file_type: document.file_type.clone(),
    };
    let payload = job.to_payload().map_err(|e| e.to_string())?;

    state
        .queue
        .enqueue(
            NewJob::new(PROCESS_DOCUMENT_KIND, payload)
                .on_queue(&state.queue_name)
                .with_dedup_key(job.dedup_key())
                .with_max_attempts(state.max_attempts),
        )
        .await
        .map_err(|e| e.to_string())
}

/// Move the document from `processing` back to `pending`. An enqueue can
/// commit even though the caller saw an error, so a worker may already have
/// settled the document; that status is kept.
async fn revert_to_pending(state: &FeatureState, mut document: Document) -> Document {
    let reverted = state
        .documents
        .compare_and_set_status(document.id, EmbeddingStatus::Processing, EmbeddingStatus::Pending)
        .await;

    match reverted {
        Ok(true) => document.embedding_status = EmbeddingStatus::Pending.as_str().to_string(),
        Ok(false) => match state.documents.get(document.id).await {
            Ok(Some(current)) => {
                info!(
                    document_id = document.id,
                    status = %current.embedding_status,
                    "Document already moved on, keeping its status"
                );
                return current;
            },
            Ok(None) => warn!(document_id = document.id, "Document row no longer exists"),
            Err(e) => error!(document_id = document.id, error = %e, "Failed to re-read document"),
        },
        // the stale-processing sweep still picks it up
        Err(e) => error!(document_id = document.id, error = %e, "Failed to mark document pending"),
    }
    document
}
