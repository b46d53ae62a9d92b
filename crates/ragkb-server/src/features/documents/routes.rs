use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::api::{response::ApiResponse, CallerId};
use crate::error::{ApiResult, AppError};
use crate::features::FeatureState;

use super::{
    commands::{UploadDocumentCommand, UploadDocumentError},
    queries::{GetDocumentError, GetDocumentQuery},
};

pub fn documents_routes() -> Router<FeatureState> {
    Router::new()
        .route("/knowledge-bases/:kb_id/documents", post(upload_document))
        .route("/documents/:id", get(get_document))
}

/// Upload a document into a knowledge base
///
/// POST /knowledge-bases/:kb_id/documents (multipart: file, file_type, description)
///
/// 201 when the ingestion job was enqueued, 202 when the document was stored
/// but left pending for the reconciler.
#[tracing::instrument(skip(state, caller, multipart), fields(user_id = caller.0))]
async fn upload_document(
    State(state): State<FeatureState>,
    caller: CallerId,
    Path(kb_id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut content = Vec::new();
    let mut content_type = None;
    let mut file_name = String::new();
    let mut file_type = String::new();
    let mut description = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().unwrap_or("").to_string();
                content_type = field.content_type().map(|s| s.to_string());
                content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file bytes: {}", e)))?
                    .to_vec();
            },
            "file_type" => file_type = read_text(field).await?,
            "description" => description = read_text(field).await?,
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let command = UploadDocumentCommand {
        knowledge_base_id: kb_id,
        user_id: caller.0,
        file_name,
        file_type,
        description,
        content,
        content_type,
    };

    let response = super::commands::upload::handle(&state, command).await?;
    let status = if response.queued {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };

    Ok((status, Json(ApiResponse::success(response))).into_response())
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))
}

/// Poll a document's ingestion status
///
/// GET /documents/:id
async fn get_document(
    State(state): State<FeatureState>,
    caller: CallerId,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let query = GetDocumentQuery {
        document_id: id,
        user_id: caller.0,
    };
    let document = super::queries::get_document::handle(state.documents.as_ref(), query).await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(document))).into_response())
}

impl From<UploadDocumentError> for AppError {
    fn from(err: UploadDocumentError) -> Self {
        match err {
            UploadDocumentError::InvalidFileType(_)
            | UploadDocumentError::FilenameRequired
            | UploadDocumentError::FilenameLength
            | UploadDocumentError::ContentRequired
            | UploadDocumentError::DescriptionLength => AppError::Validation(err.to_string()),
            UploadDocumentError::KnowledgeBaseNotFound(_) => AppError::NotFound(err.to_string()),
            UploadDocumentError::Forbidden(_) => AppError::Forbidden(err.to_string()),
            UploadDocumentError::Storage(ref e) if e.is_transient() => {
                AppError::ServiceUnavailable(err.to_string())
            },
            UploadDocumentError::Storage(e) => AppError::Internal(e.to_string()),
            UploadDocumentError::Database(e) => AppError::from(e),
        }
    }
}

impl From<GetDocumentError> for AppError {
    fn from(err: GetDocumentError) -> Self {
        match err {
            GetDocumentError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetDocumentError::Database(e) => AppError::from(e),
        }
    }
}
