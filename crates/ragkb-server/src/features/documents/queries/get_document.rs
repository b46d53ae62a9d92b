//! Get document query
//!
//! Clients poll this to follow a document through ingestion.

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::db::DbError;
use crate::documents::{Document, DocumentRepository};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocumentQuery {
    pub document_id: i64,
    /// Authenticated caller; only the owner sees the document.
    pub user_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GetDocumentError {
    #[error("Document {0} not found")]
    NotFound(i64),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl Request<Result<Document, GetDocumentError>> for GetDocumentQuery {}

/// Documents owned by someone else are reported as not found.
#[tracing::instrument(skip(documents))]
pub async fn handle(
    documents: &dyn DocumentRepository,
    query: GetDocumentQuery,
) -> Result<Document, GetDocumentError> {
    match documents.get(query.document_id).await? {
        Some(document) if document.user_id == query.user_id => Ok(document),
        _ => Err(GetDocumentError::NotFound(query.document_id)),
    }
}
