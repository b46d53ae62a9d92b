pub mod upload;

pub use upload::{UploadDocumentCommand, UploadDocumentError, UploadDocumentResponse};
