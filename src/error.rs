use crate::document::{DocumentId, DocumentType};
use crate::view::ViewId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{document_type} document not found: {document_id}")]
    DocumentNotFound {
        document_type: DocumentType,
        document_id: DocumentId,
    },

    #[error("row {row_id} not found in view {view_id}")]
    RowNotFound { view_id: ViewId, row_id: DocumentId },

    #[error("invalid document path {path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("field '{field_name}' not found in {document_type}")]
    FieldNotFound {
        document_type: DocumentType,
        field_name: String,
    },

    #[error("document {0} is readonly")]
    ReadonlyDocument(String),

    #[error("document {0} is already checked out")]
    AlreadyCheckedOut(DocumentId),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl Error {
    pub fn storage(err: impl Into<BoxError>) -> Self {
        Error::Storage(err.into())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Error::InvalidState(format!("Failed to acquire lock on {}", what))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DocumentNotFound { .. } | Error::RowNotFound { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::storage(err)
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::storage(err)
    }
}

impl From<serde_rusqlite::Error> for Error {
    fn from(err: serde_rusqlite::Error) -> Self {
        Error::storage(err)
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(err: rusqlite_migration::Error) -> Self {
        Error::storage(err)
    }
}
